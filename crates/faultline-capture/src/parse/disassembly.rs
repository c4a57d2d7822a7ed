use regex::Regex;
use std::sync::LazyLock;

use faultline_snapshot::Instruction;

use super::hex;
use crate::error::Unparseable;

/// `=> 0xffffffff80106b0e <vector14+2>:\tpush   $0xe`
static INSN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(=>)?\s*(0x[0-9a-fA-F]+)(?:\s+<([^>]+)>)?:\s*(.*)$")
        .expect("instruction regex is valid")
});

/// Output of `disassemble ADDR` or `x/Ni ADDR`
pub fn disassembly(output: &str) -> Result<Vec<Instruction>, Unparseable> {
    if output.contains("Cannot access memory") {
        return Err(Unparseable::new("disassembly", "memory not readable", output));
    }
    if output.contains("No function contains") {
        return Err(Unparseable::new("disassembly", "no enclosing function", output));
    }

    let instructions: Vec<Instruction> = output
        .lines()
        .filter_map(|line| INSN.captures(line))
        .filter_map(|caps| {
            Some(Instruction {
                address: hex(&caps[2])?,
                location: caps.get(3).map(|m| m.as_str().to_string()),
                text: caps[4].trim().to_string(),
                is_current: caps.get(1).is_some(),
            })
        })
        .collect();

    if instructions.is_empty() {
        return Err(Unparseable::new("disassembly", "no instructions", output));
    }
    Ok(instructions)
}
