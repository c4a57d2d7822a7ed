use regex::Regex;
use std::sync::LazyLock;

use faultline_snapshot::RegisterFile;

use super::hex;
use crate::error::Unparseable;

/// `rax            0x0                 0`
static COLUMNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_]*)\s+(0x[0-9a-fA-F]+)\b").expect("register regex is valid")
});

/// `cr2=0x0`, possibly several per line
static ASSIGNED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z][A-Za-z0-9_]*)\s*=\s*(0x[0-9a-fA-F]+)\b")
        .expect("register assignment regex is valid")
});

/// `info registers` output
pub fn registers(output: &str) -> Result<RegisterFile, Unparseable> {
    let mut regs = RegisterFile::new();

    for line in output.lines() {
        if let Some(caps) = COLUMNS.captures(line) {
            if let Some(value) = hex(&caps[2]) {
                regs.insert(&caps[1], value);
            }
            continue;
        }
        for caps in ASSIGNED.captures_iter(line) {
            if let Some(value) = hex(&caps[2]) {
                regs.insert(&caps[1], value);
            }
        }
    }

    if regs.is_empty() {
        return Err(Unparseable::new("registers", "no register values", output));
    }
    Ok(regs)
}
