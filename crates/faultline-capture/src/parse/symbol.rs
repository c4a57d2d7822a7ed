use regex::Regex;
use std::sync::LazyLock;

use faultline_snapshot::SymbolRef;

use crate::error::Unparseable;

static SYMBOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(\S+)(?: \+ (\d+))? in section (\S+)").expect("symbol regex is valid")
});

/// `info symbol ADDR` output
pub fn symbol(output: &str) -> Result<SymbolRef, Unparseable> {
    if output.contains("No symbol matches") {
        return Err(Unparseable::new("symbol", "no symbol matches", output));
    }
    let caps = SYMBOL
        .captures(output)
        .ok_or_else(|| Unparseable::new("symbol", "unexpected format", output))?;
    Ok(SymbolRef {
        symbol: caps[1].to_string(),
        offset: caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
        section: Some(caps[3].to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_with_offset() {
        let sym = symbol("trap + 42 in section .text\n").unwrap();
        assert_eq!(sym.symbol, "trap");
        assert_eq!(sym.offset, 42);
        assert_eq!(sym.section.as_deref(), Some(".text"));
    }

    #[test]
    fn test_exact_symbol() {
        assert_eq!(symbol("vector14 in section .text").unwrap().offset, 0);
    }

    #[test]
    fn test_no_symbol() {
        let err = symbol("No symbol matches 0x0.\n").unwrap_err();
        assert_eq!(err.reason, "no symbol matches");
    }
}
