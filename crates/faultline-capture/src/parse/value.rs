use regex::Regex;
use std::sync::LazyLock;

use super::hex;
use crate::error::Unparseable;

static VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\d+ = .*?(0x[0-9a-fA-F]+)").expect("print value regex is valid")
});

/// `print/x EXPR` output
pub fn print_value(output: &str) -> Result<u64, Unparseable> {
    VALUE
        .captures(output)
        .and_then(|caps| hex(&caps[1]))
        .ok_or_else(|| Unparseable::new("value", "no hex value", output))
}
