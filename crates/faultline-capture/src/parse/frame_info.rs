use regex::Regex;
use std::sync::LazyLock;

use super::hex;
use crate::error::Unparseable;

static SAVED_RIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"saved [re]ip = (0x[0-9a-fA-F]+)").expect("saved rip regex is valid")
});

/// Saved return address from `info frame N`
pub fn saved_return_address(output: &str) -> Result<u64, Unparseable> {
    SAVED_RIP
        .captures(output)
        .and_then(|caps| hex(&caps[1]))
        .ok_or_else(|| Unparseable::new("frame info", "no saved return address", output))
}
