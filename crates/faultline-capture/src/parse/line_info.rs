use regex::Regex;
use std::sync::LazyLock;

use faultline_snapshot::SourceLocation;

use crate::error::Unparseable;

static LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Line (\d+) of "([^"]+)""#).expect("line info regex is valid")
});

/// `info line *ADDR` output. `Ok(None)` means the address has no line
/// information and only function granularity is available.
pub fn line_info(output: &str) -> Result<Option<SourceLocation>, Unparseable> {
    if output.contains("No line number information") {
        return Ok(None);
    }
    let caps = LINE
        .captures(output)
        .ok_or_else(|| Unparseable::new("line info", "unexpected format", output))?;
    let line = caps[1]
        .parse()
        .map_err(|_| Unparseable::new("line info", "line number out of range", output))?;
    Ok(Some(SourceLocation {
        file: caps[2].to_string(),
        line,
    }))
}
