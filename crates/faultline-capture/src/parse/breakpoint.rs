use regex::Regex;
use std::sync::LazyLock;

use faultline_snapshot::StopLocation;

use super::hex;
use crate::error::Unparseable;

static SET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Breakpoint (\d+) at (0x[0-9a-fA-F]+)(?:: file (\S+), line (\d+)\.)?")
        .expect("breakpoint regex is valid")
});

static HIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Breakpoint (\d+), (?:(0x[0-9a-fA-F]+) in )?(\S+) \(.*?\)(?: at (\S+):(\d+))?",
    )
    .expect("breakpoint hit regex is valid")
});

/// Confirmation printed by `break LOCATION`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSet {
    pub number: u32,
    pub address: u64,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// `break LOCATION` output
pub fn breakpoint_set(output: &str) -> Result<BreakpointSet, Unparseable> {
    let caps = SET
        .captures(output)
        .ok_or_else(|| Unparseable::new("breakpoint", "not confirmed", output))?;
    Ok(BreakpointSet {
        number: caps[1]
            .parse()
            .map_err(|_| Unparseable::new("breakpoint", "bad number", output))?,
        address: hex(&caps[2]).ok_or_else(|| Unparseable::new("breakpoint", "bad address", output))?,
        file: caps.get(3).map(|m| m.as_str().to_string()),
        line: caps.get(4).and_then(|m| m.as_str().parse().ok()),
    })
}

/// Offset of the first breakpoint hit report in `output`
pub fn stop_location_at(output: &str) -> Option<usize> {
    HIT.find(output).map(|m| m.start())
}

/// Breakpoint number and stop location from a hit report
pub fn stop_location(output: &str) -> Result<(u32, StopLocation), Unparseable> {
    let caps = HIT
        .captures(output)
        .ok_or_else(|| Unparseable::new("stop location", "no breakpoint hit", output))?;
    let number = caps[1]
        .parse()
        .map_err(|_| Unparseable::new("stop location", "bad number", output))?;
    Ok((
        number,
        StopLocation {
            function: match &caps[3] {
                "??" => None,
                name => Some(name.to_string()),
            },
            file: caps.get(4).map(|m| m.as_str().to_string()),
            line: caps.get(5).and_then(|m| m.as_str().parse().ok()),
            address: caps.get(2).and_then(|m| hex(m.as_str())),
        },
    ))
}
