use regex::Regex;
use std::sync::LazyLock;

use faultline_snapshot::SourceLine;

use crate::error::Unparseable;

static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)[\t ](.*)$").expect("listing regex is valid"));

/// `list FILE:A,B` output; `target` marks the line of interest
pub fn listing(output: &str, target: u32) -> Result<Vec<SourceLine>, Unparseable> {
    let lines: Vec<SourceLine> = output
        .lines()
        .filter_map(|line| NUMBERED.captures(line))
        .filter_map(|caps| {
            let number = caps[1].parse().ok()?;
            Some(SourceLine {
                number,
                text: caps[2].to_string(),
                is_target: number == target,
            })
        })
        .collect();

    if lines.is_empty() {
        return Err(Unparseable::new("listing", "no numbered lines", output));
    }
    Ok(lines)
}
