use regex::Regex;
use std::sync::LazyLock;

use faultline_snapshot::{Frame, SourceLocation};

use super::hex;
use crate::error::Unparseable;

static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^#(\d+)\s+(?:(0x[0-9a-fA-F]+)\s+in\s+)?(\S+)\s*\(.*\)(?:\s+at\s+(\S+):(\d+))?",
    )
    .expect("frame regex is valid")
});

/// `backtrace` output, innermost frame first
pub fn backtrace(output: &str) -> Result<Vec<Frame>, Unparseable> {
    let frames: Vec<Frame> = output
        .lines()
        .filter_map(|line| FRAME.captures(line.trim_start()))
        .filter_map(|caps| {
            let level = caps[1].parse().ok()?;
            let function = match &caps[3] {
                "??" => None,
                name => Some(name.to_string()),
            };
            let location = match (caps.get(4), caps.get(5)) {
                (Some(file), Some(line)) => Some(SourceLocation {
                    file: file.as_str().to_string(),
                    line: line.as_str().parse().ok()?,
                }),
                _ => None,
            };
            Some(Frame {
                level,
                address: caps.get(2).and_then(|m| hex(m.as_str())),
                function,
                location,
            })
        })
        .collect();

    if frames.is_empty() {
        return Err(Unparseable::new("backtrace", "no frames", output));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_backtrace() {
        let output = "\
#0  vector14 () at vectors.S:56
#1  0x0000000000000000 in ?? ()
#2  0xffffffff80106a2e in trap (tf=0xffffffff8011ff50) at trap.c:45
#3  0xffffffff80105c3d in alltraps () at trapasm.S:20
Backtrace stopped: previous frame inner to this frame (corrupt stack?)
";
        let frames = backtrace(output).unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].address, None);
        assert_eq!(frames[0].function.as_deref(), Some("vector14"));
        assert_eq!(frames[0].location.as_ref().unwrap().line, 56);
        assert_eq!(frames[1].address, Some(0));
        assert_eq!(frames[1].function, None);
        assert_eq!(frames[2].location.as_ref().unwrap().file, "trap.c");
        assert_eq!(frames[3].level, 3);
    }

    #[test]
    fn test_frame_without_source() {
        let frames = backtrace("#0  0xffffffff80100f2a in memmove ()\n").unwrap();
        assert_eq!(frames[0].address, Some(0xffff_ffff_8010_0f2a));
        assert!(frames[0].location.is_none());
    }

    #[test]
    fn test_no_stack() {
        let err = backtrace("No stack.\n").unwrap_err();
        assert_eq!(err.what, "backtrace");
        assert_eq!(err.excerpt, "No stack.");
    }
}
