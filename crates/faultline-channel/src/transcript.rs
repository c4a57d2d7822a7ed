//! Retained transcript of every channel in a session

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Written to the process input
    Sent,
    /// Read from the process output
    Received,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub at: DateTime<Utc>,
    /// Channel name (e.g. "gdb", "qemu")
    pub source: String,
    pub direction: Direction,
    pub text: String,
}

/// Shared, append-only log. Cloning shares the same underlying log.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, source: &str, text: &str) {
        self.push(source, Direction::Sent, text);
    }

    pub fn record_received(&self, source: &str, text: &str) {
        if !text.is_empty() {
            self.push(source, Direction::Received, text);
        }
    }

    fn push(&self, source: &str, direction: Direction, text: &str) {
        self.entries.lock().push(TranscriptEntry {
            at: Utc::now(),
            source: source.to_string(),
            direction,
            text: text.to_string(),
        });
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Lines sent to one channel, in order
    pub fn sent_to(&self, source: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.direction == Direction::Sent && e.source == source)
            .map(|e| e.text.clone())
            .collect()
    }

    /// Render as text, one `[source]` prefix per line. Received chunks from the
    /// same source are stitched back into whole lines.
    pub fn render(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::new();
        let mut at_line_start = true;
        let mut last_source: Option<&str> = None;

        for entry in entries.iter() {
            let switching = last_source != Some(entry.source.as_str());
            if !at_line_start && (switching || entry.direction == Direction::Sent) {
                out.push('\n');
                at_line_start = true;
            }

            match entry.direction {
                Direction::Sent => {
                    out.push_str(&format!("[{}] > {}\n", entry.source, entry.text));
                    at_line_start = true;
                    last_source = None;
                }
                Direction::Received => {
                    for piece in entry.text.split_inclusive('\n') {
                        if at_line_start {
                            out.push_str(&format!("[{}] ", entry.source));
                        }
                        out.push_str(piece);
                        at_line_start = piece.ends_with('\n');
                    }
                    last_source = Some(entry.source.as_str());
                }
            }
        }

        out
    }

    /// Last `n` rendered lines
    pub fn tail(&self, n: usize) -> Vec<String> {
        let rendered = self.render();
        let lines: Vec<&str> = rendered.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].iter().map(|l| l.to_string()).collect()
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_stitches_chunks() {
        let transcript = Transcript::new();
        transcript.record_sent("gdb", "info registers");
        transcript.record_received("gdb", "rax            0x0");
        transcript.record_received("gdb", "   0\nrip            0x10\n(gdb) ");
        transcript.record_received("qemu", "$ ");

        let rendered = transcript.render();
        assert_eq!(
            rendered,
            "[gdb] > info registers\n[gdb] rax            0x0   0\n[gdb] rip            0x10\n[gdb] (gdb) \n[qemu] $ "
        );
    }

    #[test]
    fn test_tail() {
        let transcript = Transcript::new();
        transcript.record_received("qemu", "a\nb\nc\nd\n");
        assert_eq!(transcript.tail(2), vec!["[qemu] c", "[qemu] d"]);
        assert_eq!(transcript.tail(10).len(), 4);
    }

    #[test]
    fn test_clones_share_log() {
        let transcript = Transcript::new();
        let other = transcript.clone();
        other.record_sent("gdb", "continue");
        assert_eq!(transcript.sent_to("gdb"), vec!["continue"]);
        assert!(transcript.sent_to("qemu").is_empty());
    }
}
