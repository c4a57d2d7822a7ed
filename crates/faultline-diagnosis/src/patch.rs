//! Unified diff validation and patch artifacts

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PatchError;
use crate::result::DiagnosisResult;

/// A patch that at least looks like a unified diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedDiff {
    /// Diff text with any Markdown fence removed
    pub text: String,
    /// Target paths from the `+++` headers, `b/` prefix dropped
    pub files: Vec<String>,
    pub hunks: usize,
}

impl UnifiedDiff {
    pub fn parse(raw: &str) -> Result<Self, PatchError> {
        let text = strip_fence(raw);
        if text.trim().is_empty() {
            return Err(PatchError::Empty);
        }

        let mut has_old = false;
        let mut files = Vec::new();
        let mut hunks = 0;
        for line in text.lines() {
            if line.starts_with("--- ") {
                has_old = true;
            } else if let Some(target) = line.strip_prefix("+++ ") {
                if let Some(path) = header_path(target) {
                    if !files.contains(&path) {
                        files.push(path);
                    }
                }
            } else if line.starts_with("@@") {
                hunks += 1;
            }
        }

        if !has_old || files.is_empty() {
            return Err(PatchError::MissingHeaders);
        }
        if hunks == 0 {
            return Err(PatchError::MissingHunk);
        }

        let mut text = text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(Self { text, files, hunks })
    }
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return raw;
    };
    // drop the info string (`diff`, `patch`, ...)
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body)
}

fn header_path(target: &str) -> Option<String> {
    // `+++ b/kernel/trap.c\t2024-01-01 ...`
    let path = target.split('\t').next()?.trim();
    if path.is_empty() || path == "/dev/null" {
        return None;
    }
    Some(path.strip_prefix("b/").unwrap_or(path).to_string())
}

/// The file written for a diagnosis: a comment header followed by the diff
#[derive(Debug, Clone)]
pub struct PatchArtifact {
    pub diagnosis: DiagnosisResult,
    /// `None` when the suggested patch is not a valid diff
    pub diff: Option<UnifiedDiff>,
}

impl PatchArtifact {
    pub fn new(diagnosis: DiagnosisResult) -> Self {
        let diff = match UnifiedDiff::parse(&diagnosis.suggested_fix_patch) {
            Ok(diff) => Some(diff),
            Err(e) => {
                tracing::warn!(error = %e, "Suggested patch is not a unified diff");
                None
            }
        };
        Self { diagnosis, diff }
    }

    pub fn is_valid(&self) -> bool {
        self.diff.is_some()
    }

    /// Why the suggested patch is not a usable diff
    pub fn rejection(&self) -> Option<PatchError> {
        match self.diff {
            Some(_) => None,
            None => UnifiedDiff::parse(&self.diagnosis.suggested_fix_patch).err(),
        }
    }

    pub fn render(&self) -> String {
        let d = &self.diagnosis;
        let mut out = String::new();
        out.push_str("# AI-Generated Patch for xv6 Fault\n");
        out.push_str(&format!("# Root Cause: {}\n", one_line(&d.root_cause)));
        out.push_str(&format!("# Faulty Function: {}\n", one_line(&d.faulty_function)));
        out.push_str(&format!("# Faulty Line: {}\n", one_line(&d.faulty_line)));
        out.push_str(&format!("# Severity: {}\n", d.severity));
        if let Some(diff) = &self.diff {
            out.push_str(&format!("# Files: {}\n\n", diff.files.join(", ")));
            out.push_str(&diff.text);
        } else {
            out.push_str("# Warning: suggested fix is not a unified diff\n\n");
            out.push_str(&d.suggested_fix_patch);
            if !d.suggested_fix_patch.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        tracing::info!(path = %path.display(), valid = self.is_valid(), "Patch written");
        Ok(())
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
