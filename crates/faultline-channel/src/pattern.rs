//! Output matchers for `expect`

use regex::Regex;
use std::ops::Range;

use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact substring
    Literal(String),
    /// Regular expression, unanchored
    Regex(Regex),
}

impl Pattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    pub fn regex(expr: &str) -> Result<Self, ChannelError> {
        Regex::new(expr)
            .map(Pattern::Regex)
            .map_err(|e| ChannelError::InvalidPattern {
                pattern: expr.to_string(),
                reason: e.to_string(),
            })
    }

    /// Byte range of the first match in `haystack`
    pub fn find(&self, haystack: &str) -> Option<Range<usize>> {
        match self {
            Pattern::Literal(needle) if needle.is_empty() => None,
            Pattern::Literal(needle) => haystack
                .find(needle.as_str())
                .map(|start| start..start + needle.len()),
            Pattern::Regex(re) => re
                .find_iter(haystack)
                .find(|m| !m.range().is_empty())
                .map(|m| m.range()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Literal(text) => text,
            Pattern::Regex(re) => re.as_str(),
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Literal(text) => write!(f, "{:?}", text),
            Pattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::literal(text)
    }
}

/// Human-readable list of patterns for diagnostics
pub(crate) fn describe(patterns: &[Pattern]) -> String {
    if patterns.is_empty() {
        return "end of output".to_string();
    }
    patterns
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}
