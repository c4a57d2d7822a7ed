//! A captured field that may have degraded to a placeholder

use serde::{Deserialize, Serialize};

/// Either a parsed value or the reason it could not be captured.
///
/// Partial capture is not an error: a snapshot with some `Missing` fields is
/// still handed on, as long as the assembler's minimum is met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Captured<T> {
    Resolved { value: T },
    Missing { reason: String },
}

impl<T> Captured<T> {
    pub fn resolved(value: T) -> Self {
        Captured::Resolved { value }
    }

    pub fn missing(reason: impl Into<String>) -> Self {
        Captured::Missing {
            reason: reason.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Captured::Resolved { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Captured::Resolved { value } => Some(value),
            Captured::Missing { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Captured::Resolved { value } => Some(value),
            Captured::Missing { .. } => None,
        }
    }

    pub fn missing_reason(&self) -> Option<&str> {
        match self {
            Captured::Resolved { .. } => None,
            Captured::Missing { reason } => Some(reason),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Captured<U> {
        match self {
            Captured::Resolved { value } => Captured::Resolved { value: f(value) },
            Captured::Missing { reason } => Captured::Missing { reason },
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for Captured<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Captured::resolved(value),
            Err(e) => Captured::missing(e.to_string()),
        }
    }
}
