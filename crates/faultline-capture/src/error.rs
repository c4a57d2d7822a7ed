//! Capture errors

use std::time::Duration;
use thiserror::Error;

use faultline_channel::ChannelError;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("No fault observed within {waited:?}")]
    NoFaultObserved { waited: Duration },
}

/// A debugger response that did not have the expected shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unparseable {what}: {reason}")]
pub struct Unparseable {
    pub what: &'static str,
    pub reason: String,
    /// First line of the offending output
    pub excerpt: String,
}

impl Unparseable {
    pub(crate) fn new(what: &'static str, reason: impl Into<String>, output: &str) -> Self {
        Self {
            what,
            reason: reason.into(),
            excerpt: output
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("")
                .chars()
                .take(120)
                .collect(),
        }
    }
}
