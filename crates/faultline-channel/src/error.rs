//! Channel error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("{channel}: timed out after {waited:?} waiting for {expected}")]
    Timeout {
        channel: String,
        waited: Duration,
        expected: String,
    },

    #[error("{channel}: process output closed")]
    Closed { channel: String },

    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed { .. })
    }
}
