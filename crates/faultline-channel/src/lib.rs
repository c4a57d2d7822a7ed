//! Faultline Transcript Channels
//!
//! Line-oriented text conduits to spawned processes:
//! - `send` writes a line to the process input
//! - `expect` blocks until the output matches one of several patterns, or times out
//! - every byte sent or received lands in a shared, retained transcript

mod channel;
mod error;
mod pattern;
mod transcript;

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use channel::{BoxedReader, BoxedWriter, Match, TranscriptChannel};
pub use error::ChannelError;
pub use pattern::Pattern;
pub use transcript::{Direction, Transcript, TranscriptEntry};

pub type Result<T> = std::result::Result<T, ChannelError>;
