//! Transcript channel
//!
//! Output is pumped in raw chunks (debugger prompts carry no trailing newline)
//! into an unbounded queue by one reader task per output stream. `expect`
//! drains that queue into a match buffer; everything up to and including a
//! match is consumed, so later calls never re-match old output.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::ChannelError;
use crate::pattern::{describe, Pattern};
use crate::transcript::Transcript;
use crate::Result;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type InterruptHook = Box<dyn Fn() -> std::io::Result<()> + Send + Sync>;

const READ_CHUNK: usize = 4096;
const ETX: u8 = 0x03;

/// Result of a successful `expect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index into the pattern list that matched
    pub index: usize,
    /// Output consumed before the match
    pub before: String,
    /// The matched text itself
    pub matched: String,
}

impl Match {
    /// Everything consumed by this match
    pub fn consumed(&self) -> String {
        format!("{}{}", self.before, self.matched)
    }
}

pub struct TranscriptChannel {
    name: String,
    writer: Option<BoxedWriter>,
    chunks: mpsc::UnboundedReceiver<String>,
    buffer: String,
    closed: bool,
    transcript: Transcript,
    interrupt: Option<InterruptHook>,
}

impl TranscriptChannel {
    /// Attach to a process: one writer for its input, one reader per output
    /// stream. The channel reports `Closed` once every reader hits EOF.
    pub fn spawn(
        name: impl Into<String>,
        writer: BoxedWriter,
        readers: Vec<BoxedReader>,
        transcript: Transcript,
    ) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();

        for reader in readers {
            tokio::spawn(pump(reader, tx.clone(), transcript.clone(), name.clone()));
        }

        Self {
            name,
            writer: Some(writer),
            chunks: rx,
            buffer: String::new(),
            closed: false,
            transcript,
            interrupt: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Output received but not yet consumed by a match
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// True once the process output has ended
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Install the action used by `interrupt` (e.g. SIGINT to the process)
    pub fn set_interrupt_hook<F>(&mut self, hook: F)
    where
        F: Fn() -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.interrupt = Some(Box::new(hook));
    }

    /// Write one line to the process input
    pub async fn send(&mut self, line: &str) -> Result<()> {
        tracing::debug!(channel = %self.name, line = %line, "send");
        self.transcript.record_sent(&self.name, line);

        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write(&data).await
    }

    /// Write raw bytes without a line terminator
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.transcript
            .record_sent(&self.name, &String::from_utf8_lossy(bytes).escape_default().to_string());
        self.write(bytes).await
    }

    /// Ask a running process to stop. Without a hook, writes a `^C` byte.
    pub async fn interrupt(&mut self) -> Result<()> {
        match &self.interrupt {
            Some(hook) => {
                self.transcript.record_sent(&self.name, "<interrupt>");
                hook().map_err(|e| self.map_io(e))
            }
            None => self.send_raw(&[ETX]).await,
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(ChannelError::Closed {
                channel: self.name.clone(),
            });
        };

        let outcome = async {
            writer.write_all(data).await?;
            writer.flush().await
        }
        .await;

        outcome.map_err(|e| self.map_io(e))
    }

    fn map_io(&self, e: std::io::Error) -> ChannelError {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
                ChannelError::Closed {
                    channel: self.name.clone(),
                }
            }
            _ => ChannelError::Io(e),
        }
    }

    /// Block until the output matches one of `patterns` or `timeout` elapses.
    ///
    /// The earliest match in the stream wins; ties go to the pattern listed
    /// first. An empty pattern list waits for the end of output.
    pub async fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> Result<Match> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(found) = self.take_match(patterns) {
                tracing::trace!(
                    channel = %self.name,
                    pattern = %patterns[found.index],
                    "matched"
                );
                return Ok(found);
            }

            if self.closed {
                return Err(ChannelError::Closed {
                    channel: self.name.clone(),
                });
            }

            match tokio::time::timeout_at(deadline, self.chunks.recv()).await {
                Ok(Some(chunk)) => self.buffer.push_str(&chunk),
                Ok(None) => self.closed = true,
                Err(_) => {
                    tracing::debug!(
                        channel = %self.name,
                        expected = %describe(patterns),
                        "expect timed out"
                    );
                    return Err(ChannelError::Timeout {
                        channel: self.name.clone(),
                        waited: timeout,
                        expected: describe(patterns),
                    });
                }
            }
        }
    }

    /// Convenience for a single pattern
    pub async fn expect_one(&mut self, pattern: &Pattern, timeout: Duration) -> Result<Match> {
        self.expect(std::slice::from_ref(pattern), timeout).await
    }

    fn take_match(&mut self, patterns: &[Pattern]) -> Option<Match> {
        let mut best: Option<(usize, std::ops::Range<usize>)> = None;

        for (index, pattern) in patterns.iter().enumerate() {
            if let Some(range) = pattern.find(&self.buffer) {
                let earlier = best
                    .as_ref()
                    .map_or(true, |(_, current)| range.start < current.start);
                if earlier {
                    best = Some((index, range));
                }
            }
        }

        let (index, range) = best?;
        let rest = self.buffer.split_off(range.end);
        let consumed = std::mem::replace(&mut self.buffer, rest);

        Some(Match {
            index,
            before: consumed[..range.start].to_string(),
            matched: consumed[range.start..].to_string(),
        })
    }

    /// Drop unconsumed output, pulling in whatever has already arrived
    pub fn discard_pending(&mut self) -> String {
        while let Ok(chunk) = self.chunks.try_recv() {
            self.buffer.push_str(&chunk);
        }
        std::mem::take(&mut self.buffer)
    }

    /// Close the process input; further sends fail with `Closed`
    pub async fn close_input(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}

async fn pump(
    mut reader: BoxedReader,
    tx: mpsc::UnboundedSender<String>,
    transcript: Transcript,
    name: String,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut carry: Vec<u8> = Vec::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                carry.extend_from_slice(&buf[..n]);
                let text = normalize(&take_utf8(&mut carry));
                if text.is_empty() {
                    continue;
                }
                transcript.record_received(&name, &text);
                if tx.send(text).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(channel = %name, error = %e, "reader stopped");
                break;
            }
        }
    }

    if !carry.is_empty() {
        let text = normalize(&String::from_utf8_lossy(&carry));
        transcript.record_received(&name, &text);
        let _ = tx.send(text);
    }
}

/// Decode the longest valid UTF-8 prefix, keeping an incomplete trailing
/// sequence for the next read.
fn take_utf8(carry: &mut Vec<u8>) -> String {
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let text = text.to_string();
            carry.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&carry[..valid]).into_owned();
            carry.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            text
        }
    }
}

fn normalize(text: &str) -> String {
    text.replace('\r', "")
}
