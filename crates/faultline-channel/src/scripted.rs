//! Scripted in-memory peers
//!
//! Stand-ins for the debugger and emulator console when exercising the
//! pipeline against canned transcripts. A peer writes an optional greeting,
//! then answers each line it receives with the reply of the first rule whose
//! command is a prefix of that line. Lines without a rule get the fallback
//! reply, or silence if none is set.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::channel::TranscriptChannel;
use crate::transcript::Transcript;

/// Command recorded when the peer receives a raw `^C` byte
pub const INTERRUPT: &str = "^C";

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct Rule {
    command: String,
    reply: String,
    delay: Option<Duration>,
    hang_up: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    greeting: Option<String>,
    rules: Vec<Rule>,
    fallback: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output written as soon as the peer starts
    pub fn greeting(mut self, text: impl Into<String>) -> Self {
        self.greeting = Some(text.into());
        self
    }

    /// Reply to any line starting with `command`
    pub fn on(mut self, command: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push(Rule {
            command: command.into(),
            reply: reply.into(),
            delay: None,
            hang_up: false,
        });
        self
    }

    /// Reply to `command`, then close the peer's side of the pipe
    pub fn on_then_hang_up(
        mut self,
        command: impl Into<String>,
        reply: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            command: command.into(),
            reply: reply.into(),
            delay: None,
            hang_up: true,
        });
        self
    }

    /// Like `on`, but the reply is written after `delay`
    pub fn on_delayed(
        mut self,
        command: impl Into<String>,
        delay: Duration,
        reply: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            command: command.into(),
            reply: reply.into(),
            delay: Some(delay),
            hang_up: false,
        });
        self
    }

    /// Reply for lines no rule covers
    pub fn fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    fn reply_for(&self, line: &str) -> Option<(&str, Option<Duration>, bool)> {
        self.rules
            .iter()
            .find(|rule| line.starts_with(rule.command.as_str()))
            .map(|rule| (rule.reply.as_str(), rule.delay, rule.hang_up))
            .or_else(|| self.fallback.as_deref().map(|reply| (reply, None, false)))
    }
}

/// Handle to a running scripted peer
pub struct ScriptedPeer {
    received: Arc<Mutex<Vec<String>>>,
    stopped: AtomicBool,
    task: JoinHandle<()>,
}

impl ScriptedPeer {
    /// Every line the peer has received so far
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn has_received(&self, prefix: &str) -> bool {
        self.received.lock().iter().any(|line| line.starts_with(prefix))
    }

    /// Shared view of received lines that outlives the peer
    pub fn received_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.received)
    }

    /// Stop the peer; its side of the pipe closes
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

impl Drop for ScriptedPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Build a channel wired to a scripted peer
pub fn channel(
    name: impl Into<String>,
    script: Script,
    transcript: Transcript,
) -> (TranscriptChannel, ScriptedPeer) {
    let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
    let (read_half, write_half) = tokio::io::split(ours);
    let channel = TranscriptChannel::spawn(
        name,
        Box::new(write_half),
        vec![Box::new(read_half)],
        transcript,
    );

    let received = Arc::new(Mutex::new(Vec::new()));
    let task = tokio::spawn(serve(theirs, script, Arc::clone(&received)));

    (
        channel,
        ScriptedPeer {
            received,
            stopped: AtomicBool::new(false),
            task,
        },
    )
}

async fn serve(stream: DuplexStream, script: Script, received: Arc<Mutex<Vec<String>>>) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    if let Some(greeting) = &script.greeting {
        if writer.write_all(greeting.as_bytes()).await.is_err() {
            return;
        }
    }

    let mut pending = String::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.push_str(&String::from_utf8_lossy(&buf[..n]));

        while let Some(pos) = pending.find(['\n', '\u{3}']) {
            let raw: String = pending.drain(..=pos).collect();
            let line = if raw.ends_with('\u{3}') {
                INTERRUPT.to_string()
            } else {
                raw.trim_end().to_string()
            };
            received.lock().push(line.clone());

            if let Some((reply, delay, hang_up)) = script.reply_for(&line) {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if writer.write_all(reply.as_bytes()).await.is_err() || hang_up {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pattern;

    #[tokio::test]
    async fn test_scripted_replies() {
        let script = Script::new()
            .greeting("(gdb) ")
            .on("info symbol 0x10", "main + 4 in section .text\n(gdb) ")
            .fallback("(gdb) ");
        let (mut channel, peer) = channel("gdb", script, Transcript::new());
        let prompt = Pattern::literal("(gdb) ");
        let t = Duration::from_secs(1);

        channel.expect_one(&prompt, t).await.unwrap();
        channel.send("info symbol 0x10").await.unwrap();
        let m = channel.expect_one(&prompt, t).await.unwrap();
        assert_eq!(m.before, "main + 4 in section .text\n");

        channel.send("set height 0").await.unwrap();
        let m = channel.expect_one(&prompt, t).await.unwrap();
        assert_eq!(m.before, "");

        assert_eq!(peer.received(), vec!["info symbol 0x10", "set height 0"]);
    }

    #[tokio::test]
    async fn test_unscripted_line_is_silent() {
        let (mut channel, peer) = channel("gdb", Script::new(), Transcript::new());
        channel.send("break vectors.S:56").await.unwrap();
        let err = channel
            .expect_one(&Pattern::literal("(gdb) "), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(peer.has_received("break"));
    }

    #[tokio::test]
    async fn test_interrupt_byte() {
        let script = Script::new().on(INTERRUPT, "Program received signal SIGINT, Interrupt.\n(gdb) ");
        let (mut channel, _peer) = channel("gdb", script, Transcript::new());
        channel.interrupt().await.unwrap();
        let m = channel
            .expect_one(&Pattern::literal("(gdb) "), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(m.before.contains("SIGINT"));
    }

    #[tokio::test]
    async fn test_hang_up_after_reply() {
        let script = Script::new()
            .greeting("(gdb) ")
            .on_then_hang_up("continue", "Continuing.\n");
        let (mut channel, peer) = channel("gdb", script, Transcript::new());
        let t = Duration::from_secs(1);
        channel.expect_one(&Pattern::literal("(gdb) "), t).await.unwrap();
        channel.send("continue").await.unwrap();
        let err = channel
            .expect_one(&Pattern::literal("(gdb) "), t)
            .await
            .unwrap_err();
        assert!(err.is_closed());
        assert!(!peer.is_running());
    }

    #[tokio::test]
    async fn test_stopped_peer_closes_channel() {
        let (mut channel, peer) = channel("qemu", Script::new(), Transcript::new());
        peer.stop();
        let err = channel
            .expect_one(&Pattern::literal("$ "), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }
}
