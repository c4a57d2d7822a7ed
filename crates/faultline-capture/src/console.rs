//! Debugger command console

use std::time::Duration;

use faultline_channel::{Pattern, Result, TranscriptChannel};

/// The debugger's prompt; it is not newline-terminated
pub const PROMPT: &str = "(gdb) ";

/// Request/response view of the debugger channel: one command, its output
/// up to the next prompt.
pub struct DebuggerConsole<'a> {
    channel: &'a mut TranscriptChannel,
    prompt: Pattern,
}

impl<'a> DebuggerConsole<'a> {
    pub fn new(channel: &'a mut TranscriptChannel) -> Self {
        Self {
            channel,
            prompt: Pattern::literal(PROMPT),
        }
    }

    pub fn channel(&mut self) -> &mut TranscriptChannel {
        self.channel
    }

    pub fn prompt(&self) -> &Pattern {
        &self.prompt
    }

    /// Output up to the next prompt
    pub async fn wait_for_prompt(&mut self, timeout: Duration) -> Result<String> {
        let found = self.channel.expect_one(&self.prompt, timeout).await?;
        Ok(found.before)
    }

    /// Run one command and return its output without the echo or prompt
    pub async fn command(&mut self, command: &str, timeout: Duration) -> Result<String> {
        self.channel.send(command).await?;
        let output = self.wait_for_prompt(timeout).await?;
        Ok(strip_echo(&output, command))
    }

    /// Interrupt a running target and wait for the debugger to come back
    pub async fn halt(&mut self, timeout: Duration) -> Result<String> {
        tracing::debug!(channel = %self.channel.name(), "Interrupting target");
        self.channel.interrupt().await?;
        self.wait_for_prompt(timeout).await
    }
}

fn strip_echo(output: &str, command: &str) -> String {
    let trimmed = output.trim_start_matches('\n');
    match trimmed.split_once('\n') {
        Some((first, rest)) if first.trim() == command.trim() => rest.to_string(),
        None if trimmed.trim() == command.trim() => String::new(),
        _ => output.to_string(),
    }
}
