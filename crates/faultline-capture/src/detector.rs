//! Fault detection

use std::time::Duration;

use faultline_channel::{ChannelError, Pattern, TranscriptChannel};
use faultline_snapshot::{FaultEvent, StopLocation};

use crate::breakpoint::ArmedBreakpoint;
use crate::console::DebuggerConsole;
use crate::error::CaptureError;
use crate::parse;
use crate::Result;

/// Classify a chunk of debugger or console output. The earliest banner in
/// the text wins, wherever it sits among boot and log noise.
pub fn classify(text: &str) -> Option<FaultEvent> {
    let mut found: Vec<(usize, FaultEvent)> = Vec::new();

    if let Some(start) = parse::stop_location_at(text) {
        if let Ok((breakpoint, location)) = parse::stop_location(&text[start..]) {
            found.push((
                start,
                FaultEvent::BreakpointHit {
                    breakpoint,
                    location,
                    trap: None,
                },
            ));
        }
    }
    if let Some(start) = parse::kernel_panic_at(text) {
        if let Ok(reason) = parse::kernel_panic(&text[start..]) {
            found.push((start, FaultEvent::KernelPanic { reason }));
        }
    }
    if let Some(start) = parse::crash_report_at(text) {
        if let Ok(report) = parse::crash_report(&text[start..]) {
            found.push((start, FaultEvent::UserFault(report)));
        }
    }

    found
        .into_iter()
        .min_by_key(|(start, _)| *start)
        .map(|(_, event)| event)
}

pub struct FaultDetector {
    breakpoint_patterns: Vec<Pattern>,
    banner_patterns: Vec<Pattern>,
    armed: Vec<ArmedBreakpoint>,
    prompt_timeout: Duration,
}

impl FaultDetector {
    pub fn new(armed: Vec<ArmedBreakpoint>, prompt_timeout: Duration) -> Result<Self> {
        let breakpoint_patterns = armed
            .iter()
            .map(|b| b.hit_pattern())
            .collect::<std::result::Result<Vec<_>, ChannelError>>()?;
        let banner_patterns = vec![
            Pattern::regex(parse::CRASH_REPORT_PATTERN)?,
            Pattern::regex(parse::PANIC_PATTERN)?,
        ];
        Ok(Self {
            breakpoint_patterns,
            banner_patterns,
            armed,
            prompt_timeout,
        })
    }

    /// Watch the debugger and console together until a fault shows up.
    ///
    /// A breakpoint hit leaves the debugger at its prompt; console banners
    /// leave the target running.
    pub async fn wait_for_fault(
        &self,
        gdb: &mut TranscriptChannel,
        console: &mut TranscriptChannel,
        timeout: Duration,
    ) -> Result<FaultEvent> {
        tracing::info!(
            breakpoints = self.armed.len(),
            timeout = ?timeout,
            "Waiting for fault"
        );

        let watch_gdb = async {
            if self.breakpoint_patterns.is_empty() {
                // nothing armed: only the console can report a fault
                std::future::pending::<()>().await;
            }
            gdb.expect(&self.breakpoint_patterns, timeout).await
        };

        let outcome = tokio::select! {
            hit = watch_gdb => Observed::Debugger(hit),
            banner = console.expect(&self.banner_patterns, timeout) => Observed::Console(banner),
            _ = tokio::time::sleep(timeout) => Observed::Nothing,
        };

        let event = match outcome {
            Observed::Debugger(hit) => {
                let hit = hit.map_err(|e| no_fault(e, timeout))?;
                let armed = &self.armed[hit.index];
                // the stop line continues past the hit pattern up to the prompt
                let rest = DebuggerConsole::new(gdb)
                    .wait_for_prompt(self.prompt_timeout)
                    .await?;
                let report = format!("{}{}", hit.matched, rest);
                let location = match parse::stop_location(&report) {
                    Ok((_, location)) => location,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not parse stop location");
                        StopLocation::default()
                    }
                };
                FaultEvent::BreakpointHit {
                    breakpoint: armed.number,
                    location,
                    trap: armed.spec.trap,
                }
            }
            Observed::Console(banner) => {
                let banner = banner.map_err(|e| no_fault(e, timeout))?;
                classify(&banner.matched).ok_or_else(|| CaptureError::NoFaultObserved {
                    waited: timeout,
                })?
            }
            Observed::Nothing => return Err(CaptureError::NoFaultObserved { waited: timeout }),
        };

        tracing::info!(event = %event, "Fault observed");
        Ok(event)
    }
}

enum Observed {
    Debugger(faultline_channel::Result<faultline_channel::Match>),
    Console(faultline_channel::Result<faultline_channel::Match>),
    Nothing,
}

fn no_fault(error: ChannelError, waited: Duration) -> CaptureError {
    if error.is_timeout() {
        CaptureError::NoFaultObserved { waited }
    } else {
        CaptureError::Channel(error)
    }
}
