//! Debug-stub port probing

use std::net::TcpListener;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::LaunchFailure;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// True when nothing is listening on the loopback port
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

pub(crate) async fn wait_until_free(port: u16, timeout: Duration) -> Result<(), LaunchFailure> {
    let deadline = Instant::now() + timeout;
    loop {
        if is_port_free(port) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(LaunchFailure::PortBusy { port });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Wait until a listener owns `port`. Bind probing leaves the stub untouched,
/// unlike a connect which would attach to it.
pub(crate) async fn wait_until_listening<F>(
    port: u16,
    timeout: Duration,
    mut still_alive: F,
) -> Result<(), LaunchFailure>
where
    F: FnMut() -> Result<(), LaunchFailure>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if !is_port_free(port) {
            return Ok(());
        }
        still_alive()?;
        if Instant::now() >= deadline {
            return Err(LaunchFailure::StubUnavailable {
                port,
                waited: timeout,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
