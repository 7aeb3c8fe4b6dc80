//! Timeout-bounded polling

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Phase};
use crate::Result;

/// Result type for polling check functions.
///
/// - `Ok(Some(value))` - Condition met, return the value
/// - `Ok(None)` - Condition not met yet, keep polling
/// - `Err(e)` - Fatal error, stop polling immediately
pub type PollResult<T> = std::result::Result<Option<T>, String>;

/// Poll `check_fn` every `interval` until it yields a value, fails, or
/// `timeout` elapses.
///
/// Timeouts and fatal check errors are reported as errors of `phase`.
pub async fn wait_with_timeout<T, F, Fut>(
    phase: Phase,
    timeout: Duration,
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    let start = Instant::now();

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    return Err(Error::in_phase(
                        phase,
                        format!("timeout after {:?} waiting for {}", timeout, description),
                        None,
                    ));
                }
                debug!("Waiting for {}...", description);
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                return Err(Error::in_phase(
                    phase,
                    format!("error waiting for {}: {}", description, e),
                    None,
                ));
            }
        }
    }
}
