//! Two-tier reconnection backoff shared by sensor and actuator links.
//!
//! Up to `fast_retry_attempts` attempts are spaced `retry_interval` apart.
//! After that, attempts continue every `retry_sleep` until they succeed or
//! shutdown is requested.

use crate::config::DeviceClassConfig;
use crate::core::shutdown::ShutdownSignal;
use crate::error::ConnectionError;
use crate::transparency::SharedLogger;
use std::time::Duration;

/// Tracks consecutive failures and yields the delay before the next attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    fast_attempts: u32,
    retry_interval: Duration,
    retry_sleep: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &DeviceClassConfig) -> Self {
        Self {
            fast_attempts: config.fast_retry_attempts,
            retry_interval: config.retry_interval,
            retry_sleep: config.retry_sleep,
            failures: 0,
        }
    }

    /// Record a failed attempt and return how long to wait before the next.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        if self.failures < self.fast_attempts {
            self.retry_interval
        } else {
            self.retry_sleep
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the next attempt still belongs to the fast tier.
    pub fn in_fast_phase(&self) -> bool {
        self.failures < self.fast_attempts
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Run `attempt` until it succeeds, following the two-tier schedule.
///
/// Returns `false` if shutdown was requested before a connection was made.
/// Every failure and tier change is written to the system log.
pub fn connect_with_backoff<F>(
    device: &str,
    config: &DeviceClassConfig,
    shutdown: &ShutdownSignal,
    logger: &SharedLogger,
    mut attempt: F,
) -> bool
where
    F: FnMut() -> Result<(), ConnectionError>,
{
    let mut backoff = Backoff::new(config);

    loop {
        if shutdown.is_triggered() {
            return false;
        }

        match attempt() {
            Ok(()) => {
                if backoff.failures() > 0 {
                    logger.info(&format!(
                        "[{device}] Connected after {} failed attempt(s)",
                        backoff.failures()
                    ));
                } else {
                    logger.info(&format!("[{device}] Connected"));
                }
                return true;
            }
            Err(e) => {
                let was_fast = backoff.in_fast_phase();
                let delay = backoff.record_failure();

                if was_fast {
                    logger.error(&format!(
                        "[{device}] Retry {}/{} failed: {e}",
                        backoff.failures(),
                        config.fast_retry_attempts
                    ));
                    if !backoff.in_fast_phase() {
                        logger.warn(&format!(
                            "[{device}] All fast retries failed. Sleeping for {}s before retrying.",
                            delay.as_secs_f64()
                        ));
                    }
                } else {
                    logger.warn(&format!("[{device}] Slow retry failed: {e}"));
                }

                if shutdown.wait_timeout(delay) {
                    return false;
                }
            }
        }
    }
}
