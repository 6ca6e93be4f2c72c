//! Bounded polling for exportable clips.
//!
//! The waiter never returns later than its deadline: every fetch races the
//! remaining time, and every pause is capped by it.

use std::time::Duration;

use tracing::{debug, info, warn};
use vodcut_models::ClipRef;

use crate::clock::Clock;
use crate::error::{ClipServiceError, ClipServiceResult};
use crate::service::ClipService;

/// Hard ceiling on how long clips are waited for.
pub const MAX_WAIT: Duration = Duration::from_secs(300);

const INITIAL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Clip waiter settings.
#[derive(Debug, Clone)]
pub struct WaiterConfig {
    /// Deadline, clamped to [`MAX_WAIT`]
    pub timeout: Duration,
    /// Pause between polls that returned nothing
    pub poll_interval: Duration,
    /// Consecutive transient failures tolerated before giving up
    pub max_consecutive_errors: u32,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            timeout: MAX_WAIT,
            poll_interval: Duration::from_secs(15),
            max_consecutive_errors: 5,
        }
    }
}

impl WaiterConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ClipServiceResult<Self> {
        let defaults = Self::default();
        let number = |name: &str, default: u64| -> ClipServiceResult<u64> {
            match std::env::var(name) {
                Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(|_| {
                    ClipServiceError::Config(format!("{} is not a number: {}", name, v))
                }),
                _ => Ok(default),
            }
        };

        let poll_interval = number("OPUS_POLL_INTERVAL_SEC", defaults.poll_interval.as_secs())?;
        if poll_interval == 0 {
            return Err(ClipServiceError::Config(
                "OPUS_POLL_INTERVAL_SEC must be positive".to_string(),
            ));
        }

        let max_errors = number(
            "OPUS_MAX_POLL_ERRORS",
            u64::from(defaults.max_consecutive_errors),
        )?;
        let max_consecutive_errors = u32::try_from(max_errors).map_err(|_| {
            ClipServiceError::Config(format!("OPUS_MAX_POLL_ERRORS is too large: {}", max_errors))
        })?;

        Ok(Self {
            timeout: Duration::from_secs(number("OPUS_WAIT_TIMEOUT_SEC", MAX_WAIT.as_secs())?),
            poll_interval: Duration::from_secs(poll_interval),
            max_consecutive_errors,
        })
    }

    /// Effective deadline.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.min(MAX_WAIT)
    }
}

/// Polls a [`ClipService`] until clips appear or the deadline passes.
pub struct ClipWaiter<C: Clock> {
    config: WaiterConfig,
    clock: C,
}

enum PollOutcome {
    Fetched(ClipServiceResult<Vec<ClipRef>>),
    DeadlineReached,
}

impl<C: Clock> ClipWaiter<C> {
    pub fn new(config: WaiterConfig, clock: C) -> Self {
        if config.timeout > MAX_WAIT {
            warn!(
                "Clip wait timeout {:?} exceeds ceiling, using {:?}",
                config.timeout, MAX_WAIT
            );
        }
        Self { config, clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Wait for a non-empty clip list.
    ///
    /// Empty responses are re-polled every `poll_interval`. Throttling,
    /// server errors and network failures back off exponentially and are
    /// tolerated up to `max_consecutive_errors` in a row; any other failure
    /// aborts immediately.
    pub async fn wait_for_clips(
        &self,
        service: &dyn ClipService,
        project_id: &str,
    ) -> ClipServiceResult<Vec<ClipRef>> {
        let timeout = self.config.effective_timeout();
        let started = self.clock.now();
        let deadline = started + timeout;

        let mut polls: u32 = 0;
        let mut consecutive_errors: u32 = 0;
        let mut error_backoff = INITIAL_ERROR_BACKOFF;

        let timed_out = |polls: u32| ClipServiceError::ClipTimeout {
            waited_secs: self.clock.now().saturating_duration_since(started).as_secs(),
            polls,
        };

        loop {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return Err(timed_out(polls));
            }

            polls += 1;
            let outcome = tokio::select! {
                biased;
                result = service.fetch_clips(project_id) => PollOutcome::Fetched(result),
                _ = self.clock.sleep(remaining) => PollOutcome::DeadlineReached,
            };

            let pause = match outcome {
                PollOutcome::DeadlineReached => return Err(timed_out(polls)),
                PollOutcome::Fetched(Ok(clips)) if !clips.is_empty() => {
                    info!(
                        project_id = %project_id,
                        "Clip service returned {} clip(s) on poll #{}",
                        clips.len(),
                        polls
                    );
                    return Ok(clips);
                }
                PollOutcome::Fetched(Ok(_)) => {
                    consecutive_errors = 0;
                    error_backoff = INITIAL_ERROR_BACKOFF;
                    debug!(
                        project_id = %project_id,
                        "Clips not ready yet (poll #{}, {}s left)",
                        polls,
                        remaining.as_secs()
                    );
                    self.config.poll_interval
                }
                PollOutcome::Fetched(Err(e)) if e.is_retryable() => {
                    consecutive_errors += 1;
                    if consecutive_errors > self.config.max_consecutive_errors {
                        warn!(
                            project_id = %project_id,
                            "Giving up after {} consecutive poll failures",
                            consecutive_errors
                        );
                        return Err(e);
                    }
                    let pause = error_backoff.min(self.config.poll_interval);
                    warn!(
                        project_id = %project_id,
                        error = %e,
                        "Poll #{} failed ({} in a row), retrying in {:?}",
                        polls,
                        consecutive_errors,
                        pause
                    );
                    error_backoff = error_backoff.saturating_mul(2);
                    pause
                }
                PollOutcome::Fetched(Err(e)) => return Err(e),
            };

            let remaining = deadline.saturating_duration_since(self.clock.now());
            self.clock.sleep(pause.min(remaining)).await;
        }
    }
}
