//! Retrying slide reads with capped exponential backoff.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info};
use wsi_core::{Error, Result, RetryConfig};

/// Blocks the calling thread between attempts
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeper backed by [`std::thread::sleep`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How many times a failing read is retried and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` never gives up
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Unbounded retries with a constant delay
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_backoff: delay,
            multiplier: 1.0,
            max_backoff: delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_nan() {
            self.max_backoff
        } else {
            seconds(capped)
        }
    }

    fn allows_another(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_made < max,
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: (config.max_attempts > 0).then_some(config.max_attempts),
            initial_backoff: seconds(config.initial_backoff_secs),
            multiplier: config.multiplier,
            max_backoff: seconds(config.max_backoff_secs),
        }
    }
}

/// Saturating conversion; negative and NaN become zero
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// Runs `load` until it succeeds or the policy is exhausted.
///
/// Every failure is logged with the slide path and attempt number. Only
/// exhaustion is returned, as [`Error::RetriesExhausted`].
pub fn load_with_retry<T, F>(
    policy: &RetryPolicy,
    sleeper: &mut dyn Sleeper,
    index: usize,
    path: &Path,
    mut load: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        match load() {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        "Loaded dataset index {} ({}) on attempt {}",
                        index,
                        path.display(),
                        attempt
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !policy.allows_another(attempt) {
                    error!(
                        "Giving up on {} after {} attempts: {}",
                        path.display(),
                        attempt,
                        err
                    );
                    return Err(Error::RetriesExhausted {
                        index,
                        path: path.to_path_buf(),
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }

                let delay = policy.backoff(attempt);
                error!(
                    "Error loading dataset index {} ({}), attempt {}: {}. Retrying in {:.1}s",
                    index,
                    path.display(),
                    attempt,
                    err,
                    delay.as_secs_f64()
                );
                sleeper.sleep(delay);
            }
        }
    }
}
