//! Capped exponential backoff for transient control-plane failures

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::control_plane::ControlPlaneError;

/// Retry configuration for control-plane calls.
///
/// Only [`ControlPlaneError::Transient`] failures are retried; everything
/// else escalates immediately. Exhausting the attempt budget escalates the
/// last transient error to fatal for that step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, first call included
    pub max_attempts: usize,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt
    pub backoff_multiplier: f64,
    /// Add jitter to avoid thundering-herd retries
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for tests.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Run an operation under this policy.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, ControlPlaneError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ControlPlaneError>>,
    {
        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) if !error.is_transient() => return Err(error),
                Err(error) => {
                    if attempt >= self.max_attempts {
                        warn!(attempt, %error, "retry budget exhausted, escalating");
                        return Err(error);
                    }

                    let actual_delay = if self.jitter {
                        let jitter_ms =
                            (delay.as_millis() as f64 * rand::random::<f64>() * 0.1) as u64;
                        delay + Duration::from_millis(jitter_ms)
                    } else {
                        delay
                    };
                    warn!(attempt, %error, ?actual_delay, "transient failure, retrying");
                    tokio::time::sleep(actual_delay).await;

                    delay = Duration::from_millis(
                        (delay.as_millis() as f64 * self.backoff_multiplier) as u64,
                    )
                    .min(self.max_delay);
                }
            }
        }
    }
}
