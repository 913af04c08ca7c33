//! Async poll-until-true helper
//!
//! The cluster backend uses this to wait for deletions requested during a
//! reset to actually finish before the next test starts.
//!
//! # Example
//!
//! ```ignore
//! use gitops_e2e::eventually::eventually;
//! use std::time::Duration;
//!
//! eventually(|| async { applications_left().await == 0 })
//!     .timeout(Duration::from_secs(60))
//!     .interval(Duration::from_millis(500))
//!     .await_condition()
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Error type for eventually checks
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("{what}: condition not met after {attempts} attempts over {elapsed:?}")]
    EventuallyFailed {
        what: String,
        attempts: u32,
        elapsed: Duration,
    },
}

/// Builder for eventually checks
pub struct Eventually<F, Fut>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    condition: F,
    what: String,
    timeout: Duration,
    interval: Duration,
}

/// Create an eventually check that retries until condition is true
///
/// Default timeout: 30 seconds
/// Default interval: 250ms
pub fn eventually<F, Fut>(condition: F) -> Eventually<F, Fut>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    Eventually {
        condition,
        what: "condition".to_string(),
        timeout: Duration::from_secs(30),
        interval: Duration::from_millis(250),
    }
}

impl<F, Fut> Eventually<F, Fut>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    /// Describe what is being waited for (used in the error)
    pub fn describe(mut self, what: impl Into<String>) -> Self {
        self.what = what.into();
        self
    }

    /// Set the timeout duration
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the polling interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the check, retrying until success or timeout
    pub async fn await_condition(self) -> Result<(), ConditionError> {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            if (self.condition)().await {
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(ConditionError::EventuallyFailed {
                    what: self.what,
                    attempts,
                    elapsed,
                });
            }

            sleep(self.interval).await;
        }
    }
}
