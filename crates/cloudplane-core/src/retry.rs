//! Request-level retry with exponential backoff
//!
//! A [`RetryBudget`] is bound to a call site. Reads get a short budget,
//! provisioning actions (disk creation, snapshot rollback) a long one.

use crate::classify::{ErrorVerdict, classify};
use crate::error::{CloudError, Result};
use crate::poll::PollSpec;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Retry budget for one class of calls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Total time the retry loop may spend, backoff included
    #[serde(with = "duration_secs")]
    pub max_elapsed: Duration,

    /// Delay after the first failed attempt
    #[serde(with = "duration_secs")]
    pub initial_backoff: Duration,

    /// Cap for the exponential growth
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,

    pub multiplier: f64,
}

impl RetryBudget {
    /// Short budget for describe/read calls
    pub fn read() -> Self {
        Self {
            max_elapsed: Duration::from_secs(60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// Budget for ordinary mutating calls
    pub fn write() -> Self {
        Self {
            max_elapsed: Duration::from_secs(180),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    /// Budget for multi-minute provisioning calls
    pub fn provisioning() -> Self {
        Self {
            max_elapsed: Duration::from_secs(600),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Backoff before retry number `attempt` (0-based), capped at `max_backoff`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::try_from_secs_f64(delay)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Backoff must be positive and must not shrink between attempts.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be at least 1, got {}", self.multiplier));
        }
        if self.initial_backoff.is_zero() {
            return Err("initial_backoff must be positive".into());
        }
        if self.max_backoff < self.initial_backoff {
            return Err("max_backoff must not be below initial_backoff".into());
        }
        Ok(())
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::write()
    }
}

/// Retry budgets and poll deadlines for each operation class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budgets {
    pub read: RetryBudget,
    pub write: RetryBudget,
    pub provisioning: RetryBudget,
    /// Waits for metadata changes
    pub short_poll: PollSpec,
    /// Waits for ordinary state transitions
    pub poll: PollSpec,
    /// Waits for creation, resize and rollback
    pub provisioning_poll: PollSpec,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            read: RetryBudget::read(),
            write: RetryBudget::write(),
            provisioning: RetryBudget::provisioning(),
            short_poll: PollSpec::short(),
            poll: PollSpec::standard(),
            provisioning_poll: PollSpec::provisioning(),
        }
    }
}

impl Budgets {
    /// Check every budget, naming the offending one.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let retries = [
            ("read", &self.read),
            ("write", &self.write),
            ("provisioning", &self.provisioning),
        ];
        for (name, budget) in retries {
            budget.validate().map_err(|e| format!("budgets.{name}: {e}"))?;
        }

        let polls = [
            ("short_poll", &self.short_poll),
            ("poll", &self.poll),
            ("provisioning_poll", &self.provisioning_poll),
        ];
        for (name, spec) in polls {
            if spec.interval.is_zero() {
                return Err(format!("budgets.{name}: interval must be positive"));
            }
        }
        Ok(())
    }
}

/// Run `op` until it succeeds, fails non-retryably, or the budget is spent.
///
/// Fatal and NotFound errors come back verbatim. When the budget runs out
/// the last retryable error is wrapped in [`CloudError::RetriesExhausted`].
pub async fn retry<T, F, Fut>(label: &str, budget: &RetryBudget, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if classify(&err) != ErrorVerdict::Retryable {
            return Err(err);
        }

        let delay = budget.delay_for_attempt(attempt);
        attempt += 1;
        if start.elapsed() + delay > budget.max_elapsed {
            warn!(operation = %label, attempts = attempt, error = %err, "Retry budget exhausted");
            return Err(CloudError::RetriesExhausted {
                operation: label.to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }

        debug!(
            operation = %label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retryable error, backing off"
        );
        sleep(delay).await;
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
