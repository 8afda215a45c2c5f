//! Outbound rate gate
//!
//! A leaky bucket per remote action. Every call waits for its action's next
//! free slot before it is sent; the wait is plain latency, never an error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Requests-per-second limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Limit for actions without an override; 0 disables gating
    #[serde(default = "default_per_second")]
    pub per_second: u32,

    /// Per-action limits, e.g. `CreateDisks: 5`
    #[serde(default)]
    pub actions: HashMap<String, u32>,
}

fn default_per_second() -> u32 {
    20
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            actions: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn unlimited() -> Self {
        Self {
            per_second: 0,
            actions: HashMap::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>, per_second: u32) -> Self {
        self.actions.insert(action.into(), per_second);
        self
    }

    fn rate_for(&self, action: &str) -> u32 {
        self.actions.get(action).copied().unwrap_or(self.per_second)
    }
}

/// Per-action leaky bucket shared by every call made through one context
#[derive(Debug)]
pub struct RateGate {
    config: RateLimitConfig,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateGate {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(RateLimitConfig::unlimited())
    }

    /// Reserve the next slot for `action` and return how long the caller must wait
    fn reserve(&self, action: &str) -> Duration {
        let rate = self.config.rate_for(action);
        if rate == 0 {
            return Duration::ZERO;
        }
        let interval = Duration::from_secs(1) / rate;
        let now = Instant::now();

        let mut slots = self
            .next_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = slots.entry(action.to_string()).or_insert(now);
        let at = (*slot).max(now);
        *slot = at + interval;
        at - now
    }

    /// Wait until `action` may be sent.
    pub async fn acquire(&self, action: &str) {
        let wait = self.reserve(action);
        if !wait.is_zero() {
            debug!(action, wait_ms = wait.as_millis() as u64, "Rate gate delaying call");
            sleep(wait).await;
        }
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced() {
        let gate = RateGate::new(RateLimitConfig::default().with_action("CreateDisks", 2));
        let start = Instant::now();

        for _ in 0..3 {
            gate.acquire("CreateDisks").await;
        }

        // slots at 0ms, 500ms, 1000ms
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_have_independent_buckets() {
        let gate = RateGate::new(RateLimitConfig {
            per_second: 1,
            actions: HashMap::new(),
        });
        let start = Instant::now();

        gate.acquire("DescribeDisks").await;
        gate.acquire("DescribeSnapshots").await;

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_waits() {
        let gate = RateGate::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            gate.acquire("DescribeDisks").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
