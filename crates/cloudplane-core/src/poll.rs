//! Bounded polling until a remote object converges
//!
//! [`poll`] re-fetches an object on a fixed interval and hands every
//! observation to a predicate supplied by the call site. It returns when the
//! predicate is satisfied, when it aborts, when a fatal error is observed, or
//! when the deadline passes. It never sleeps past the deadline, so the total
//! wait is bounded by `deadline` plus the duration of the last fetch.

use crate::classify::{ErrorVerdict, classify};
use crate::error::{CloudError, Result};
use crate::retry::duration_secs;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Predicate verdict for one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// Not there yet, keep polling
    Continue,
    /// Terminal success
    Done,
    /// Terminal failure; stop without further retries
    Abort(String),
}

/// Deadline and interval for one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    #[serde(with = "duration_secs")]
    pub deadline: Duration,

    #[serde(with = "duration_secs", default = "default_interval")]
    pub interval: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

impl PollSpec {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            interval: default_interval(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Metadata changes that settle within seconds
    pub fn short() -> Self {
        Self::new(Duration::from_secs(60))
    }

    /// Ordinary state transitions
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(180))
    }

    /// Disk creation, resize, snapshot rollback and similar
    pub fn provisioning() -> Self {
        Self::new(Duration::from_secs(1200))
    }
}

impl Default for PollSpec {
    fn default() -> Self {
        Self::standard()
    }
}

/// Poll `fetch` until `predicate` says `Done` and return the last observation.
///
/// `fetch` returns `Ok(None)` when the object is absent. Errors classified as
/// NotFound are also presented to the predicate as absence, retryable errors
/// are skipped, and fatal errors end the poll immediately.
pub async fn poll<T, F, Fut, P>(
    label: &str,
    spec: &PollSpec,
    mut fetch: F,
    mut predicate: P,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
    P: FnMut(Option<&T>) -> Convergence,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let observation = match fetch().await {
            Ok(observed) => Some(observed),
            Err(err) => match classify(&err) {
                ErrorVerdict::NotFound => Some(None),
                ErrorVerdict::Retryable => {
                    warn!(operation = %label, attempt = attempts, error = %err, "Poll fetch failed, retrying");
                    None
                }
                ErrorVerdict::Fatal => return Err(err),
            },
        };

        if let Some(observed) = observation {
            match predicate(observed.as_ref()) {
                Convergence::Done => {
                    debug!(operation = %label, attempts, "Converged");
                    return Ok(observed);
                }
                Convergence::Abort(reason) => {
                    return Err(CloudError::Aborted {
                        operation: label.to_string(),
                        reason,
                    });
                }
                Convergence::Continue => {}
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= spec.deadline {
            warn!(operation = %label, attempts, "Poll deadline exceeded");
            return Err(CloudError::DeadlineExceeded {
                operation: label.to_string(),
                waited: elapsed,
            });
        }

        debug!(operation = %label, attempt = attempts, "Not converged yet");
        sleep(spec.interval.min(spec.deadline - elapsed)).await;
    }
}

/// Generic lifecycle phase every object kind maps its status onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Absent,
    Creating,
    Active,
    Mutating,
    Deleting,
    /// Left the active state but not purged yet (recycle bin)
    SoftDeleted,
    /// Known-bad terminal status
    Failed,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Absent => write!(f, "absent"),
            LifecyclePhase::Creating => write!(f, "creating"),
            LifecyclePhase::Active => write!(f, "active"),
            LifecyclePhase::Mutating => write!(f, "mutating"),
            LifecyclePhase::Deleting => write!(f, "deleting"),
            LifecyclePhase::SoftDeleted => write!(f, "soft-deleted"),
            LifecyclePhase::Failed => write!(f, "failed"),
        }
    }
}

/// Wait until the object is visible and active.
///
/// Absence keeps polling: a freshly created object may not be listed yet.
pub fn until_active<T>(
    phase: impl Fn(&T) -> LifecyclePhase,
) -> impl FnMut(Option<&T>) -> Convergence {
    move |observed| match observed.map(&phase) {
        Some(LifecyclePhase::Active) => Convergence::Done,
        Some(LifecyclePhase::Failed) => Convergence::Abort("object entered a failed state".into()),
        Some(LifecyclePhase::Absent) | Some(LifecyclePhase::SoftDeleted) => {
            Convergence::Abort("object disappeared while waiting for it to become active".into())
        }
        _ => Convergence::Continue,
    }
}

/// Wait until the object is visible, whatever its phase.
pub fn until_exists<T>() -> impl FnMut(Option<&T>) -> Convergence {
    |observed| {
        if observed.is_some() {
            Convergence::Done
        } else {
            Convergence::Continue
        }
    }
}

/// Wait until the object is gone, or soft-deleted when `accept_soft_deleted`.
pub fn until_gone<T>(
    accept_soft_deleted: bool,
    phase: impl Fn(&T) -> LifecyclePhase,
) -> impl FnMut(Option<&T>) -> Convergence {
    move |observed| match observed.map(&phase) {
        None | Some(LifecyclePhase::Absent) => Convergence::Done,
        Some(LifecyclePhase::SoftDeleted) if accept_soft_deleted => Convergence::Done,
        Some(LifecyclePhase::Failed) => Convergence::Abort("object entered a failed state while deleting".into()),
        _ => Convergence::Continue,
    }
}
