//! Cloudplane reconciliation engine
//!
//! This crate drives remote cloud objects from their observed state toward a
//! declared desired state. Object kinds plug in through [`Lifecycle`]; the
//! engine supplies error classification, bounded polling, ordered step plans
//! and the Create / Read / Update / Delete flows on top of them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 cloudplane CLI                   │
//! │        (create / read / update / delete)         │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                cloudplane-core                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Reconciler<L: Lifecycle>                 │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────────┐     │
//! │  │ StepPlan │ │  poll()  │ │  classify()  │     │
//! │  └──────────┘ └──────────┘ └──────────────┘     │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Context { RemoteClient, RateGate }       │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼────────────────┐
//! │  cloudplane-provider   │
//! │  storage, snapshot,    │
//! │  backup, live, tcss    │
//! └────────────────────────┘
//! ```

pub mod classify;
pub mod context;
pub mod diff;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod ids;
pub mod output;
pub mod plan;
pub mod poll;
pub mod ratelimit;
pub mod reconcile;
pub mod retry;

// Re-exports
pub use classify::{ErrorVerdict, classify, is_already_exists, suggestion};
pub use context::{Context, Operation, RemoteClient, Service};
pub use diff::ChangeSet;
pub use error::{CloudError, Result};
pub use fanout::{Page, PageRequest, describe_all};
pub use filter::{FilterKey, Filters, MAX_FILTER_VALUES, MAX_FILTERS, parse_key};
pub use ids::{ID_DELIMITER, ResourceId};
pub use output::write_result;
pub use plan::{PlanFailure, PlanReport, Step, StepFuture, StepOutcome, StepPlan, StepResult};
pub use poll::{Convergence, LifecyclePhase, PollSpec, poll};
pub use ratelimit::{RateGate, RateLimitConfig};
pub use reconcile::{
    Created, DeleteOptions, DeletePolicy, Deleted, FieldGroup, Lifecycle, LifecyclePlan,
    PlanState, ReconcileError, Reconciler, Removal, Updated, WaitFor, waiter,
};
pub use retry::{Budgets, RetryBudget, retry};
