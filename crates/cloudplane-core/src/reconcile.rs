//! Create / Read / Update / Delete orchestration
//!
//! A [`Lifecycle`] describes one object kind: how to fetch it, how its
//! status maps onto a [`LifecyclePhase`], and which step plans implement each
//! lifecycle action. [`Reconciler`] drives those plans through the step
//! sequencer and reduces the result for the host.
//!
//! Precondition: the host serializes reconciliations of the same id. The
//! engine holds no state between calls and re-fetches on every invocation.

use crate::classify::{ErrorVerdict, classify};
use crate::context::Context;
use crate::diff::ChangeSet;
use crate::error::{CloudError, Result};
use crate::ids::ResourceId;
use crate::plan::{PlanFailure, PlanReport, StepFuture, StepPlan, run};
use crate::poll::{Convergence, LifecyclePhase, PollSpec, poll, until_active, until_exists, until_gone};
use crate::retry::{RetryBudget, retry};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// Which statuses count as "deleted" for an object kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Only confirmed absence counts
    ConfirmedAbsent,
    /// The soft-deleted status is as good as gone
    SoftDeleteTerminal,
    /// Soft-deleted counts as gone unless a forced delete asks for a second
    /// destroy call that purges the object
    TwoPhase,
}

impl DeletePolicy {
    /// Whether the wait after the first destroy call may stop at soft-deleted
    pub fn accepts_soft_deleted(self) -> bool {
        !matches!(self, DeletePolicy::ConfirmedAbsent)
    }
}

/// Options the host passes to Delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Purge soft-deleted objects instead of leaving them in the recycle bin
    pub force: bool,
    /// Detach the object from whatever it is attached to first
    pub detach: bool,
}

/// Fields that the remote API changes together in one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldGroup {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

/// Scratch state threaded through a lifecycle plan
#[derive(Debug, Clone)]
pub struct PlanState<O> {
    /// Set by the create step, or known upfront for update/delete
    pub id: Option<ResourceId>,
    /// Latest observation recorded by a wait step
    pub observed: Option<O>,
    /// Idempotency token reused by every resubmission of a create call
    pub client_token: String,
    /// Ids of look-alike objects that existed before the first create
    /// submission. A create probe never adopts one of these; `None` until
    /// recorded.
    pub preexisting: Option<Vec<String>>,
}

impl<O> PlanState<O> {
    pub fn new(kind: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self {
            id: None,
            observed: None,
            client_token: format!("{kind}-{nanos:x}"),
            preexisting: None,
        }
    }

    pub fn existing(kind: &str, id: ResourceId) -> Self {
        let mut state = Self::new(kind);
        state.id = Some(id);
        state
    }

    pub fn require_id(&self) -> Result<&ResourceId> {
        self.id
            .as_ref()
            .ok_or_else(|| CloudError::InvalidConfig("plan step ran before the object id was known".into()))
    }
}

/// Plan type every lifecycle action produces
pub type LifecyclePlan<L> = StepPlan<PlanState<<L as Lifecycle>::Object>>;

/// One object kind
#[async_trait]
pub trait Lifecycle: Clone + Send + Sync + 'static {
    /// Desired state, as declared by the host
    type Spec: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    /// Observed remote object
    type Object: Serialize + Clone + std::fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> &'static str;

    /// Number of remote keys packed into the id
    fn id_arity(&self) -> usize {
        1
    }

    fn delete_policy(&self) -> DeletePolicy;

    fn phase(&self, object: &Self::Object) -> LifecyclePhase;

    /// One describe call; `Ok(None)` when the object does not exist
    async fn fetch(&self, ctx: &Context, id: &ResourceId) -> Result<Option<Self::Object>>;

    /// Plan whose first step must record the new id in the plan state
    fn create_plan(&self, spec: &Self::Spec) -> Result<LifecyclePlan<Self>>;

    /// Groups of fields that can change in place, in the order they are applied
    fn update_groups(&self) -> &'static [FieldGroup];

    fn update_plan(
        &self,
        group: &FieldGroup,
        prior: &Self::Spec,
        desired: &Self::Spec,
    ) -> Result<LifecyclePlan<Self>>;

    /// Plan run with the current object already recorded in the plan state
    fn delete_plan(&self, options: &DeleteOptions) -> Result<LifecyclePlan<Self>>;

    /// Reduce a remote object to the host's declarative model
    fn observe(&self, object: &Self::Object) -> Self::Spec;
}

/// Predicate a wait step applies to each observation
#[derive(Clone)]
pub enum WaitFor<O> {
    /// Visible in any status
    Exists,
    /// Visible and active
    Active,
    /// Absent, or soft-deleted when allowed
    Gone { accept_soft_deleted: bool },
    Custom(Arc<dyn Fn(Option<&O>) -> Convergence + Send + Sync>),
}

impl<O> WaitFor<O> {
    pub fn custom(predicate: impl Fn(Option<&O>) -> Convergence + Send + Sync + 'static) -> Self {
        WaitFor::Custom(Arc::new(predicate))
    }
}

impl<O> std::fmt::Debug for WaitFor<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitFor::Exists => write!(f, "Exists"),
            WaitFor::Active => write!(f, "Active"),
            WaitFor::Gone { accept_soft_deleted } => {
                write!(f, "Gone {{ accept_soft_deleted: {accept_soft_deleted} }}")
            }
            WaitFor::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Build a wait function that polls the object in the plan state and
/// records the last observation there.
pub fn waiter<L: Lifecycle>(
    lifecycle: &L,
    spec: PollSpec,
    wait_for: WaitFor<L::Object>,
) -> impl for<'a> Fn(&'a Context, &'a mut PlanState<L::Object>) -> StepFuture<'a> + Send + Sync + 'static
{
    let lifecycle = lifecycle.clone();
    move |ctx: &Context, state: &mut PlanState<L::Object>| {
        let lifecycle = lifecycle.clone();
        let wait_for = wait_for.clone();
        Box::pin(async move {
            let id = state.require_id()?.clone();
            let label = format!("wait {} {id} {wait_for:?}", lifecycle.kind());
            let phase = |object: &L::Object| lifecycle.phase(object);
            let fetch = || lifecycle.fetch(ctx, &id);

            let observed = match &wait_for {
                WaitFor::Exists => poll(&label, &spec, fetch, until_exists()).await?,
                WaitFor::Active => poll(&label, &spec, fetch, until_active(phase)).await?,
                WaitFor::Gone {
                    accept_soft_deleted,
                } => poll(&label, &spec, fetch, until_gone(*accept_soft_deleted, phase)).await?,
                WaitFor::Custom(predicate) => {
                    poll(&label, &spec, fetch, |object| predicate(object)).await?
                }
            };
            state.observed = observed;
            Ok(())
        })
    }
}

/// Created object plus the steps that produced it
#[derive(Debug, Clone)]
pub struct Created<O> {
    pub id: ResourceId,
    pub object: O,
    pub report: PlanReport,
}

#[derive(Debug, Clone)]
pub struct Updated<O> {
    pub id: ResourceId,
    pub changed: Vec<String>,
    /// `None` if the object disappeared while updating
    pub object: Option<O>,
    pub report: PlanReport,
}

/// How a delete ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// Nothing to do, the object was not there
    AlreadyAbsent,
    Absent,
    /// Left in the recycle bin, which the kind's policy accepts as deleted
    SoftDeleted,
}

#[derive(Debug, Clone)]
pub struct Deleted {
    pub id: ResourceId,
    pub removal: Removal,
    pub report: PlanReport,
}

/// Reconciliation failures, shaped so the host never loses an existing object's id
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{kind} {id} was created but step `{step}` failed: {source}")]
    PartiallyCreated {
        kind: &'static str,
        id: ResourceId,
        step: String,
        committed: Vec<String>,
        #[source]
        source: CloudError,
    },

    #[error("delete of {kind} {id} initiated but not confirmed: {source}")]
    DeleteUnconfirmed {
        kind: &'static str,
        id: ResourceId,
        #[source]
        source: CloudError,
    },

    #[error("{kind} {id} was created but is no longer visible")]
    Vanished { kind: &'static str, id: ResourceId },

    #[error("{kind}: {failure}")]
    Plan {
        kind: &'static str,
        #[source]
        failure: PlanFailure,
    },

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl ReconcileError {
    /// Id the host must keep because the remote object exists
    pub fn persisted_id(&self) -> Option<&ResourceId> {
        match self {
            ReconcileError::PartiallyCreated { id, .. } | ReconcileError::DeleteUnconfirmed { id, .. } => {
                Some(id)
            }
            _ => None,
        }
    }

    /// The underlying remote or engine error
    pub fn cause(&self) -> Option<&CloudError> {
        match self {
            ReconcileError::PartiallyCreated { source, .. }
            | ReconcileError::DeleteUnconfirmed { source, .. } => Some(source),
            ReconcileError::Plan { failure, .. } => Some(&failure.source),
            ReconcileError::Cloud(err) => Some(err),
            ReconcileError::Vanished { .. } => None,
        }
    }

    pub fn verdict(&self) -> ErrorVerdict {
        match self {
            ReconcileError::Vanished { .. } => ErrorVerdict::NotFound,
            other => other.cause().map(classify).unwrap_or(ErrorVerdict::Fatal),
        }
    }

    /// "Still converging, check back later" rather than "permanently broken"
    pub fn is_still_converging(&self) -> bool {
        self.cause().is_some_and(CloudError::is_deadline_exceeded)
    }
}

/// Drives one object kind through its lifecycle
#[derive(Debug, Clone)]
pub struct Reconciler<L> {
    lifecycle: L,
    read_budget: RetryBudget,
}

impl<L: Lifecycle> Reconciler<L> {
    pub fn new(lifecycle: L) -> Self {
        Self {
            lifecycle,
            read_budget: RetryBudget::read(),
        }
    }

    pub fn with_read_budget(mut self, budget: RetryBudget) -> Self {
        self.read_budget = budget;
        self
    }

    pub fn lifecycle(&self) -> &L {
        &self.lifecycle
    }

    pub fn parse_id(&self, raw: &str) -> Result<ResourceId> {
        ResourceId::parse(raw, self.lifecycle.id_arity())
    }

    /// Run the create plan and read back the result.
    ///
    /// When the primary object was created but a later critical step failed,
    /// the error still carries its id.
    pub async fn create(
        &self,
        ctx: &Context,
        spec: &L::Spec,
    ) -> std::result::Result<Created<L::Object>, ReconcileError> {
        let kind = self.lifecycle.kind();
        let plan = self.lifecycle.create_plan(spec)?;
        let mut state = PlanState::new(kind);

        let report = match run(ctx, &plan, &mut state).await {
            Ok(report) => report,
            Err(failure) => {
                return Err(match state.id {
                    Some(id) => {
                        warn!(kind, id = %id, step = %failure.step, "Create partially applied");
                        ReconcileError::PartiallyCreated {
                            kind,
                            id,
                            step: failure.step.clone(),
                            committed: failure.committed().iter().map(|s| s.to_string()).collect(),
                            source: failure.source,
                        }
                    }
                    None => ReconcileError::Plan { kind, failure },
                });
            }
        };

        let id = state.id.ok_or_else(|| {
            CloudError::InvalidConfig(format!("{kind} create plan finished without recording an id"))
        })?;

        match self.read_id(ctx, &id).await {
            Ok(Some(object)) => {
                info!(kind, id = %id, "Created");
                Ok(Created { id, object, report })
            }
            Ok(None) => Err(ReconcileError::Vanished { kind, id }),
            Err(source) => Err(ReconcileError::PartiallyCreated {
                kind,
                id,
                step: "read".to_string(),
                committed: report.committed().iter().map(|s| s.to_string()).collect(),
                source,
            }),
        }
    }

    /// Fetch the object. `Ok(None)` means it no longer exists and the host
    /// should clear its id.
    pub async fn read(&self, ctx: &Context, raw_id: &str) -> Result<Option<L::Object>> {
        let id = self.parse_id(raw_id)?;
        self.read_id(ctx, &id).await
    }

    /// Fetch the object and reduce it to the declarative model.
    pub async fn read_model(&self, ctx: &Context, raw_id: &str) -> Result<Option<L::Spec>> {
        Ok(self
            .read(ctx, raw_id)
            .await?
            .map(|object| self.lifecycle.observe(&object)))
    }

    async fn read_id(&self, ctx: &Context, id: &ResourceId) -> Result<Option<L::Object>> {
        let label = format!("read {} {id}", self.lifecycle.kind());
        let fetched = retry(&label, &self.read_budget, || self.lifecycle.fetch(ctx, id)).await;

        match fetched {
            Ok(Some(object)) if self.counts_as_gone(&object) => Ok(None),
            Ok(observed) => Ok(observed),
            Err(err) if classify(&err) == ErrorVerdict::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Still listed remotely, but deleted as far as the host is concerned
    fn counts_as_gone(&self, object: &L::Object) -> bool {
        match self.lifecycle.phase(object) {
            LifecyclePhase::Absent => true,
            LifecyclePhase::SoftDeleted => {
                self.lifecycle.delete_policy() == DeletePolicy::SoftDeleteTerminal
            }
            _ => false,
        }
    }

    /// Apply the fields that differ between `prior` and `desired`.
    ///
    /// Every changed field group gets its own plan and the plans run one after
    /// another, since the remote side allows one attribute change in flight.
    pub async fn update(
        &self,
        ctx: &Context,
        raw_id: &str,
        prior: &L::Spec,
        desired: &L::Spec,
    ) -> std::result::Result<Updated<L::Object>, ReconcileError> {
        let kind = self.lifecycle.kind();
        let id = self.parse_id(raw_id)?;
        let changes = ChangeSet::between(prior, desired)?;
        let groups = self.lifecycle.update_groups();

        let mutable: Vec<&str> = groups.iter().flat_map(|g| g.fields.iter().copied()).collect();
        let immutable = changes.outside(&mutable);
        if !immutable.is_empty() {
            return Err(CloudError::InvalidConfig(format!(
                "{kind} fields cannot be changed in place: {}",
                immutable.join(", ")
            ))
            .into());
        }

        let mut report = PlanReport {
            plan: format!("update {kind} {id}"),
            ..Default::default()
        };

        for group in groups.iter().filter(|g| changes.any_of(g.fields)) {
            let plan = self.lifecycle.update_plan(group, prior, desired)?;
            let mut state = PlanState::existing(kind, id.clone());

            match run(ctx, &plan, &mut state).await {
                Ok(group_report) => report.absorb(group_report),
                Err(mut failure) => {
                    let mut so_far = report;
                    so_far.absorb(failure.report);
                    failure.report = so_far;
                    return Err(ReconcileError::Plan { kind, failure });
                }
            }
        }

        let object = self.read_id(ctx, &id).await?;
        info!(kind, id = %id, steps = report.steps.len(), "Updated");
        Ok(Updated {
            id,
            changed: changes.fields().map(str::to_string).collect(),
            object,
            report,
        })
    }

    /// Destroy the object and confirm it is gone (or soft-deleted where the
    /// kind's policy allows). Deleting an absent object succeeds.
    pub async fn delete(
        &self,
        ctx: &Context,
        raw_id: &str,
        options: &DeleteOptions,
    ) -> std::result::Result<Deleted, ReconcileError> {
        let kind = self.lifecycle.kind();
        let id = self.parse_id(raw_id)?;

        let Some(current) = self.read_id(ctx, &id).await? else {
            info!(kind, id = %id, "Already absent");
            return Ok(Deleted {
                id,
                removal: Removal::AlreadyAbsent,
                report: PlanReport::default(),
            });
        };

        let plan = self.lifecycle.delete_plan(options)?;
        let mut state = PlanState::existing(kind, id.clone());
        state.observed = Some(current);

        match run(ctx, &plan, &mut state).await {
            Ok(report) => {
                let removal = match &state.observed {
                    Some(object) if self.lifecycle.phase(object) == LifecyclePhase::SoftDeleted => {
                        Removal::SoftDeleted
                    }
                    _ => Removal::Absent,
                };
                info!(kind, id = %id, ?removal, "Deleted");
                Ok(Deleted {
                    id,
                    removal,
                    report,
                })
            }
            Err(failure) if failure.destroy_sent && failure.source.is_deadline_exceeded() => {
                Err(ReconcileError::DeleteUnconfirmed {
                    kind,
                    id,
                    source: failure.source,
                })
            }
            Err(failure) => Err(ReconcileError::Plan { kind, failure }),
        }
    }
}
