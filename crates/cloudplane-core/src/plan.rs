//! Step sequencer
//!
//! A [`StepPlan`] is an ordered list of steps executed strictly in order
//! against one piece of per-plan state `S`, which is how later steps see ids
//! produced by earlier ones. Each step may submit a mutating operation
//! (retried under the step's [`RetryBudget`]) and then wait for convergence.
//!
//! A failing critical step stops the plan; the error comes back together
//! with the steps that already committed. A failing best-effort step is
//! recorded as a warning and the plan continues.

use crate::classify::{ErrorVerdict, classify, is_already_exists};
use crate::context::Context;
use crate::error::{CloudError, Result};
use crate::retry::RetryBudget;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Future returned by a step's submit or wait function
pub type StepFuture<'a> = BoxFuture<'a, Result<()>>;

type StepFn<S> = Box<dyn for<'a> Fn(&'a Context, &'a mut S) -> StepFuture<'a> + Send + Sync>;
type ProbeFn<S> =
    Box<dyn for<'a> Fn(&'a Context, &'a mut S) -> BoxFuture<'a, Result<bool>> + Send + Sync>;
type ConditionFn<S> = Box<dyn Fn(&S) -> bool + Send + Sync>;

/// One step of a plan
pub struct Step<S> {
    name: String,
    submit: Option<StepFn<S>>,
    wait: Option<StepFn<S>>,
    probe: Option<ProbeFn<S>>,
    condition: Option<ConditionFn<S>>,
    critical: bool,
    destructive: bool,
    budget: RetryBudget,
}

impl<S> Step<S> {
    fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            submit: None,
            wait: None,
            probe: None,
            condition: None,
            critical: true,
            destructive: false,
            budget: RetryBudget::write(),
        }
    }

    /// A step that submits one mutating operation.
    pub fn submit<F>(name: impl Into<String>, submit: F) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut S) -> StepFuture<'a> + Send + Sync + 'static,
    {
        let mut step = Self::empty(name);
        step.submit = Some(Box::new(submit));
        step
    }

    /// A step that only waits for convergence.
    pub fn wait<F>(name: impl Into<String>, wait: F) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut S) -> StepFuture<'a> + Send + Sync + 'static,
    {
        let mut step = Self::empty(name);
        step.wait = Some(Box::new(wait));
        step
    }

    /// Wait for convergence after the submit succeeded.
    pub fn then_wait<F>(mut self, wait: F) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut S) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.wait = Some(Box::new(wait));
        self
    }

    /// Check whether the operation already took effect.
    ///
    /// Runs before every resubmission after a retryable failure, and after an
    /// already-exists reply. Returning `true` commits the step without
    /// resubmitting; the probe may record recovered state (such as an id).
    pub fn probe<F>(mut self, probe: F) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut S) -> BoxFuture<'a, Result<bool>>
            + Send
            + Sync
            + 'static,
    {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Run the step only when `condition` holds for the state at that point.
    pub fn only_if<F>(mut self, condition: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Failures are recorded as warnings instead of stopping the plan.
    pub fn best_effort(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Once this step's submit is accepted the object is being torn down.
    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive
    }
}

impl<S> std::fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("critical", &self.critical)
            .field("destructive", &self.destructive)
            .field("submit", &self.submit.is_some())
            .field("wait", &self.wait.is_some())
            .field("probe", &self.probe.is_some())
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// Ordered steps executed as one logical lifecycle action
#[derive(Debug)]
pub struct StepPlan<S> {
    name: String,
    steps: Vec<Step<S>>,
}

impl<S> StepPlan<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step<S>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: Step<S>) {
        self.steps.push(step);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Committed,
    /// The step's condition did not hold
    Skipped,
    /// A best-effort step failed
    Warned,
}

/// Result of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub outcome: StepOutcome,
    pub error: Option<String>,
}

/// Record of a plan run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan: String,
    pub steps: Vec<StepResult>,
    pub duration_ms: u64,
}

impl PlanReport {
    fn new(plan: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            ..Default::default()
        }
    }

    fn record(&mut self, step: &str, outcome: StepOutcome, error: Option<String>) {
        self.steps.push(StepResult {
            step: step.to_string(),
            outcome,
            error,
        });
    }

    fn by_outcome(&self, outcome: StepOutcome) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.outcome == outcome)
            .map(|s| s.step.as_str())
            .collect()
    }

    pub fn committed(&self) -> Vec<&str> {
        self.by_outcome(StepOutcome::Committed)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.by_outcome(StepOutcome::Skipped)
    }

    pub fn warnings(&self) -> Vec<&StepResult> {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Warned)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.warnings().is_empty()
    }

    /// Append another plan's steps, e.g. when an update runs several plans
    pub fn absorb(&mut self, other: PlanReport) {
        self.steps.extend(other.steps);
        self.duration_ms += other.duration_ms;
    }
}

/// A critical step failed
#[derive(Debug, Error)]
#[error("step `{step}` of {} failed: {source}", .report.plan)]
pub struct PlanFailure {
    pub step: String,
    /// Steps run before the failure, with their outcomes
    pub report: PlanReport,
    /// A destructive step's submit was accepted before the failure
    pub destroy_sent: bool,
    #[source]
    pub source: CloudError,
}

impl PlanFailure {
    pub fn committed(&self) -> Vec<&str> {
        self.report.committed()
    }

    pub fn has_committed(&self, step: &str) -> bool {
        self.committed().contains(&step)
    }

    pub fn verdict(&self) -> ErrorVerdict {
        classify(&self.source)
    }
}

/// Execute `plan` against `state`, one step at a time, in order.
pub async fn run<S: Send>(
    ctx: &Context,
    plan: &StepPlan<S>,
    state: &mut S,
) -> std::result::Result<PlanReport, PlanFailure> {
    let start = Instant::now();
    let mut report = PlanReport::new(&plan.name);
    let mut destroy_sent = false;

    for step in &plan.steps {
        if let Some(condition) = &step.condition {
            if !condition(&*state) {
                debug!(plan = %plan.name, step = %step.name, "Condition not met, skipping step");
                report.record(&step.name, StepOutcome::Skipped, None);
                continue;
            }
        }

        match run_step(ctx, step, state, &mut destroy_sent).await {
            Ok(()) => {
                info!(plan = %plan.name, step = %step.name, "Step committed");
                report.record(&step.name, StepOutcome::Committed, None);
            }
            Err(err) if step.critical => {
                warn!(plan = %plan.name, step = %step.name, error = %err, "Critical step failed");
                report.duration_ms = start.elapsed().as_millis() as u64;
                return Err(PlanFailure {
                    step: step.name.clone(),
                    report,
                    destroy_sent,
                    source: err,
                });
            }
            Err(err) => {
                warn!(plan = %plan.name, step = %step.name, error = %err, "Best-effort step failed, continuing");
                report.record(&step.name, StepOutcome::Warned, Some(err.to_string()));
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    Ok(report)
}

async fn run_step<S: Send>(
    ctx: &Context,
    step: &Step<S>,
    state: &mut S,
    destroy_sent: &mut bool,
) -> Result<()> {
    if let Some(submit) = &step.submit {
        submit_with_retry(ctx, step, submit, state).await?;
        *destroy_sent |= step.destructive;
    }
    if let Some(wait) = &step.wait {
        wait(ctx, &mut *state).await?;
    }
    Ok(())
}

async fn submit_with_retry<S: Send>(
    ctx: &Context,
    step: &Step<S>,
    submit: &StepFn<S>,
    state: &mut S,
) -> Result<()> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        if attempt > 0 && probe_applied(ctx, step, state).await? {
            info!(step = %step.name, "Earlier submission took effect, not resubmitting");
            return Ok(());
        }

        let err = match submit(ctx, &mut *state).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if is_already_exists(&err) {
            let Some(probe) = &step.probe else {
                info!(step = %step.name, "Object already exists");
                return Ok(());
            };
            if probe(ctx, &mut *state).await? {
                info!(step = %step.name, "Object already exists, adopting it");
                return Ok(());
            }
            return Err(err);
        }

        if classify(&err) != ErrorVerdict::Retryable {
            return Err(err);
        }

        let delay = step.budget.delay_for_attempt(attempt);
        attempt += 1;
        if start.elapsed() + delay > step.budget.max_elapsed {
            return Err(CloudError::RetriesExhausted {
                operation: step.name.clone(),
                attempts: attempt,
                last: Box::new(err),
            });
        }

        warn!(
            step = %step.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Submission failed, will re-check and resubmit"
        );
        sleep(delay).await;
    }
}

/// Ask the step's probe whether an earlier submission already took effect.
/// A retryable probe failure counts as "unknown" and allows a resubmission.
async fn probe_applied<S: Send>(ctx: &Context, step: &Step<S>, state: &mut S) -> Result<bool> {
    let Some(probe) = &step.probe else {
        return Ok(false);
    };
    match probe(ctx, &mut *state).await {
        Ok(applied) => Ok(applied),
        Err(err) if classify(&err) == ErrorVerdict::Retryable => {
            debug!(step = %step.name, error = %err, "Probe failed, resubmitting");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Operation, RemoteClient};
    use crate::ratelimit::RateGate;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoClient;

    #[async_trait]
    impl RemoteClient for NoClient {
        async fn invoke(&self, operation: &Operation) -> Result<serde_json::Value> {
            Err(CloudError::Transport(format!("unexpected call {}", operation.action)))
        }
    }

    fn ctx() -> Context {
        Context::new(Arc::new(NoClient), RateGate::unlimited(), "test-region")
    }

    #[derive(Default)]
    struct Trace {
        calls: Vec<String>,
        failures_left: u32,
        applied: bool,
    }

    fn recording(name: &'static str) -> Step<Trace> {
        Step::submit(name, move |_, trace: &mut Trace| {
            Box::pin(async move {
                trace.calls.push(name.to_string());
                Ok(())
            })
        })
    }

    fn failing(name: &'static str, code: &'static str) -> Step<Trace> {
        Step::submit(name, move |_, trace: &mut Trace| {
            Box::pin(async move {
                trace.calls.push(name.to_string());
                Err(CloudError::api(code, "failed"))
            })
        })
    }

    #[tokio::test]
    async fn test_steps_run_in_declared_order() {
        for n in 1..=6 {
            let names: Vec<&'static str> = ["a", "b", "c", "d", "e", "f"][..n].to_vec();
            let mut plan = StepPlan::new("ordering");
            for (i, name) in names.iter().enumerate() {
                let step = if i % 2 == 0 {
                    recording(*name)
                } else {
                    recording(*name).best_effort()
                };
                plan.push(step);
            }

            let mut trace = Trace::default();
            let report = run(&ctx(), &plan, &mut trace).await.unwrap();

            assert_eq!(trace.calls, names);
            assert_eq!(report.committed(), names);
        }
    }

    #[tokio::test]
    async fn test_critical_failure_reports_committed_steps() {
        let plan = StepPlan::new("three steps")
            .step(recording("one"))
            .step(failing("two", "InvalidParameter"))
            .step(recording("three"));

        let mut trace = Trace::default();
        let failure = run(&ctx(), &plan, &mut trace).await.unwrap_err();

        assert_eq!(failure.step, "two");
        assert_eq!(failure.committed(), vec!["one"]);
        assert_eq!(failure.source.code(), Some("InvalidParameter"));
        assert_eq!(trace.calls, vec!["one", "two"]);
        assert_eq!(failure.verdict(), ErrorVerdict::Fatal);
    }

    #[tokio::test]
    async fn test_best_effort_failure_is_a_warning() {
        let plan = StepPlan::new("side effects")
            .step(recording("create"))
            .step(failing("tags", "UnauthorizedOperation").best_effort())
            .step(recording("wait"));

        let mut trace = Trace::default();
        let report = run(&ctx(), &plan, &mut trace).await.unwrap();

        assert_eq!(report.committed(), vec!["create", "wait"]);
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(report.warnings()[0].step, "tags");
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_condition_skips_step() {
        let plan = StepPlan::new("conditional")
            .step(recording("first"))
            .step(recording("second").only_if(|trace: &Trace| trace.calls.len() > 5));

        let mut trace = Trace::default();
        let report = run(&ctx(), &plan, &mut trace).await.unwrap();
        assert_eq!(report.skipped(), vec!["second"]);
        assert_eq!(trace.calls, vec!["first"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_submit_is_resubmitted() {
        let plan = StepPlan::new("flaky").step(Step::submit("resize", |_, trace: &mut Trace| {
            Box::pin(async move {
                trace.calls.push("resize".into());
                if trace.failures_left > 0 {
                    trace.failures_left -= 1;
                    return Err(CloudError::api("ResourceBusy", "busy"));
                }
                Ok(())
            })
        }));

        let mut trace = Trace {
            failures_left: 2,
            ..Default::default()
        };
        run(&ctx(), &plan, &mut trace).await.unwrap();
        assert_eq!(trace.calls.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_prevents_duplicate_submission() {
        // The first submission is delivered but its reply is lost.
        let plan = StepPlan::new("ambiguous").step(
            Step::submit("create", |_, trace: &mut Trace| {
                Box::pin(async move {
                    trace.calls.push("create".into());
                    trace.applied = true;
                    Err(CloudError::Transport("read timeout".into()))
                })
            })
            .probe(|_, trace: &mut Trace| {
                Box::pin(async move {
                    trace.calls.push("probe".into());
                    Ok(trace.applied)
                })
            }),
        );

        let mut trace = Trace::default();
        run(&ctx(), &plan, &mut trace).await.unwrap();
        assert_eq!(trace.calls, vec!["create", "probe"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_exists_after_retry_is_success() {
        let plan = StepPlan::new("duplicate").step(Step::submit("create", |_, trace: &mut Trace| {
            Box::pin(async move {
                trace.calls.push("create".into());
                if trace.calls.len() == 1 {
                    Err(CloudError::Transport("read timeout".into()))
                } else {
                    Err(CloudError::api("ResourceAlreadyExists", "exists"))
                }
            })
        }));

        let mut trace = Trace::default();
        let report = run(&ctx(), &plan, &mut trace).await.unwrap();
        assert_eq!(trace.calls.len(), 2);
        assert_eq!(report.committed(), vec!["create"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhaustion_fails_step() {
        let plan = StepPlan::new("stuck").step(
            failing("resize", "ResourceBusy").with_budget(RetryBudget {
                max_elapsed: std::time::Duration::from_secs(5),
                ..RetryBudget::write()
            }),
        );

        let mut trace = Trace::default();
        let failure = run(&ctx(), &plan, &mut trace).await.unwrap_err();
        assert!(matches!(failure.source, CloudError::RetriesExhausted { .. }));
        assert!(failure.committed().is_empty());
    }
    fn stalled_wait(step: Step<Trace>) -> Step<Trace> {
        step.then_wait(|_, _: &mut Trace| {
            Box::pin(async { Err(CloudError::api("ResourceBusy", "still converging")) })
        })
    }

    #[tokio::test]
    async fn test_destroy_sent_only_after_destructive_submit() {
        let before = StepPlan::new("delete")
            .step(stalled_wait(recording("detach")))
            .step(recording("terminate").destructive());
        let mut trace = Trace::default();
        let failure = run(&ctx(), &before, &mut trace).await.unwrap_err();
        assert_eq!(failure.step, "detach");
        assert!(!failure.destroy_sent);

        let during = StepPlan::new("delete")
            .step(recording("detach"))
            .step(stalled_wait(recording("terminate").destructive()));
        let mut trace = Trace::default();
        let failure = run(&ctx(), &during, &mut trace).await.unwrap_err();
        assert_eq!(failure.step, "terminate");
        assert!(failure.destroy_sent);
    }
}
