//! Container security agents on Kubernetes clusters
//!
//! The cluster itself outlives its agent: uninstalling leaves the cluster
//! listed with `AccessedNone`, which counts as deleted.

use crate::steps::{Listing, decode_page, destroy, only, page_payload, submit};
use async_trait::async_trait;
use cloudplane_core::{
    Budgets, CloudError, Context, Convergence, DeleteOptions, DeletePolicy, FieldGroup, FilterKey,
    Filters, Lifecycle, LifecyclePhase, LifecyclePlan, Operation, Page, PageRequest, PlanState,
    ResourceId, Result, RetryBudget, Service, Step, StepPlan, WaitFor, waiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const TCSS: Service = Service::new("tcss", "2020-11-01");

const DEFENDED: &str = "Defended";
const UNDEFENDED: &str = "UnDefended";

/// Agent installation status of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessedStatus {
    AccessedNone,
    AccessedInstalling,
    AccessedDefended,
    AccessedPartialDefence,
    AccessedUninstalling,
    AccessedError,
    AccessedInstallFailed,
    AccessedUninstallFailed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterAgent {
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_type: String,
    #[serde(default)]
    pub cluster_version: String,
    pub accessed_status: AccessedStatus,
    /// `Defended` or `UnDefended`
    #[serde(default)]
    pub defender_status: String,
}

impl ClusterAgent {
    fn is_defended(&self) -> bool {
        self.defender_status == DEFENDED
    }
}

fn default_defender() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAgentSpec {
    pub cluster_id: String,
    /// Runtime defense switched on after the agent is installed
    #[serde(default = "default_defender")]
    pub defender: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAgentKey {
    ClusterId,
    ClusterName,
    ClusterType,
    ClusterCheckStatus,
    ClusterRiskLevel,
}

impl FilterKey for ClusterAgentKey {
    fn name(self) -> &'static str {
        match self {
            ClusterAgentKey::ClusterId => "ClusterID",
            ClusterAgentKey::ClusterName => "ClusterName",
            ClusterAgentKey::ClusterType => "ClusterType",
            ClusterAgentKey::ClusterCheckStatus => "ClusterCheckStatus",
            ClusterAgentKey::ClusterRiskLevel => "ClusterRiskLevel",
        }
    }
}

const KEYS: &[ClusterAgentKey] = &[
    ClusterAgentKey::ClusterId,
    ClusterAgentKey::ClusterName,
    ClusterAgentKey::ClusterType,
    ClusterAgentKey::ClusterCheckStatus,
    ClusterAgentKey::ClusterRiskLevel,
];

const GROUPS: &[FieldGroup] = &[FieldGroup {
    name: "defender switch",
    fields: &["defender"],
}];

fn installed() -> WaitFor<ClusterAgent> {
    WaitFor::custom(|agent: Option<&ClusterAgent>| match agent.map(|a| a.accessed_status) {
        Some(AccessedStatus::AccessedDefended) => Convergence::Done,
        Some(status @ (AccessedStatus::AccessedError | AccessedStatus::AccessedInstallFailed)) => {
            Convergence::Abort(format!("agent installation ended in {status:?}"))
        }
        Some(_) => Convergence::Continue,
        None => Convergence::Abort("cluster is not registered".into()),
    })
}

fn defender_is(enabled: bool) -> WaitFor<ClusterAgent> {
    WaitFor::custom(move |agent: Option<&ClusterAgent>| match agent {
        Some(a) if a.is_defended() == enabled => Convergence::Done,
        Some(_) => Convergence::Continue,
        None => Convergence::Abort("cluster is not registered".into()),
    })
}

/// Security agents, addressed by cluster id
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterAgents {
    budgets: Budgets,
}

impl ClusterAgents {
    pub fn new(budgets: Budgets) -> Self {
        Self { budgets }
    }

    async fn describe(&self, ctx: &Context, payload: Value) -> Result<Page<ClusterAgent>> {
        let reply = ctx
            .call(&Operation::new(TCSS, "DescribeUserCluster").payload(payload))
            .await?;
        decode_page("DescribeUserCluster", reply, "TotalCount", "ClusterInfoList")
    }

    fn defender_step(&self, enabled: bool) -> Step<PlanState<ClusterAgent>> {
        submit("defender switch", move |state: &PlanState<ClusterAgent>| {
            let id = state.require_id()?;
            Ok(Operation::new(TCSS, "ModifyClusterDefenderStatus")
                .target(id.as_str())
                .payload(json!({
                    "ClusterIds": [id.as_str()],
                    "DefenderStatus": if enabled { DEFENDED } else { UNDEFENDED },
                })))
        })
        .with_budget(self.budgets.write)
        .then_wait(waiter(self, self.budgets.poll, defender_is(enabled)))
    }
}

#[async_trait]
impl Lifecycle for ClusterAgents {
    type Spec = ClusterAgentSpec;
    type Object = ClusterAgent;

    fn kind(&self) -> &'static str {
        "cluster-agent"
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::SoftDeleteTerminal
    }

    fn phase(&self, agent: &ClusterAgent) -> LifecyclePhase {
        match agent.accessed_status {
            AccessedStatus::AccessedNone => LifecyclePhase::SoftDeleted,
            AccessedStatus::AccessedInstalling => LifecyclePhase::Creating,
            AccessedStatus::AccessedDefended | AccessedStatus::AccessedPartialDefence => {
                LifecyclePhase::Active
            }
            AccessedStatus::AccessedUninstalling => LifecyclePhase::Deleting,
            AccessedStatus::AccessedError
            | AccessedStatus::AccessedInstallFailed
            | AccessedStatus::AccessedUninstallFailed => LifecyclePhase::Failed,
            AccessedStatus::Unknown => LifecyclePhase::Mutating,
        }
    }

    async fn fetch(&self, ctx: &Context, id: &ResourceId) -> Result<Option<ClusterAgent>> {
        let filters = Filters::new().with(ClusterAgentKey::ClusterId, [id.as_str()])?;
        let page = self
            .describe(
                ctx,
                page_payload(
                    &filters,
                    PageRequest {
                        offset: 0,
                        limit: 1,
                    },
                ),
            )
            .await?;
        Ok(only(page.items).filter(|a| a.cluster_id == id.as_str()))
    }

    fn create_plan(&self, spec: &ClusterAgentSpec) -> Result<LifecyclePlan<Self>> {
        let id = ResourceId::join([spec.cluster_id.as_str()])?;
        let lookup = *self;

        let install = Step::submit("install", move |ctx: &Context, state: &mut PlanState<ClusterAgent>| {
            state.id = Some(id.clone());
            let op = Operation::new(TCSS, "CreateClusterAccess")
                .target(id.as_str())
                .payload(json!({ "ClusterIds": [id.as_str()] }));
            Box::pin(async move {
                ctx.call(&op).await?;
                Ok(())
            })
        })
        .probe(move |ctx: &Context, state: &mut PlanState<ClusterAgent>| {
            Box::pin(async move {
                let id = state.require_id()?.clone();
                Ok(lookup
                    .fetch(ctx, &id)
                    .await?
                    .is_some_and(|agent| agent.accessed_status != AccessedStatus::AccessedNone))
            })
        })
        .with_budget(self.budgets.provisioning)
        .then_wait(waiter(self, self.budgets.provisioning_poll, installed()));

        let mut plan = StepPlan::new(format!("install agent on {}", spec.cluster_id)).step(install);
        if !spec.defender {
            plan.push(self.defender_step(false));
        }
        Ok(plan)
    }

    fn update_groups(&self) -> &'static [FieldGroup] {
        GROUPS
    }

    fn update_plan(
        &self,
        group: &FieldGroup,
        _prior: &ClusterAgentSpec,
        desired: &ClusterAgentSpec,
    ) -> Result<LifecyclePlan<Self>> {
        if group.name != "defender switch" {
            return Err(CloudError::InvalidConfig(format!(
                "unknown cluster agent field group '{}'",
                group.name
            )));
        }
        Ok(StepPlan::new("update defender switch").step(self.defender_step(desired.defender)))
    }

    fn delete_plan(&self, _options: &DeleteOptions) -> Result<LifecyclePlan<Self>> {
        Ok(StepPlan::new("uninstall agent").step(
            destroy("uninstall", |state: &PlanState<ClusterAgent>| {
                let id = state.require_id()?;
                Ok(Operation::new(TCSS, "UninstallClusterAccess")
                    .target(id.as_str())
                    .payload(json!({ "ClusterIds": [id.as_str()] })))
            })
            .with_budget(self.budgets.write)
            .then_wait(waiter(
                self,
                self.budgets.provisioning_poll,
                WaitFor::Gone {
                    accept_soft_deleted: self.delete_policy().accepts_soft_deleted(),
                },
            )),
        ))
    }

    fn observe(&self, agent: &ClusterAgent) -> ClusterAgentSpec {
        ClusterAgentSpec {
            cluster_id: agent.cluster_id.clone(),
            defender: agent.is_defended(),
        }
    }
}

#[async_trait]
impl Listing for ClusterAgents {
    type Key = ClusterAgentKey;

    fn filter_keys(&self) -> &'static [ClusterAgentKey] {
        KEYS
    }

    fn read_budget(&self) -> RetryBudget {
        self.budgets.read
    }

    async fn page(
        &self,
        ctx: &Context,
        filters: &Filters<ClusterAgentKey>,
        page: PageRequest,
    ) -> Result<Page<ClusterAgent>> {
        self.describe(ctx, page_payload(filters, page)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(status: &str) -> ClusterAgent {
        serde_json::from_value(json!({
            "ClusterId": "cls-1",
            "AccessedStatus": status,
            "DefenderStatus": "Defended",
        }))
        .unwrap()
    }

    #[test]
    fn test_phase_mapping() {
        let agents = ClusterAgents::default();
        assert_eq!(agents.phase(&agent("AccessedNone")), LifecyclePhase::SoftDeleted);
        assert_eq!(agents.phase(&agent("AccessedDefended")), LifecyclePhase::Active);
        assert_eq!(agents.phase(&agent("AccessedInstallFailed")), LifecyclePhase::Failed);
        assert_eq!(agents.phase(&agent("AccessedSomethingNew")), LifecyclePhase::Mutating);
    }

    #[test]
    fn test_install_wait_aborts_on_error() {
        let WaitFor::Custom(predicate) = installed() else {
            panic!("expected a custom predicate");
        };
        assert_eq!(predicate(Some(&agent("AccessedInstalling"))), Convergence::Continue);
        assert_eq!(predicate(Some(&agent("AccessedDefended"))), Convergence::Done);
        assert!(matches!(
            predicate(Some(&agent("AccessedError"))),
            Convergence::Abort(_)
        ));
    }

    #[test]
    fn test_soft_delete_is_terminal() {
        assert_eq!(
            ClusterAgents::default().delete_policy(),
            DeletePolicy::SoftDeleteTerminal
        );
    }
}
