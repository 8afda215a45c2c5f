use super::CBS;
use crate::steps::{
    FIRST_PAGE, Listing, adoptable, decode_page, destroy, note_preexisting, page_payload, submit,
};
use async_trait::async_trait;
use cloudplane_core::{
    Budgets, CloudError, Context, DeleteOptions, DeletePolicy, FieldGroup, FilterKey, Filters,
    Lifecycle, LifecyclePhase, LifecyclePlan, Operation, Page, PageRequest, PlanState, ResourceId,
    Result, RetryBudget, Step, StepPlan, WaitFor, waiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotState {
    Normal,
    Creating,
    Rollbacking,
    CopyingFromRemote,
    CheckingCopied,
    Torecycle,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    pub snapshot_id: String,
    #[serde(default)]
    pub snapshot_name: String,
    pub snapshot_state: SnapshotState,
    #[serde(default)]
    pub disk_id: String,
    #[serde(default)]
    pub disk_size: u64,
    /// Creation progress in percent
    #[serde(default)]
    pub percent: u8,
    #[serde(default)]
    pub create_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSpec {
    pub name: String,
    pub disk_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKey {
    SnapshotId,
    SnapshotName,
    DiskId,
    SnapshotState,
    Zone,
}

impl FilterKey for SnapshotKey {
    fn name(self) -> &'static str {
        match self {
            SnapshotKey::SnapshotId => "snapshot-id",
            SnapshotKey::SnapshotName => "snapshot-name",
            SnapshotKey::DiskId => "disk-id",
            SnapshotKey::SnapshotState => "snapshot-state",
            SnapshotKey::Zone => "zone",
        }
    }
}

const KEYS: &[SnapshotKey] = &[
    SnapshotKey::SnapshotId,
    SnapshotKey::SnapshotName,
    SnapshotKey::DiskId,
    SnapshotKey::SnapshotState,
    SnapshotKey::Zone,
];

const GROUPS: &[FieldGroup] = &[FieldGroup {
    name: "name",
    fields: &["name"],
}];

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateReply {
    snapshot_id: String,
}

/// Disk snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshots {
    budgets: Budgets,
}

impl Snapshots {
    pub fn new(budgets: Budgets) -> Self {
        Self { budgets }
    }

    async fn describe(&self, ctx: &Context, payload: Value) -> Result<Page<Snapshot>> {
        let reply = ctx
            .call(&Operation::new(CBS, "DescribeSnapshots").payload(payload))
            .await?;
        decode_page("DescribeSnapshots", reply, "TotalCount", "SnapshotSet")
    }
}

#[async_trait]
impl Lifecycle for Snapshots {
    type Spec = SnapshotSpec;
    type Object = Snapshot;

    fn kind(&self) -> &'static str {
        "snapshot"
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::ConfirmedAbsent
    }

    fn phase(&self, snapshot: &Snapshot) -> LifecyclePhase {
        match snapshot.snapshot_state {
            SnapshotState::Normal => LifecyclePhase::Active,
            SnapshotState::Creating
            | SnapshotState::CopyingFromRemote
            | SnapshotState::CheckingCopied => LifecyclePhase::Creating,
            SnapshotState::Rollbacking | SnapshotState::Unknown => LifecyclePhase::Mutating,
            SnapshotState::Torecycle => LifecyclePhase::SoftDeleted,
            SnapshotState::Failed => LifecyclePhase::Failed,
        }
    }

    async fn fetch(&self, ctx: &Context, id: &ResourceId) -> Result<Option<Snapshot>> {
        let page = self
            .describe(ctx, json!({ "SnapshotIds": [id.as_str()] }))
            .await?;
        Ok(page
            .items
            .into_iter()
            .find(|s| s.snapshot_id == id.as_str()))
    }

    fn create_plan(&self, spec: &SnapshotSpec) -> Result<LifecyclePlan<Self>> {
        let payload = json!({ "DiskId": spec.disk_id, "SnapshotName": spec.name });
        let same_name = Filters::new()
            .with(SnapshotKey::SnapshotName, [spec.name.clone()])?
            .with(SnapshotKey::DiskId, [spec.disk_id.clone()])?;
        let lookup_payload = page_payload(&same_name, FIRST_PAGE);
        let baseline_payload = lookup_payload.clone();
        let lookup = *self;

        let create = Step::submit("create", move |ctx: &Context, state: &mut PlanState<Snapshot>| {
            let payload = payload.clone();
            let baseline = baseline_payload.clone();
            Box::pin(async move {
                if state.preexisting.is_none() {
                    let seen = lookup.describe(ctx, baseline).await?.items;
                    note_preexisting(state, seen.into_iter().map(|s| s.snapshot_id));
                }
                let reply: CreateReply = ctx
                    .call_as(&Operation::new(CBS, "CreateSnapshot").payload(payload))
                    .await?;
                state.id = Some(ResourceId::join([reply.snapshot_id])?);
                Ok(())
            })
        })
        .probe(move |ctx: &Context, state: &mut PlanState<Snapshot>| {
            let payload = lookup_payload.clone();
            Box::pin(async move {
                let candidates = lookup.describe(ctx, payload).await?.items;
                match adoptable(&*state, candidates, |s: &Snapshot| s.snapshot_id.clone()) {
                    Some(snapshot) => {
                        state.id = Some(ResourceId::join([snapshot.snapshot_id])?);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
        })
        .with_budget(self.budgets.provisioning);

        // Active aborts on FAILED
        Ok(StepPlan::new(format!("create snapshot {}", spec.name))
            .step(create.then_wait(waiter(self, self.budgets.provisioning_poll, WaitFor::Active))))
    }

    fn update_groups(&self) -> &'static [FieldGroup] {
        GROUPS
    }

    fn update_plan(
        &self,
        group: &FieldGroup,
        _prior: &SnapshotSpec,
        desired: &SnapshotSpec,
    ) -> Result<LifecyclePlan<Self>> {
        if group.name != "name" {
            return Err(CloudError::InvalidConfig(format!(
                "unknown snapshot field group '{}'",
                group.name
            )));
        }
        let name = desired.name.clone();
        Ok(StepPlan::new("update snapshot name").step(submit(
            "rename",
            move |state: &PlanState<Snapshot>| {
                let id = state.require_id()?;
                Ok(Operation::new(CBS, "ModifySnapshotAttribute")
                    .target(id.as_str())
                    .payload(json!({ "SnapshotId": id.as_str(), "SnapshotName": name })))
            },
        )))
    }

    fn delete_plan(&self, _options: &DeleteOptions) -> Result<LifecyclePlan<Self>> {
        Ok(StepPlan::new("delete snapshot").step(
            destroy("delete", |state: &PlanState<Snapshot>| {
                let id = state.require_id()?;
                Ok(Operation::new(CBS, "DeleteSnapshots")
                    .target(id.as_str())
                    .payload(json!({ "SnapshotIds": [id.as_str()] })))
            })
            .then_wait(waiter(
                self,
                self.budgets.poll,
                WaitFor::Gone {
                    accept_soft_deleted: false,
                },
            )),
        ))
    }

    fn observe(&self, snapshot: &Snapshot) -> SnapshotSpec {
        SnapshotSpec {
            name: snapshot.snapshot_name.clone(),
            disk_id: snapshot.disk_id.clone(),
        }
    }
}

#[async_trait]
impl Listing for Snapshots {
    type Key = SnapshotKey;

    fn filter_keys(&self) -> &'static [SnapshotKey] {
        KEYS
    }

    fn read_budget(&self) -> RetryBudget {
        self.budgets.read
    }

    async fn page(
        &self,
        ctx: &Context,
        filters: &Filters<SnapshotKey>,
        page: PageRequest,
    ) -> Result<Page<Snapshot>> {
        self.describe(ctx, page_payload(filters, page)).await
    }
}
