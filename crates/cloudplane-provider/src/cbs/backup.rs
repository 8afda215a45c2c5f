use super::CBS;
use crate::steps::{
    FIRST_PAGE, Listing, adoptable, decode_page, destroy, note_preexisting, page_payload,
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
pub enum DiskBackupState {
    Normal,
    Creating,
    Rollbacking,
    #[serde(other)]
    Unknown,
}

/// A backup point of one disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiskBackup {
    pub disk_backup_id: String,
    pub disk_id: String,
    #[serde(default)]
    pub disk_backup_name: String,
    pub disk_backup_state: DiskBackupState,
    #[serde(default)]
    pub disk_size: u64,
    #[serde(default)]
    pub create_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskBackupSpec {
    pub disk_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskBackupKey {
    DiskBackupId,
    DiskId,
    DiskUsage,
}

impl FilterKey for DiskBackupKey {
    fn name(self) -> &'static str {
        match self {
            DiskBackupKey::DiskBackupId => "disk-backup-id",
            DiskBackupKey::DiskId => "disk-id",
            DiskBackupKey::DiskUsage => "disk-usage",
        }
    }
}

const KEYS: &[DiskBackupKey] = &[
    DiskBackupKey::DiskBackupId,
    DiskBackupKey::DiskId,
    DiskBackupKey::DiskUsage,
];

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateReply {
    disk_backup_id: String,
}

/// Disk backup points, addressed as `{diskId}#{backupId}`
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskBackups {
    budgets: Budgets,
}

impl DiskBackups {
    pub fn new(budgets: Budgets) -> Self {
        Self { budgets }
    }

    async fn describe(&self, ctx: &Context, payload: Value) -> Result<Page<DiskBackup>> {
        let reply = ctx
            .call(&Operation::new(CBS, "DescribeDiskBackups").payload(payload))
            .await?;
        decode_page("DescribeDiskBackups", reply, "TotalCount", "DiskBackupSet")
    }
}

fn backup_id(id: &ResourceId) -> Result<&str> {
    id.part(1).ok_or_else(|| CloudError::InvalidId {
        id: id.to_string(),
        reason: "expected {diskId}#{backupId}".into(),
    })
}

#[async_trait]
impl Lifecycle for DiskBackups {
    type Spec = DiskBackupSpec;
    type Object = DiskBackup;

    fn kind(&self) -> &'static str {
        "disk-backup"
    }

    fn id_arity(&self) -> usize {
        2
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::ConfirmedAbsent
    }

    fn phase(&self, backup: &DiskBackup) -> LifecyclePhase {
        match backup.disk_backup_state {
            DiskBackupState::Normal => LifecyclePhase::Active,
            DiskBackupState::Creating => LifecyclePhase::Creating,
            DiskBackupState::Rollbacking | DiskBackupState::Unknown => LifecyclePhase::Mutating,
        }
    }

    async fn fetch(&self, ctx: &Context, id: &ResourceId) -> Result<Option<DiskBackup>> {
        let backup = backup_id(id)?;
        let page = self
            .describe(ctx, json!({ "DiskBackupIds": [backup] }))
            .await?;
        Ok(page.items.into_iter().find(|b| b.disk_backup_id == backup))
    }

    fn create_plan(&self, spec: &DiskBackupSpec) -> Result<LifecyclePlan<Self>> {
        let payload = json!({ "DiskId": spec.disk_id, "DiskBackupName": spec.name });
        let disk_id = spec.disk_id.clone();
        let name = spec.name.clone();
        let same_disk = Filters::new().with(DiskBackupKey::DiskId, [spec.disk_id.clone()])?;
        let lookup_payload = page_payload(&same_disk, FIRST_PAGE);
        let baseline_payload = lookup_payload.clone();
        let lookup = *self;

        let create = Step::submit("create", move |ctx: &Context, state: &mut PlanState<DiskBackup>| {
            let payload = payload.clone();
            let disk_id = disk_id.clone();
            let baseline = baseline_payload.clone();
            Box::pin(async move {
                if state.preexisting.is_none() {
                    let seen = lookup.describe(ctx, baseline).await?.items;
                    note_preexisting(state, seen.into_iter().map(|b| b.disk_backup_id));
                }
                let reply: CreateReply = ctx
                    .call_as(&Operation::new(CBS, "CreateDiskBackup").payload(payload))
                    .await?;
                state.id = Some(ResourceId::join([disk_id, reply.disk_backup_id])?);
                Ok(())
            })
        })
        .probe(move |ctx: &Context, state: &mut PlanState<DiskBackup>| {
            let payload = lookup_payload.clone();
            let name = name.clone();
            Box::pin(async move {
                let named: Vec<DiskBackup> = lookup
                    .describe(ctx, payload)
                    .await?
                    .items
                    .into_iter()
                    .filter(|b| b.disk_backup_name == name)
                    .collect();
                match adoptable(&*state, named, |b: &DiskBackup| b.disk_backup_id.clone()) {
                    Some(backup) => {
                        state.id = Some(ResourceId::join([backup.disk_id, backup.disk_backup_id])?);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
        })
        .with_budget(self.budgets.provisioning)
        .then_wait(waiter(self, self.budgets.provisioning_poll, WaitFor::Active));

        Ok(StepPlan::new(format!("create disk backup {}", spec.name)).step(create))
    }

    /// Backup points cannot be renamed
    fn update_groups(&self) -> &'static [FieldGroup] {
        &[]
    }

    fn update_plan(
        &self,
        group: &FieldGroup,
        _prior: &DiskBackupSpec,
        _desired: &DiskBackupSpec,
    ) -> Result<LifecyclePlan<Self>> {
        Err(CloudError::InvalidConfig(format!(
            "disk backups have no updatable field group '{}'",
            group.name
        )))
    }

    fn delete_plan(&self, _options: &DeleteOptions) -> Result<LifecyclePlan<Self>> {
        Ok(StepPlan::new("delete disk backup").step(
            destroy("delete", |state: &PlanState<DiskBackup>| {
                let id = state.require_id()?;
                Ok(Operation::new(CBS, "DeleteDiskBackups")
                    .target(id.as_str())
                    .payload(json!({ "DiskBackupIds": [backup_id(id)?] })))
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

    fn observe(&self, backup: &DiskBackup) -> DiskBackupSpec {
        DiskBackupSpec {
            disk_id: backup.disk_id.clone(),
            name: backup.disk_backup_name.clone(),
        }
    }
}

#[async_trait]
impl Listing for DiskBackups {
    type Key = DiskBackupKey;

    fn filter_keys(&self) -> &'static [DiskBackupKey] {
        KEYS
    }

    fn read_budget(&self) -> RetryBudget {
        self.budgets.read
    }

    async fn page(
        &self,
        ctx: &Context,
        filters: &Filters<DiskBackupKey>,
        page: PageRequest,
    ) -> Result<Page<DiskBackup>> {
        self.describe(ctx, page_payload(filters, page)).await
    }
}
