use super::CBS;
use crate::steps::{
    FIRST_PAGE, Listing, adoptable, decode_page, destroy, note_preexisting, page_payload, submit,
};
use crate::tags::{Tag, tag_map, tag_step};
use async_trait::async_trait;
use cloudplane_core::{
    Budgets, ChangeSet, CloudError, Context, Convergence, DeleteOptions, DeletePolicy, FieldGroup,
    FilterKey, Filters, Lifecycle, LifecyclePhase, LifecyclePlan, Operation, Page, PageRequest,
    PlanState, ResourceId, Result, RetryBudget, Step, StepPlan, WaitFor, waiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

const POSTPAID: &str = "POSTPAID_BY_HOUR";
const PREPAID: &str = "PREPAID";

/// Disk status as reported by `DescribeDisks`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiskState {
    Unattached,
    Attaching,
    Attached,
    Detaching,
    Expanding,
    Rollbacking,
    /// In the recycle bin
    Torecycle,
    Dumping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Placement {
    pub zone: String,
    #[serde(default)]
    pub project_id: Option<u64>,
}

/// A cloud disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Disk {
    pub disk_id: String,
    #[serde(default)]
    pub disk_name: String,
    #[serde(default)]
    pub disk_type: String,
    pub disk_size: u64,
    pub disk_state: DiskState,
    #[serde(default)]
    pub disk_charge_type: String,
    #[serde(default)]
    pub renew_flag: Option<String>,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub portable: bool,
    #[serde(default)]
    pub attached: bool,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub disk_backup_quota: Option<u64>,
    #[serde(default)]
    pub rollbacking: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Desired state of a disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub name: String,
    pub zone: String,
    /// e.g. `CLOUD_PREMIUM`, `CLOUD_SSD`
    pub disk_type: String,
    /// GiB
    pub size: u64,
    #[serde(default)]
    pub charge_type: Option<String>,
    /// Months, prepaid disks only
    #[serde(default)]
    pub period: Option<u64>,
    #[serde(default)]
    pub renew_flag: Option<String>,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub portable: Option<bool>,
    /// Create from, or roll back to, this snapshot
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub encrypt: Option<bool>,
    #[serde(default)]
    pub backup_quota: Option<u64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskKey {
    DiskId,
    DiskName,
    Zone,
    DiskType,
    DiskState,
    DiskChargeType,
    Portable,
    ProjectId,
    InstanceId,
}

impl FilterKey for DiskKey {
    fn name(self) -> &'static str {
        match self {
            DiskKey::DiskId => "disk-id",
            DiskKey::DiskName => "disk-name",
            DiskKey::Zone => "zone",
            DiskKey::DiskType => "disk-type",
            DiskKey::DiskState => "disk-state",
            DiskKey::DiskChargeType => "disk-charge-type",
            DiskKey::Portable => "portable",
            DiskKey::ProjectId => "project-id",
            DiskKey::InstanceId => "instance-id",
        }
    }
}

const KEYS: &[DiskKey] = &[
    DiskKey::DiskId,
    DiskKey::DiskName,
    DiskKey::Zone,
    DiskKey::DiskType,
    DiskKey::DiskState,
    DiskKey::DiskChargeType,
    DiskKey::Portable,
    DiskKey::ProjectId,
    DiskKey::InstanceId,
];

// Charge type, renew flag and resize cannot be in flight at the same time,
// so each gets its own group.
const GROUPS: &[FieldGroup] = &[
    FieldGroup {
        name: "attributes",
        fields: &["name", "project_id", "portable"],
    },
    FieldGroup {
        name: "snapshot rollback",
        fields: &["snapshot_id"],
    },
    FieldGroup {
        name: "resize",
        fields: &["size"],
    },
    FieldGroup {
        name: "charge type",
        fields: &["charge_type", "period"],
    },
    FieldGroup {
        name: "renew flag",
        fields: &["renew_flag"],
    },
    FieldGroup {
        name: "backup quota",
        fields: &["backup_quota"],
    },
    FieldGroup {
        name: "tags",
        fields: &["tags"],
    },
];

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateReply {
    disk_id_set: Vec<String>,
}

/// Cloud disks
#[derive(Debug, Clone, Copy, Default)]
pub struct Disks {
    budgets: Budgets,
}

impl Disks {
    pub fn new(budgets: Budgets) -> Self {
        Self { budgets }
    }

    async fn describe(&self, ctx: &Context, payload: Value) -> Result<Page<Disk>> {
        let reply = ctx
            .call(&Operation::new(CBS, "DescribeDisks").payload(payload))
            .await?;
        decode_page("DescribeDisks", reply, "TotalCount", "DiskSet")
    }

    /// `CreateDisks` with the plan's client token. After an ambiguous failure
    /// the probe adopts only a disk that matches the spec and was not there
    /// before the first submission; otherwise the call is resubmitted with the
    /// same token.
    fn create_step(&self, spec: &DiskSpec) -> Result<Step<PlanState<Disk>>> {
        let charge_type = spec.charge_type.clone().unwrap_or_else(|| POSTPAID.to_string());
        let mut payload = json!({
            "Placement": { "Zone": spec.zone },
            "DiskChargeType": charge_type,
            "DiskType": spec.disk_type,
            "DiskName": spec.name,
            "DiskSize": spec.size,
            "DiskCount": 1,
        });
        if let Some(project_id) = spec.project_id {
            payload["Placement"]["ProjectId"] = project_id.into();
        }
        if let Some(snapshot_id) = &spec.snapshot_id {
            payload["SnapshotId"] = snapshot_id.as_str().into();
        }
        if spec.encrypt == Some(true) {
            payload["Encrypt"] = "ENCRYPT".into();
        }
        if charge_type == PREPAID {
            payload["DiskChargePrepaid"] = prepaid(spec);
        }

        let lookup = *self;
        let same_name = Filters::new()
            .with(DiskKey::DiskName, [spec.name.clone()])?
            .with(DiskKey::Zone, [spec.zone.clone()])?;
        let lookup_payload = page_payload(&same_name, FIRST_PAGE);
        let baseline_payload = lookup_payload.clone();
        let disk_type = spec.disk_type.clone();
        let size = spec.size;

        Ok(Step::submit("create", move |ctx: &Context, state: &mut PlanState<Disk>| {
            let mut payload = payload.clone();
            payload["ClientToken"] = state.client_token.as_str().into();
            let baseline = baseline_payload.clone();
            Box::pin(async move {
                if state.preexisting.is_none() {
                    let seen = lookup.describe(ctx, baseline).await?.items;
                    note_preexisting(state, seen.into_iter().map(|d| d.disk_id));
                }
                let reply: CreateReply = ctx
                    .call_as(&Operation::new(CBS, "CreateDisks").payload(payload))
                    .await?;
                let id = reply
                    .disk_id_set
                    .into_iter()
                    .next()
                    .ok_or_else(|| CloudError::decode("CreateDisks", "empty DiskIdSet"))?;
                state.id = Some(ResourceId::join([id])?);
                Ok(())
            })
        })
        .probe(move |ctx: &Context, state: &mut PlanState<Disk>| {
            let payload = lookup_payload.clone();
            let disk_type = disk_type.clone();
            Box::pin(async move {
                let candidates: Vec<Disk> = lookup
                    .describe(ctx, payload)
                    .await?
                    .items
                    .into_iter()
                    .filter(|d| d.disk_type == disk_type && d.disk_size == size)
                    .collect();
                match adoptable(&*state, candidates, |d: &Disk| d.disk_id.clone()) {
                    Some(disk) => {
                        state.id = Some(ResourceId::join([disk.disk_id])?);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
        })
        .with_budget(self.budgets.provisioning)
        .then_wait(waiter(self, self.budgets.provisioning_poll, WaitFor::Exists)))
    }

    fn backup_quota_step(&self, quota: u64) -> Step<PlanState<Disk>> {
        submit("backup quota", move |state: &PlanState<Disk>| {
            let id = state.require_id()?;
            Ok(Operation::new(CBS, "ModifyDiskBackupQuota")
                .target(id.as_str())
                .payload(json!({ "DiskId": id.as_str(), "DiskBackupQuota": quota })))
        })
        .with_budget(self.budgets.write)
    }

    fn wait_active(&self, name: &str) -> Step<PlanState<Disk>> {
        Step::wait(name, waiter(self, self.budgets.poll, WaitFor::Active))
    }
}

fn prepaid(spec: &DiskSpec) -> Value {
    let mut prepaid = json!({ "Period": spec.period.unwrap_or(1) });
    if let Some(flag) = &spec.renew_flag {
        prepaid["RenewFlag"] = flag.as_str().into();
    }
    prepaid
}

/// Done once a resize has settled on `target` GiB
fn resized_to(target: u64) -> WaitFor<Disk> {
    WaitFor::custom(move |disk: Option<&Disk>| match disk {
        Some(d) if d.disk_size == target && d.disk_state != DiskState::Expanding => {
            Convergence::Done
        }
        Some(_) => Convergence::Continue,
        None => Convergence::Abort("disk disappeared during resize".into()),
    })
}

fn rolled_back() -> WaitFor<Disk> {
    WaitFor::custom(|disk: Option<&Disk>| match disk {
        Some(d) if d.rollbacking || d.disk_state == DiskState::Rollbacking => Convergence::Continue,
        Some(_) => Convergence::Done,
        None => Convergence::Abort("disk disappeared during snapshot rollback".into()),
    })
}

fn detached() -> WaitFor<Disk> {
    WaitFor::custom(|disk: Option<&Disk>| match disk {
        Some(d) if d.disk_state == DiskState::Unattached => Convergence::Done,
        Some(_) => Convergence::Continue,
        None => Convergence::Done,
    })
}

fn in_recycle_bin(state: &PlanState<Disk>) -> bool {
    state
        .observed
        .as_ref()
        .is_some_and(|d| d.disk_state == DiskState::Torecycle)
}

#[async_trait]
impl Lifecycle for Disks {
    type Spec = DiskSpec;
    type Object = Disk;

    fn kind(&self) -> &'static str {
        "disk"
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::TwoPhase
    }

    fn phase(&self, disk: &Disk) -> LifecyclePhase {
        match disk.disk_state {
            DiskState::Unattached | DiskState::Attached => LifecyclePhase::Active,
            DiskState::Attaching
            | DiskState::Detaching
            | DiskState::Expanding
            | DiskState::Rollbacking
            | DiskState::Dumping
            | DiskState::Unknown => LifecyclePhase::Mutating,
            DiskState::Torecycle => LifecyclePhase::SoftDeleted,
        }
    }

    async fn fetch(&self, ctx: &Context, id: &ResourceId) -> Result<Option<Disk>> {
        let page = self
            .describe(ctx, json!({ "DiskIds": [id.as_str()] }))
            .await?;
        Ok(page.items.into_iter().find(|d| d.disk_id == id.as_str()))
    }

    fn create_plan(&self, spec: &DiskSpec) -> Result<LifecyclePlan<Self>> {
        let mut plan = StepPlan::new(format!("create disk {}", spec.name)).step(self.create_step(spec)?);

        if let Some(quota) = spec.backup_quota {
            plan.push(self.backup_quota_step(quota).best_effort());
        }
        if !spec.tags.is_empty() {
            plan.push(tag_step("cbs", "volume", BTreeMap::new(), spec.tags.clone()).best_effort());
        }

        Ok(plan.step(Step::wait(
            "active",
            waiter(self, self.budgets.provisioning_poll, WaitFor::Active),
        )))
    }

    fn update_groups(&self) -> &'static [FieldGroup] {
        GROUPS
    }

    fn update_plan(
        &self,
        group: &FieldGroup,
        prior: &DiskSpec,
        desired: &DiskSpec,
    ) -> Result<LifecyclePlan<Self>> {
        let plan = StepPlan::new(format!("update disk {}", group.name));
        let desired = desired.clone();

        let plan = match group.name {
            "attributes" => {
                let changes = ChangeSet::between(prior, &desired)?;
                let mut attributes = json!({});
                if changes.has_change("name") {
                    attributes["DiskName"] = desired.name.as_str().into();
                }
                if let Some(project_id) = desired.project_id.filter(|_| changes.has_change("project_id")) {
                    attributes["ProjectId"] = project_id.into();
                }
                if let Some(portable) = desired.portable.filter(|_| changes.has_change("portable")) {
                    attributes["Portable"] = portable.into();
                }
                plan.step(submit("attributes", move |state: &PlanState<Disk>| {
                    let id = state.require_id()?;
                    let mut payload = attributes.clone();
                    payload["DiskIds"] = json!([id.as_str()]);
                    Ok(Operation::new(CBS, "ModifyDiskAttributes")
                        .target(id.as_str())
                        .payload(payload))
                }))
                .step(self.wait_active("attributes settled"))
            }
            "snapshot rollback" => {
                let snapshot_id = desired.snapshot_id.ok_or_else(|| {
                    CloudError::InvalidConfig("snapshot_id cannot be unset on an existing disk".into())
                })?;
                plan.step(
                    submit("apply snapshot", move |state: &PlanState<Disk>| {
                        let id = state.require_id()?;
                        Ok(Operation::new(CBS, "ApplySnapshot")
                            .target(id.as_str())
                            .payload(json!({ "DiskId": id.as_str(), "SnapshotId": snapshot_id })))
                    })
                    .with_budget(self.budgets.provisioning)
                    .then_wait(waiter(self, self.budgets.provisioning_poll, rolled_back())),
                )
            }
            "resize" => {
                if desired.size < prior.size {
                    return Err(CloudError::InvalidConfig(format!(
                        "disk size cannot shrink from {} to {} GiB",
                        prior.size, desired.size
                    )));
                }
                let target = desired.size;
                plan.step(
                    submit("resize", move |state: &PlanState<Disk>| {
                        let id = state.require_id()?;
                        Ok(Operation::new(CBS, "ResizeDisk")
                            .target(id.as_str())
                            .payload(json!({ "DiskId": id.as_str(), "DiskSize": target })))
                    })
                    .with_budget(self.budgets.provisioning)
                    .then_wait(waiter(self, self.budgets.provisioning_poll, resized_to(target))),
                )
            }
            "charge type" => plan
                .step(submit("charge type", move |state: &PlanState<Disk>| {
                    let id = state.require_id()?;
                    let mut payload = json!({ "DiskIds": [id.as_str()] });
                    match desired.charge_type.as_deref() {
                        Some(PREPAID) => payload["DiskChargePrepaid"] = prepaid(&desired),
                        _ => payload["DiskChargePostpaid"] = true.into(),
                    }
                    Ok(Operation::new(CBS, "ModifyDisksChargeType")
                        .target(id.as_str())
                        .payload(payload))
                }))
                .step(self.wait_active("charge type settled")),
            "renew flag" => {
                let flag = desired.renew_flag.ok_or_else(|| {
                    CloudError::InvalidConfig("renew_flag cannot be unset once applied".into())
                })?;
                plan.step(submit("renew flag", move |state: &PlanState<Disk>| {
                    let id = state.require_id()?;
                    Ok(Operation::new(CBS, "ModifyDisksRenewFlag")
                        .target(id.as_str())
                        .payload(json!({ "DiskIds": [id.as_str()], "RenewFlag": flag })))
                }))
            }
            "backup quota" => {
                let quota = desired.backup_quota.ok_or_else(|| {
                    CloudError::InvalidConfig("backup_quota cannot be unset once applied".into())
                })?;
                plan.step(self.backup_quota_step(quota))
            }
            "tags" => plan.step(tag_step("cbs", "volume", prior.tags.clone(), desired.tags)),
            other => {
                return Err(CloudError::InvalidConfig(format!("unknown disk field group '{other}'")));
            }
        };
        Ok(plan)
    }

    fn delete_plan(&self, options: &DeleteOptions) -> Result<LifecyclePlan<Self>> {
        let DeleteOptions { force, detach } = *options;
        let terminate = |state: &PlanState<Disk>| -> Result<Operation> {
            let id = state.require_id()?;
            Ok(Operation::new(CBS, "TerminateDisks")
                .target(id.as_str())
                .payload(json!({ "DiskIds": [id.as_str()] })))
        };

        Ok(StepPlan::new("delete disk")
            .step(
                submit("detach", |state: &PlanState<Disk>| {
                    let id = state.require_id()?;
                    Ok(Operation::new(CBS, "DetachDisks")
                        .target(id.as_str())
                        .payload(json!({ "DiskIds": [id.as_str()] })))
                })
                .only_if(move |state: &PlanState<Disk>| {
                    detach && state.observed.as_ref().is_some_and(|d| d.attached)
                })
                .then_wait(waiter(self, self.budgets.poll, detached())),
            )
            .step(
                destroy("terminate", terminate)
                    .only_if(|state: &PlanState<Disk>| !in_recycle_bin(state))
                    .then_wait(waiter(
                        self,
                        self.budgets.poll,
                        WaitFor::Gone {
                            accept_soft_deleted: self.delete_policy().accepts_soft_deleted(),
                        },
                    )),
            )
            .step(
                destroy("purge", terminate)
                    .only_if(move |state: &PlanState<Disk>| force && in_recycle_bin(state))
                    .then_wait(waiter(
                        self,
                        self.budgets.poll,
                        WaitFor::Gone {
                            accept_soft_deleted: false,
                        },
                    )),
            ))
    }

    fn observe(&self, disk: &Disk) -> DiskSpec {
        DiskSpec {
            name: disk.disk_name.clone(),
            zone: disk.placement.zone.clone(),
            disk_type: disk.disk_type.clone(),
            size: disk.disk_size,
            charge_type: Some(disk.disk_charge_type.clone()).filter(|c| !c.is_empty()),
            period: None,
            renew_flag: disk.renew_flag.clone(),
            project_id: disk.placement.project_id,
            portable: Some(disk.portable),
            snapshot_id: None,
            encrypt: Some(disk.encrypt),
            backup_quota: disk.disk_backup_quota,
            tags: tag_map(&disk.tags),
        }
    }
}

#[async_trait]
impl Listing for Disks {
    type Key = DiskKey;

    fn filter_keys(&self) -> &'static [DiskKey] {
        KEYS
    }

    fn read_budget(&self) -> RetryBudget {
        self.budgets.read
    }

    async fn page(
        &self,
        ctx: &Context,
        filters: &Filters<DiskKey>,
        page: PageRequest,
    ) -> Result<Page<Disk>> {
        self.describe(ctx, page_payload(filters, page)).await
    }
}
