use async_trait::async_trait;
use cloudplane_core::{
    CloudError, Context, DeleteOptions, DeletePolicy, FieldGroup, Lifecycle, LifecyclePhase,
    LifecyclePlan, Operation, PlanState, PollSpec, RateGate, RemoteClient, ResourceId, Result,
    Service, Step, StepPlan, WaitFor, waiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub const CBS: Service = Service::new("cbs", "2017-03-12");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Disk {
    pub disk_id: String,
    pub disk_name: String,
    pub disk_size: u32,
    pub disk_state: String,
    pub backup_quota: u32,
    pub disk_charge_type: String,
    pub client_token: String,
    /// Size a pending resize will settle on
    #[serde(skip)]
    pub pending_size: Option<u32>,
}

#[derive(Default)]
struct Store {
    disks: BTreeMap<String, Disk>,
    next_id: u32,
    calls: Vec<String>,
    fail_next: HashMap<&'static str, VecDeque<CloudError>>,
    lose_reply: HashSet<&'static str>,
}

/// In-memory stand-in for the block storage API
#[derive(Default)]
pub struct FakeCloud {
    store: Mutex<Store>,
    recycle: bool,
    stuck_delete: bool,
    token_conflict: bool,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// First TerminateDisks moves the disk to the recycle bin
    pub fn recycling(mut self) -> Self {
        self.recycle = true;
        self
    }

    /// TerminateDisks never finishes
    pub fn stuck_delete(mut self) -> Self {
        self.stuck_delete = true;
        self
    }

    /// A repeated ClientToken is rejected as a duplicate
    pub fn token_conflict(mut self) -> Self {
        self.token_conflict = true;
        self
    }

    /// Fail the next call of `action` with `error`, before it takes effect.
    pub fn fail_next(&self, action: &'static str, error: CloudError) {
        let mut store = self.store.lock().unwrap();
        store.fail_next.entry(action).or_default().push_back(error);
    }

    /// Apply the next call of `action` but report a transport failure.
    pub fn lose_reply(&self, action: &'static str) {
        self.store.lock().unwrap().lose_reply.insert(action);
    }

    pub fn insert(&self, disk: Disk) {
        let mut store = self.store.lock().unwrap();
        store.disks.insert(disk.disk_id.clone(), disk);
    }

    pub fn disk(&self, id: &str) -> Option<Disk> {
        self.store.lock().unwrap().disks.get(id).cloned()
    }

    pub fn disk_count(&self) -> usize {
        self.store.lock().unwrap().disks.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.store.lock().unwrap().calls.clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.calls().iter().filter(|c| *c == action).count()
    }

    /// Calls other than describes, in order
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("Describe"))
            .collect()
    }

    fn apply(&self, store: &mut Store, operation: &Operation) -> Result<Value> {
        let payload = &operation.payload;
        match operation.action {
            "CreateDisks" => {
                let token = payload["ClientToken"].as_str().unwrap_or_default().to_string();
                if self.token_conflict && store.disks.values().any(|d| d.client_token == token) {
                    return Err(CloudError::api(
                        "ResourceInUse.AlreadyExists",
                        "a disk with this client token exists",
                    ));
                }
                store.next_id += 1;
                let id = format!("disk-{:04}", store.next_id);
                store.disks.insert(
                    id.clone(),
                    Disk {
                        disk_id: id.clone(),
                        disk_name: payload["DiskName"].as_str().unwrap_or_default().to_string(),
                        disk_size: payload["DiskSize"].as_u64().unwrap_or_default() as u32,
                        disk_state: "PENDING".into(),
                        backup_quota: 0,
                        disk_charge_type: "POSTPAID_BY_HOUR".into(),
                        client_token: token,
                        pending_size: None,
                    },
                );
                Ok(json!({ "DiskIdSet": [id] }))
            }
            "DescribeDisks" => {
                let matches: Vec<String> = if let Some(id) = payload["DiskIds"][0].as_str() {
                    store.disks.get(id).map(|d| d.disk_id.clone()).into_iter().collect()
                } else {
                    let token = payload["Filters"][0]["Values"][0].as_str().unwrap_or_default();
                    store
                        .disks
                        .values()
                        .filter(|d| d.client_token == token)
                        .map(|d| d.disk_id.clone())
                        .collect()
                };

                let mut set = Vec::new();
                for id in matches {
                    let Some(disk) = store.disks.get_mut(&id) else {
                        continue;
                    };
                    set.push(disk.clone());
                    // asynchronous work finishes after one observation
                    let mut purge = false;
                    match disk.disk_state.clone().as_str() {
                        "PENDING" => disk.disk_state = "UNATTACHED".into(),
                        "EXPANDING" => {
                            disk.disk_size = disk.pending_size.take().unwrap_or(disk.disk_size);
                            disk.disk_state = "UNATTACHED".into();
                        }
                        "TERMINATING" if !self.stuck_delete => {
                            if self.recycle {
                                disk.disk_state = "TORECYCLE".into();
                            } else {
                                purge = true;
                            }
                        }
                        _ => {}
                    }
                    if purge {
                        store.disks.remove(&id);
                    }
                }
                Ok(json!({ "TotalCount": set.len(), "DiskSet": set }))
            }
            "ResizeDisk" => {
                let disk = Self::target(store, payload["DiskId"].as_str())?;
                disk.pending_size = payload["DiskSize"].as_u64().map(|s| s as u32);
                disk.disk_state = "EXPANDING".into();
                Ok(json!({}))
            }
            "ModifyDisksChargeType" => {
                let disk = Self::target(store, payload["DiskIds"][0].as_str())?;
                if disk.disk_state == "EXPANDING" {
                    return Err(CloudError::api(
                        "OperationDenied.DiskOperationConflict",
                        "disk is being resized",
                    ));
                }
                disk.disk_charge_type = payload["DiskChargeType"].as_str().unwrap_or_default().into();
                Ok(json!({}))
            }
            "ModifyDiskAttributes" => {
                let disk = Self::target(store, payload["DiskIds"][0].as_str())?;
                disk.disk_name = payload["DiskName"].as_str().unwrap_or_default().into();
                Ok(json!({}))
            }
            "ModifyDisksBackupQuota" => {
                let disk = Self::target(store, payload["DiskId"].as_str())?;
                disk.backup_quota = payload["DiskBackupQuota"].as_u64().unwrap_or_default() as u32;
                Ok(json!({}))
            }
            "CreateTags" => Ok(json!({})),
            "TerminateDisks" => {
                let id = payload["DiskIds"][0].as_str().unwrap_or_default().to_string();
                let disk = Self::target(store, Some(&id))?;
                if disk.disk_state == "TORECYCLE" {
                    store.disks.remove(&id);
                } else {
                    disk.disk_state = "TERMINATING".into();
                }
                Ok(json!({}))
            }
            other => Err(CloudError::api("InvalidAction", format!("unknown action {other}"))),
        }
    }

    fn target<'a>(store: &'a mut Store, id: Option<&str>) -> Result<&'a mut Disk> {
        let id = id.unwrap_or_default();
        store
            .disks
            .get_mut(id)
            .ok_or_else(|| CloudError::api("InvalidDisk.NotFound", format!("disk {id} not found")))
    }
}

#[async_trait]
impl RemoteClient for FakeCloud {
    async fn invoke(&self, operation: &Operation) -> Result<Value> {
        let mut store = self.store.lock().unwrap();
        store.calls.push(operation.action.to_string());

        if let Some(err) = store
            .fail_next
            .get_mut(operation.action)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        let reply = self.apply(&mut store, operation)?;
        if store.lose_reply.remove(operation.action) {
            return Err(CloudError::Transport("connection reset".into()));
        }
        Ok(reply)
    }
}

pub fn context(cloud: &Arc<FakeCloud>) -> Context {
    Context::new(cloud.clone(), RateGate::unlimited(), "ap-guangzhou")
}

pub fn disk(id: &str, state: &str) -> Disk {
    Disk {
        disk_id: id.into(),
        disk_name: "data".into(),
        disk_size: 50,
        disk_state: state.into(),
        backup_quota: 0,
        disk_charge_type: "POSTPAID_BY_HOUR".into(),
        client_token: String::new(),
        pending_size: None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub name: String,
    pub size: u32,
    pub zone: String,
    pub backup_quota: Option<u32>,
    pub charge_type: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeReply {
    disk_set: Vec<Disk>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateReply {
    disk_id_set: Vec<String>,
}

const GROUPS: &[FieldGroup] = &[
    FieldGroup {
        name: "attributes",
        fields: &["name"],
    },
    FieldGroup {
        name: "resize",
        fields: &["size"],
    },
    FieldGroup {
        name: "charge type",
        fields: &["charge_type"],
    },
    FieldGroup {
        name: "backup quota",
        fields: &["backup_quota"],
    },
];

/// Minimal disk kind wired to [`FakeCloud`]
#[derive(Debug, Clone, Copy)]
pub struct Disks;

impl Disks {
    async fn describe(&self, ctx: &Context, payload: Value) -> Result<Option<Disk>> {
        let reply: DescribeReply = ctx
            .call_as(&Operation::new(CBS, "DescribeDisks").payload(payload))
            .await?;
        Ok(reply.disk_set.into_iter().next())
    }
}

fn submit(
    name: &str,
    build: impl Fn(&ResourceId) -> Operation + Send + Sync + 'static,
) -> Step<PlanState<Disk>> {
    let build = Arc::new(build);
    Step::submit(name, move |ctx: &Context, state: &mut PlanState<Disk>| {
        let build = build.clone();
        Box::pin(async move {
            let op = build(state.require_id()?);
            ctx.call(&op).await?;
            Ok(())
        })
    })
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
        match disk.disk_state.as_str() {
            "PENDING" => LifecyclePhase::Creating,
            "UNATTACHED" | "ATTACHED" => LifecyclePhase::Active,
            "EXPANDING" => LifecyclePhase::Mutating,
            "TERMINATING" => LifecyclePhase::Deleting,
            "TORECYCLE" => LifecyclePhase::SoftDeleted,
            _ => LifecyclePhase::Failed,
        }
    }

    async fn fetch(&self, ctx: &Context, id: &ResourceId) -> Result<Option<Disk>> {
        self.describe(ctx, json!({ "DiskIds": [id.as_str()] })).await
    }

    fn create_plan(&self, spec: &DiskSpec) -> Result<LifecyclePlan<Self>> {
        let create_spec = spec.clone();
        let lookup = *self;

        let mut plan = StepPlan::new("create disk").step(
            Step::submit("create", move |ctx: &Context, state: &mut PlanState<Disk>| {
                let spec = create_spec.clone();
                Box::pin(async move {
                    let op = Operation::new(CBS, "CreateDisks").payload(json!({
                        "DiskName": spec.name,
                        "DiskSize": spec.size,
                        "ClientToken": &state.client_token,
                    }));
                    let reply: CreateReply = ctx.call_as(&op).await?;
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
                Box::pin(async move {
                    let filters = json!({
                        "Filters": [{ "Name": "client-token", "Values": [&state.client_token] }]
                    });
                    match lookup.describe(ctx, filters).await? {
                        Some(disk) => {
                            state.id = Some(ResourceId::join([disk.disk_id])?);
                            Ok(true)
                        }
                        None => Ok(false),
                    }
                })
            })
            .then_wait(waiter(self, PollSpec::short(), WaitFor::Exists)),
        );

        if let Some(quota) = spec.backup_quota {
            plan.push(
                submit("backup quota", move |id| {
                    Operation::new(CBS, "ModifyDisksBackupQuota")
                        .payload(json!({ "DiskId": id.as_str(), "DiskBackupQuota": quota }))
                })
                .best_effort(),
            );
        }
        if !spec.tags.is_empty() {
            let tags = spec.tags.clone();
            plan.push(submit("tags", move |id| {
                Operation::new(CBS, "CreateTags").payload(json!({ "Resource": id.as_str(), "Tags": tags }))
            }));
        }

        Ok(plan.step(Step::wait(
            "active",
            waiter(self, PollSpec::short(), WaitFor::Active),
        )))
    }

    fn update_groups(&self) -> &'static [FieldGroup] {
        GROUPS
    }

    fn update_plan(
        &self,
        group: &FieldGroup,
        _prior: &DiskSpec,
        desired: &DiskSpec,
    ) -> Result<LifecyclePlan<Self>> {
        let desired = desired.clone();
        let plan = StepPlan::new(format!("update disk {}", group.name));
        let plan = match group.name {
            "attributes" => plan.step(submit("rename", move |id| {
                Operation::new(CBS, "ModifyDiskAttributes")
                    .payload(json!({ "DiskIds": [id.as_str()], "DiskName": desired.name }))
            })),
            "resize" => {
                let target = desired.size;
                plan.step(
                    submit("resize", move |id| {
                        Operation::new(CBS, "ResizeDisk")
                            .payload(json!({ "DiskId": id.as_str(), "DiskSize": target }))
                    })
                    .then_wait(waiter(
                        self,
                        PollSpec::standard(),
                        WaitFor::custom(move |disk: Option<&Disk>| match disk {
                            Some(d) if d.disk_size == target && d.disk_state != "EXPANDING" => {
                                cloudplane_core::Convergence::Done
                            }
                            Some(_) => cloudplane_core::Convergence::Continue,
                            None => cloudplane_core::Convergence::Abort("disk vanished".into()),
                        }),
                    )),
                )
            }
            "charge type" => plan.step(submit("charge type", move |id| {
                Operation::new(CBS, "ModifyDisksChargeType").payload(json!({
                    "DiskIds": [id.as_str()],
                    "DiskChargeType": desired.charge_type,
                }))
            })),
            "backup quota" => plan.step(submit("backup quota", move |id| {
                Operation::new(CBS, "ModifyDisksBackupQuota")
                    .payload(json!({ "DiskId": id.as_str(), "DiskBackupQuota": desired.backup_quota }))
            })),
            other => {
                return Err(CloudError::InvalidConfig(format!("unknown field group {other}")));
            }
        };
        Ok(plan)
    }

    fn delete_plan(&self, options: &DeleteOptions) -> Result<LifecyclePlan<Self>> {
        let force = options.force;
        let terminate = |id: &ResourceId| {
            Operation::new(CBS, "TerminateDisks").payload(json!({ "DiskIds": [id.as_str()] }))
        };

        Ok(StepPlan::new("delete disk")
            .step(submit("terminate", terminate).destructive().then_wait(waiter(
                self,
                PollSpec::short(),
                WaitFor::Gone {
                    accept_soft_deleted: self.delete_policy().accepts_soft_deleted(),
                },
            )))
            .step(
                submit("purge", terminate)
                    .destructive()
                    .only_if(move |state: &PlanState<Disk>| {
                        force
                            && state
                                .observed
                                .as_ref()
                                .is_some_and(|d| d.disk_state == "TORECYCLE")
                    })
                    .then_wait(waiter(
                        self,
                        PollSpec::short(),
                        WaitFor::Gone {
                            accept_soft_deleted: false,
                        },
                    )),
            ))
    }

    fn observe(&self, disk: &Disk) -> DiskSpec {
        DiskSpec {
            name: disk.disk_name.clone(),
            size: disk.disk_size,
            zone: "ap-guangzhou-3".into(),
            backup_quota: Some(disk.backup_quota),
            charge_type: Some(disk.disk_charge_type.clone()),
            tags: BTreeMap::new(),
        }
    }
}

pub fn spec(name: &str, size: u32) -> DiskSpec {
    DiskSpec {
        name: name.into(),
        size,
        zone: "ap-guangzhou-3".into(),
        ..Default::default()
    }
}
