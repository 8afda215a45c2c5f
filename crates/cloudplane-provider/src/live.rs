//! Live streaming domains
//!
//! A domain is addressed by its name. Listing takes plain query parameters
//! rather than a `Filters` array, so the typed filters are translated here.

use crate::steps::{Listing, decode_page, destroy, submit};
use async_trait::async_trait;
use cloudplane_core::{
    Budgets, CloudError, Context, Convergence, DeleteOptions, DeletePolicy, ErrorVerdict,
    FieldGroup, FilterKey, Filters, Lifecycle, LifecyclePhase, LifecyclePlan, Operation, Page,
    PageRequest, PlanState, ResourceId, Result, RetryBudget, Service, Step, StepPlan, WaitFor,
    classify, waiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const LIVE: Service = Service::new("live", "2018-08-01");

const STATUS_FORBIDDEN: i64 = 0;
const STATUS_ENABLED: i64 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    #[default]
    Push,
    Play,
}

impl DomainType {
    fn code(self) -> i64 {
        match self {
            DomainType::Push => 0,
            DomainType::Play => 1,
        }
    }

    fn from_code(code: i64) -> Self {
        if code == 1 {
            DomainType::Play
        } else {
            DomainType::Push
        }
    }
}

/// A domain as reported by `DescribeLiveDomain`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LiveDomain {
    pub name: String,
    /// 0 push, 1 play
    #[serde(rename = "Type")]
    pub domain_type: i64,
    /// 0 forbidden, 1 enabled
    pub status: i64,
    /// 1 mainland, 2 global, 3 outside mainland
    #[serde(default)]
    pub play_type: i64,
    #[serde(default)]
    pub is_delay_live: i64,
    #[serde(default, rename = "CurrentCName")]
    pub current_cname: Option<String>,
    #[serde(default)]
    pub create_time: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveDomainSpec {
    pub name: String,
    #[serde(default)]
    pub domain_type: DomainType,
    #[serde(default)]
    pub play_type: Option<i64>,
    #[serde(default)]
    pub is_delay_live: Option<bool>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveDomainKey {
    DomainStatus,
    DomainType,
    DomainPrefix,
    PlayType,
}

impl FilterKey for LiveDomainKey {
    fn name(self) -> &'static str {
        match self {
            LiveDomainKey::DomainStatus => "domain-status",
            LiveDomainKey::DomainType => "domain-type",
            LiveDomainKey::DomainPrefix => "domain-prefix",
            LiveDomainKey::PlayType => "play-type",
        }
    }
}

impl LiveDomainKey {
    fn param(self) -> &'static str {
        match self {
            LiveDomainKey::DomainStatus => "DomainStatus",
            LiveDomainKey::DomainType => "DomainType",
            LiveDomainKey::DomainPrefix => "DomainPrefix",
            LiveDomainKey::PlayType => "PlayType",
        }
    }
}

const KEYS: &[LiveDomainKey] = &[
    LiveDomainKey::DomainStatus,
    LiveDomainKey::DomainType,
    LiveDomainKey::DomainPrefix,
    LiveDomainKey::PlayType,
];

const GROUPS: &[FieldGroup] = &[
    FieldGroup {
        name: "enabled",
        fields: &["enabled"],
    },
    FieldGroup {
        name: "play type",
        fields: &["play_type"],
    },
];

/// `DescribeLiveDomains` query for one page
fn list_payload(filters: &Filters<LiveDomainKey>, page: PageRequest) -> Result<Value> {
    let mut payload = json!({
        "PageNum": page.offset / page.limit.max(1) + 1,
        "PageSize": page.limit,
    });
    for key in KEYS {
        let Some(values) = filters.values(*key) else {
            continue;
        };
        let [value] = values else {
            return Err(CloudError::InvalidFilter(format!(
                "filter '{}' takes exactly one value",
                key.name()
            )));
        };
        payload[key.param()] = match key {
            LiveDomainKey::DomainPrefix => Value::from(value.as_str()),
            _ => value.parse::<i64>().map(Value::from).map_err(|_| {
                CloudError::InvalidFilter(format!("filter '{}' expects a number, got '{value}'", key.name()))
            })?,
        };
    }
    Ok(payload)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeReply {
    domain_info: LiveDomain,
}

fn toggle(enabled: bool) -> &'static str {
    if enabled {
        "EnableLiveDomain"
    } else {
        "ForbidLiveDomain"
    }
}

fn status_is(enabled: bool) -> WaitFor<LiveDomain> {
    let want = if enabled { STATUS_ENABLED } else { STATUS_FORBIDDEN };
    WaitFor::custom(move |domain: Option<&LiveDomain>| match domain {
        Some(d) if d.status == want => Convergence::Done,
        Some(_) => Convergence::Continue,
        None => Convergence::Abort("domain disappeared".into()),
    })
}

/// Live streaming push and play domains
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveDomains {
    budgets: Budgets,
}

impl LiveDomains {
    pub fn new(budgets: Budgets) -> Self {
        Self { budgets }
    }

    fn toggle_step(&self, enabled: bool) -> Step<PlanState<LiveDomain>> {
        submit(
            if enabled { "enable" } else { "forbid" },
            move |state: &PlanState<LiveDomain>| {
                let id = state.require_id()?;
                Ok(Operation::new(LIVE, toggle(enabled))
                    .target(id.as_str())
                    .payload(json!({ "DomainName": id.as_str() })))
            },
        )
        .with_budget(self.budgets.write)
        .then_wait(waiter(self, self.budgets.short_poll, status_is(enabled)))
    }
}

#[async_trait]
impl Lifecycle for LiveDomains {
    type Spec = LiveDomainSpec;
    type Object = LiveDomain;

    fn kind(&self) -> &'static str {
        "live-domain"
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::ConfirmedAbsent
    }

    /// Forbidden domains are a settled state too.
    fn phase(&self, _domain: &LiveDomain) -> LifecyclePhase {
        LifecyclePhase::Active
    }

    async fn fetch(&self, ctx: &Context, id: &ResourceId) -> Result<Option<LiveDomain>> {
        let op = Operation::new(LIVE, "DescribeLiveDomain")
            .target(id.as_str())
            .payload(json!({ "DomainName": id.as_str() }));
        match ctx.call_as::<DescribeReply>(&op).await {
            Ok(reply) => Ok(Some(reply.domain_info)),
            Err(err) if classify(&err) == ErrorVerdict::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn create_plan(&self, spec: &LiveDomainSpec) -> Result<LifecyclePlan<Self>> {
        let id = ResourceId::join([spec.name.as_str()])?;
        let mut payload = json!({
            "DomainName": spec.name,
            "DomainType": spec.domain_type.code(),
            "PlayType": spec.play_type.unwrap_or(1),
        });
        if let Some(delay) = spec.is_delay_live {
            payload["IsDelayLive"] = i64::from(delay).into();
        }
        let lookup = *self;

        let add = Step::submit("add", move |ctx: &Context, state: &mut PlanState<LiveDomain>| {
            state.id = Some(id.clone());
            let op = Operation::new(LIVE, "AddLiveDomain")
                .target(id.as_str())
                .payload(payload.clone());
            Box::pin(async move {
                ctx.call(&op).await?;
                Ok(())
            })
        })
        .probe(move |ctx: &Context, state: &mut PlanState<LiveDomain>| {
            Box::pin(async move {
                let id = state.require_id()?.clone();
                Ok(lookup.fetch(ctx, &id).await?.is_some())
            })
        })
        .with_budget(self.budgets.write)
        .then_wait(waiter(self, self.budgets.short_poll, WaitFor::Exists));

        Ok(StepPlan::new(format!("create live domain {}", spec.name))
            .step(add)
            .step(self.toggle_step(spec.enabled)))
    }

    fn update_groups(&self) -> &'static [FieldGroup] {
        GROUPS
    }

    fn update_plan(
        &self,
        group: &FieldGroup,
        _prior: &LiveDomainSpec,
        desired: &LiveDomainSpec,
    ) -> Result<LifecyclePlan<Self>> {
        let plan = StepPlan::new(format!("update live domain {}", group.name));
        match group.name {
            "enabled" => Ok(plan.step(self.toggle_step(desired.enabled))),
            "play type" => {
                let play_type = desired.play_type.unwrap_or(1);
                Ok(plan.step(submit("play type", move |state: &PlanState<LiveDomain>| {
                    let id = state.require_id()?;
                    Ok(Operation::new(LIVE, "ModifyLivePlayDomain")
                        .target(id.as_str())
                        .payload(json!({ "DomainName": id.as_str(), "PlayType": play_type })))
                })))
            }
            other => Err(CloudError::InvalidConfig(format!(
                "unknown live domain field group '{other}'"
            ))),
        }
    }

    fn delete_plan(&self, _options: &DeleteOptions) -> Result<LifecyclePlan<Self>> {
        Ok(StepPlan::new("delete live domain").step(
            destroy("delete", |state: &PlanState<LiveDomain>| {
                let id = state.require_id()?;
                let domain_type = state
                    .observed
                    .as_ref()
                    .map(|d| d.domain_type)
                    .unwrap_or_default();
                Ok(Operation::new(LIVE, "DeleteLiveDomain")
                    .target(id.as_str())
                    .payload(json!({ "DomainName": id.as_str(), "DomainType": domain_type })))
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

    fn observe(&self, domain: &LiveDomain) -> LiveDomainSpec {
        LiveDomainSpec {
            name: domain.name.clone(),
            domain_type: DomainType::from_code(domain.domain_type),
            play_type: Some(domain.play_type),
            is_delay_live: Some(domain.is_delay_live == 1),
            enabled: domain.status == STATUS_ENABLED,
        }
    }
}

#[async_trait]
impl Listing for LiveDomains {
    type Key = LiveDomainKey;

    fn filter_keys(&self) -> &'static [LiveDomainKey] {
        KEYS
    }

    fn read_budget(&self) -> RetryBudget {
        self.budgets.read
    }

    async fn page(
        &self,
        ctx: &Context,
        filters: &Filters<LiveDomainKey>,
        page: PageRequest,
    ) -> Result<Page<LiveDomain>> {
        let payload = list_payload(filters, page)?;
        let reply = ctx
            .call(&Operation::new(LIVE, "DescribeLiveDomains").payload(payload))
            .await?;
        decode_page("DescribeLiveDomains", reply, "AllCount", "DomainList")
    }
}
