//! Resource tags through the tag service

use cloudplane_core::{Context, Operation, PlanState, Service, Step};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

pub const TAG: Service = Service::new("tag", "2018-08-13");

/// A tag as the describe actions report it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

pub fn tag_map(tags: &[Tag]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|t| (t.key.clone(), t.value.clone()))
        .collect()
}

/// Six-segment resource name, e.g. `qcs::cbs:ap-guangzhou:uin/:volume/disk-123`
pub fn resource_name(service: &str, region: &str, resource_type: &str, id: &str) -> String {
    format!("qcs::{service}:{region}:uin/:{resource_type}/{id}")
}

/// `ModifyResourceTags` payload turning `prior` into `desired`, or `None` if they match.
pub fn modify_payload(
    resource: &str,
    prior: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Option<serde_json::Value> {
    let replace: Vec<_> = desired
        .iter()
        .filter(|(k, v)| prior.get(*k) != Some(*v))
        .map(|(k, v)| json!({ "TagKey": k, "TagValue": v }))
        .collect();
    let delete: Vec<_> = prior
        .keys()
        .filter(|k| !desired.contains_key(*k))
        .map(|k| json!({ "TagKey": k }))
        .collect();

    if replace.is_empty() && delete.is_empty() {
        return None;
    }

    let mut payload = json!({ "Resource": resource });
    if !replace.is_empty() {
        payload["ReplaceTags"] = replace.into();
    }
    if !delete.is_empty() {
        payload["DeleteTags"] = delete.into();
    }
    Some(payload)
}

/// Step applying tag changes to the object in the plan state
pub fn tag_step<O: Send + Sync + 'static>(
    service: &'static str,
    resource_type: &'static str,
    prior: BTreeMap<String, String>,
    desired: BTreeMap<String, String>,
) -> Step<PlanState<O>> {
    Step::submit("tags", move |ctx: &Context, state: &mut PlanState<O>| {
        let payload = state.require_id().map(|id| {
            let resource = resource_name(service, ctx.region(), resource_type, id.as_str());
            modify_payload(&resource, &prior, &desired)
        });
        Box::pin(async move {
            if let Some(payload) = payload? {
                ctx.call(&Operation::new(TAG, "ModifyResourceTags").payload(payload))
                    .await?;
            }
            Ok(())
        })
    })
}
