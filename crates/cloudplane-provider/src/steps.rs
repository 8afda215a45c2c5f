//! Step builders and listing shared by every object kind

use async_trait::async_trait;
use cloudplane_core::{
    CloudError, Context, ErrorVerdict, FilterKey, Filters, Lifecycle, Operation, Page,
    PageRequest, PlanState, Result, RetryBudget, Step, classify, describe_all,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::info;

/// Largest page every describe action accepts
pub const PAGE_SIZE: usize = 100;

/// First full page, for lookups by name
pub const FIRST_PAGE: PageRequest = PageRequest {
    offset: 0,
    limit: PAGE_SIZE,
};

/// A step that sends one operation built from the plan state.
pub fn submit<O, F>(name: impl Into<String>, build: F) -> Step<PlanState<O>>
where
    O: Send + Sync + 'static,
    F: Fn(&PlanState<O>) -> Result<Operation> + Send + Sync + 'static,
{
    Step::submit(name, move |ctx: &Context, state: &mut PlanState<O>| {
        let operation = build(state);
        Box::pin(async move {
            ctx.call(&operation?).await?;
            Ok(())
        })
    })
}

/// Like [`submit`], but a not-found reply means the object is already gone.
pub fn destroy<O, F>(name: impl Into<String>, build: F) -> Step<PlanState<O>>
where
    O: Send + Sync + 'static,
    F: Fn(&PlanState<O>) -> Result<Operation> + Send + Sync + 'static,
{
    let name = name.into();
    let label = name.clone();
    Step::submit(name, move |ctx: &Context, state: &mut PlanState<O>| {
        let operation = build(state);
        let label = label.clone();
        Box::pin(async move {
            match ctx.call(&operation?).await {
                Ok(_) => Ok(()),
                Err(err) if classify(&err) == ErrorVerdict::NotFound => {
                    info!(step = %label, "Object already gone");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    })
    .destructive()
}

/// The single element of a describe result, if any.
pub fn only<T>(items: Vec<T>) -> Option<T> {
    items.into_iter().next()
}

/// A lookup by name matched exactly one object.
pub fn unique<T>(items: Vec<T>) -> Option<T> {
    if items.len() == 1 { only(items) } else { None }
}

/// Remember which look-alike objects exist before the first create submission.
/// Later calls keep the first record.
pub fn note_preexisting<O>(state: &mut PlanState<O>, ids: impl IntoIterator<Item = String>) {
    if state.preexisting.is_none() {
        state.preexisting = Some(ids.into_iter().collect());
    }
}

/// The one candidate a create probe may adopt: it must not have existed
/// before the plan first submitted. Nothing is adoptable while that is unknown.
pub fn adoptable<O, T>(
    state: &PlanState<O>,
    candidates: Vec<T>,
    id_of: impl Fn(&T) -> String,
) -> Option<T> {
    let preexisting = state.preexisting.as_ref()?;
    unique(
        candidates
            .into_iter()
            .filter(|c| !preexisting.contains(&id_of(c)))
            .collect(),
    )
}

/// `Offset`/`Limit` describe payload with optional `Filters`
pub fn page_payload<K: FilterKey>(filters: &Filters<K>, page: PageRequest) -> Value {
    let mut payload = json!({
        "Offset": page.offset,
        "Limit": page.limit,
    });
    if !filters.is_empty() {
        payload["Filters"] = filters.to_value();
    }
    payload
}

/// Read `total` and `items` out of a describe reply.
pub fn decode_page<T: DeserializeOwned>(
    action: &str,
    mut reply: Value,
    total_field: &str,
    set_field: &str,
) -> Result<Page<T>> {
    let total = reply
        .get(total_field)
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize;
    let items = match reply.get_mut(set_field).map(Value::take) {
        None | Some(Value::Null) => Vec::new(),
        Some(set) => serde_json::from_value(set)
            .map_err(|e| CloudError::decode(action, format!("{set_field}: {e}")))?,
    };
    Ok(Page { items, total })
}

/// Describe every object of a kind that matches a set of filters
#[async_trait]
pub trait Listing: Lifecycle {
    type Key: FilterKey + Send + Sync + 'static;

    /// Filter names the describe action accepts
    fn filter_keys(&self) -> &'static [Self::Key];

    /// Retry budget for each page call
    fn read_budget(&self) -> RetryBudget;

    async fn page(
        &self,
        ctx: &Context,
        filters: &Filters<Self::Key>,
        page: PageRequest,
    ) -> Result<Page<Self::Object>>;

    /// All matching objects in remote order, fetched with `workers` concurrent pages.
    async fn list(
        &self,
        ctx: &Context,
        filters: &Filters<Self::Key>,
        workers: usize,
    ) -> Result<Vec<Self::Object>> {
        let label = format!("list {}", self.kind());
        let budget = self.read_budget();
        describe_all(&label, &budget, workers, PAGE_SIZE, |page| {
            self.page(ctx, filters, page)
        })
        .await
    }
}
