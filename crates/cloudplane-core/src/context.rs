//! Remote client seam and the explicitly passed call context

use crate::error::{CloudError, Result};
use crate::ratelimit::RateGate;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// A remote API product and its version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Service {
    pub name: &'static str,
    pub version: &'static str,
}

impl Service {
    pub const fn new(name: &'static str, version: &'static str) -> Self {
        Self { name, version }
    }
}

/// A single request against the remote control plane.
///
/// Mutating operations must be safe to resubmit: delivery of any request can
/// be ambiguous after a transport failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub service: Service,
    pub action: &'static str,
    /// Id of the object the operation targets, for logging
    pub target: Option<String>,
    pub payload: serde_json::Value,
}

impl Operation {
    pub fn new(service: Service, action: &'static str) -> Self {
        Self {
            service,
            action,
            target: None,
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn target(mut self, id: impl Into<String>) -> Self {
        self.target = Some(id.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Transport to the remote control plane.
///
/// Implementations return the `Response` body of a successful call and map
/// remote error replies to [`CloudError::Api`] and delivery failures to
/// [`CloudError::Transport`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn invoke(&self, operation: &Operation) -> Result<serde_json::Value>;
}

/// Everything a reconciliation needs, passed explicitly to every call
#[derive(Clone)]
pub struct Context {
    client: Arc<dyn RemoteClient>,
    gate: Arc<RateGate>,
    region: String,
}

impl Context {
    pub fn new(client: Arc<dyn RemoteClient>, gate: RateGate, region: impl Into<String>) -> Self {
        Self {
            client,
            gate: Arc::new(gate),
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Send one operation through the rate gate.
    pub async fn call(&self, operation: &Operation) -> Result<serde_json::Value> {
        self.gate.acquire(operation.action).await;

        let start = Instant::now();
        let result = self.client.invoke(operation).await;
        debug!(
            region = %self.region,
            service = operation.service.name,
            action = operation.action,
            target = operation.target.as_deref().unwrap_or("-"),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Remote call"
        );
        result
    }

    /// Send one operation and decode its response.
    pub async fn call_as<T: DeserializeOwned>(&self, operation: &Operation) -> Result<T> {
        let value = self.call(operation).await?;
        serde_json::from_value(value).map_err(|e| CloudError::decode(operation.action, e.to_string()))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("region", &self.region)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}
