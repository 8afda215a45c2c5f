//! Signed JSON action API client
//!
//! Every call is `POST https://{service}.{endpoint_suffix}/` with the action,
//! version and region carried in `X-TC-*` headers and the payload as the
//! JSON body. The reply wraps everything in a `Response` object; a
//! `Response.Error` means the call failed.

use crate::sign::{self, SignRequest};
use async_trait::async_trait;
use cloudplane_config::{Config, Credentials};
use cloudplane_core::{CloudError, Operation, RemoteClient, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the remote control plane
pub struct ApiClient {
    client: reqwest::Client,
    credentials: Credentials,
    region: String,
    endpoint_suffix: String,
}

impl ApiClient {
    pub fn new(
        credentials: Credentials,
        region: impl Into<String>,
        endpoint_suffix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CloudError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            credentials,
            region: region.into(),
            endpoint_suffix: endpoint_suffix.into(),
        })
    }

    /// Build a client from loaded configuration. Credentials are required.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = config
            .require_credentials()
            .map_err(|e| CloudError::InvalidConfig(e.to_string()))?
            .clone();
        Self::new(
            credentials,
            &config.region,
            &config.endpoint_suffix,
            Duration::from_secs(config.request_timeout),
        )
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn host(&self, service: &str) -> String {
        format!("{service}.{}", self.endpoint_suffix)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("region", &self.region)
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorBody {
    code: String,
    message: String,
}

/// Unwrap `{"Response": {...}}`, mapping `Response.Error` to [`CloudError::Api`].
pub fn decode_response(action: &str, body: &str) -> Result<Value> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| CloudError::decode(action, e.to_string()))?;
    let mut response = envelope.response;

    if let Some(error) = response.get("Error") {
        let error: ApiErrorBody = serde_json::from_value(error.clone())
            .map_err(|e| CloudError::decode(action, format!("malformed error: {e}")))?;
        return Err(CloudError::Api {
            code: error.code,
            message: error.message,
            request_id: response
                .get("RequestId")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    if let Some(map) = response.as_object_mut() {
        map.remove("RequestId");
    }
    Ok(response)
}

/// Map a reqwest failure. Timeouts and connection errors leave delivery
/// ambiguous, everything reqwest reports is treated as transport.
fn transport_error(action: &str, err: reqwest::Error) -> CloudError {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    CloudError::Transport(format!("{action} {kind}: {err}"))
}

#[async_trait]
impl RemoteClient for ApiClient {
    async fn invoke(&self, operation: &Operation) -> Result<Value> {
        let service = operation.service.name;
        let host = self.host(service);
        let payload = serde_json::to_string(&operation.payload)?;
        let timestamp = chrono::Utc::now().timestamp();

        let authorization = sign::authorization(&SignRequest {
            secret_id: &self.credentials.secret_id,
            secret_key: &self.credentials.secret_key,
            service,
            host: &host,
            action: operation.action,
            payload: &payload,
            timestamp,
        })?;

        let mut request = self
            .client
            .post(format!("https://{host}/"))
            .header("Authorization", authorization)
            .header("Content-Type", sign::CONTENT_TYPE)
            .header("Host", &host)
            .header("X-TC-Action", operation.action)
            .header("X-TC-Version", operation.service.version)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Region", &self.region)
            .body(payload);
        if let Some(token) = &self.credentials.token {
            request = request.header("X-TC-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(operation.action, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(operation.action, e))?;
        debug!(action = operation.action, status = status.as_u16(), bytes = body.len(), "Response received");

        if status.is_server_error() {
            return Err(CloudError::Transport(format!(
                "{} returned HTTP {status}",
                operation.action
            )));
        }
        decode_response(operation.action, &body)
    }
}
