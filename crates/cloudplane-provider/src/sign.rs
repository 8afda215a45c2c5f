//! TC3-HMAC-SHA256 request signing

use chrono::{DateTime, Utc};
use cloudplane_core::{CloudError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

pub const ALGORITHM: &str = "TC3-HMAC-SHA256";
pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SIGNED_HEADERS: &str = "content-type;host;x-tc-action";

/// Inputs of one signature
#[derive(Debug, Clone)]
pub struct SignRequest<'a> {
    pub secret_id: &'a str,
    pub secret_key: &'a str,
    /// Service name, e.g. `cbs`
    pub service: &'a str,
    pub host: &'a str,
    pub action: &'a str,
    pub payload: &'a str,
    pub timestamp: i64,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| CloudError::InvalidConfig(format!("invalid signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn canonical_request(request: &SignRequest<'_>) -> String {
    format!(
        "POST\n/\n\ncontent-type:{CONTENT_TYPE}\nhost:{}\nx-tc-action:{}\n\n{SIGNED_HEADERS}\n{}",
        request.host,
        request.action.to_lowercase(),
        sha256_hex(request.payload.as_bytes()),
    )
}

/// Build the `Authorization` header value.
pub fn authorization(request: &SignRequest<'_>) -> Result<String> {
    let date = DateTime::<Utc>::from_timestamp(request.timestamp, 0)
        .ok_or_else(|| CloudError::InvalidConfig(format!("invalid timestamp {}", request.timestamp)))?
        .format("%Y-%m-%d")
        .to_string();
    let scope = format!("{date}/{}/tc3_request", request.service);

    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        request.timestamp,
        sha256_hex(canonical_request(request).as_bytes()),
    );

    let secret_date = hmac_sha256(format!("TC3{}", request.secret_key).as_bytes(), &date)?;
    let secret_service = hmac_sha256(&secret_date, request.service)?;
    let secret_signing = hmac_sha256(&secret_service, "tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign)?);

    Ok(format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        request.secret_id
    ))
}
