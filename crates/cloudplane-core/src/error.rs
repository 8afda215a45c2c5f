//! Error types for the reconciliation engine

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the remote client and the engine itself
#[derive(Error, Debug)]
pub enum CloudError {
    /// The remote API answered with an error code
    #[error("API error [{code}]: {message}")]
    Api {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    /// The request may or may not have been delivered (network, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A poll ran out of time while the object was still converging
    #[error("Timed out after {waited:?} waiting for {operation}; the object is still converging")]
    DeadlineExceeded { operation: String, waited: Duration },

    /// A poll observed a terminal bad status
    #[error("{operation} aborted: {reason}")]
    Aborted { operation: String, reason: String },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<CloudError>,
    },

    #[error("Invalid resource id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The response did not have the expected shape
    #[error("Unexpected response from {action}: {reason}")]
    Decode { action: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Api {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn decode(action: impl Into<String>, reason: impl Into<String>) -> Self {
        CloudError::Decode {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// The remote error code, if this error came from the API
    pub fn code(&self) -> Option<&str> {
        match self {
            CloudError::Api { code, .. } => Some(code),
            CloudError::RetriesExhausted { last, .. } => last.code(),
            _ => None,
        }
    }

    /// Whether this is a poll deadline, possibly behind a retry wrapper
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, CloudError::DeadlineExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
