//! Error classification
//!
//! Maps every [`CloudError`] onto one [`ErrorVerdict`] using fixed lists of
//! remote error codes. Classification is pure: the same error always yields
//! the same verdict.

use crate::error::CloudError;
use serde::{Deserialize, Serialize};

/// What the engine should do with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorVerdict {
    /// Transient; the call may be resubmitted within its budget
    Retryable,
    /// Permanent; stop and surface to the caller
    Fatal,
    /// The object does not exist (any more)
    NotFound,
}

impl std::fmt::Display for ErrorVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorVerdict::Retryable => write!(f, "retryable"),
            ErrorVerdict::Fatal => write!(f, "fatal"),
            ErrorVerdict::NotFound => write!(f, "not-found"),
        }
    }
}

/// Prefix shared by all "object is gone" codes
const NOT_FOUND_PREFIX: &str = "ResourceNotFound";

/// Kind-specific codes that also mean the object is gone
const NOT_FOUND_CODES: &[&str] = &["InvalidDisk.NotFound", "InvalidSnapshot.NotFound"];

/// Contention and infrastructure lag
const RETRYABLE_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "RequestLimitExceeded.UinLimitExceeded",
    "InternalError",
    "InternalError.Unknown",
    "ResourceBusy",
    "ResourceInUse",
    "ResourceUnavailable",
    "FailedOperation.DiskBusy",
    "FailedOperation.Busy",
    "ClientError.NetworkError",
    "ClientError.HttpStatusCodeError",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "ResourceAlreadyExists",
    "InvalidParameterValue.AlreadyExists",
    "ResourceInUse.AlreadyExists",
    "FailedOperation.DomainExists",
];

/// Classify an error into a verdict.
pub fn classify(error: &CloudError) -> ErrorVerdict {
    match error {
        CloudError::NotFound(_) => ErrorVerdict::NotFound,
        CloudError::Transport(_) => ErrorVerdict::Retryable,
        CloudError::Api { code, .. } => classify_code(code),
        _ => ErrorVerdict::Fatal,
    }
}

/// Classify a bare remote error code.
pub fn classify_code(code: &str) -> ErrorVerdict {
    if code.starts_with(NOT_FOUND_PREFIX) || NOT_FOUND_CODES.contains(&code) {
        ErrorVerdict::NotFound
    } else if RETRYABLE_CODES.contains(&code) {
        ErrorVerdict::Retryable
    } else {
        ErrorVerdict::Fatal
    }
}

/// Whether the remote side reports that the object being created already exists.
pub fn is_already_exists(error: &CloudError) -> bool {
    match error.code() {
        Some(code) => ALREADY_EXISTS_CODES.contains(&code) || code.ends_with(".AlreadyExists"),
        None => false,
    }
}

const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "AuthFailure.SignatureExpire",
        "The local clock is skewed; sync it and retry.",
    ),
    (
        "AuthFailure",
        "Check the secret id/key in the configuration or CLOUDPLANE_SECRET_* variables.",
    ),
    (
        "UnauthorizedOperation",
        "The credentials lack permission for this action.",
    ),
    (
        "LimitExceeded",
        "A quota was reached; request a quota increase or remove unused objects.",
    ),
    (
        "InvalidAccount.InsufficientBalance",
        "The account balance is insufficient for prepaid resources.",
    ),
    (
        "ResourceInsufficient",
        "The zone is out of capacity; try another zone or disk type.",
    ),
];

/// A user-facing hint for well-known fatal codes. More specific codes come first.
pub fn suggestion(error: &CloudError) -> Option<&'static str> {
    let code = error.code()?;
    SUGGESTIONS
        .iter()
        .find(|(c, _)| code == *c || code.starts_with(&format!("{c}.")))
        .map(|(_, s)| *s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_not_found_codes() {
        for code in [
            "ResourceNotFound",
            "ResourceNotFound.DomainNotExist",
            "ResourceNotFound.ClusterNotFound",
            "InvalidDisk.NotFound",
        ] {
            assert_eq!(
                classify(&CloudError::api(code, "gone")),
                ErrorVerdict::NotFound,
                "code: {code}"
            );
        }
    }

    #[test]
    fn test_retryable_codes() {
        for code in RETRYABLE_CODES {
            assert_eq!(
                classify(&CloudError::api(*code, "busy")),
                ErrorVerdict::Retryable,
                "code: {code}"
            );
        }
        assert_eq!(
            classify(&CloudError::Transport("connection reset".into())),
            ErrorVerdict::Retryable
        );
    }

    #[test]
    fn test_fatal_by_default() {
        for code in [
            "AuthFailure.SecretIdNotFound",
            "LimitExceeded.DiskQuota",
            "InvalidParameter",
            "UnsupportedOperation",
        ] {
            assert_eq!(
                classify(&CloudError::api(code, "nope")),
                ErrorVerdict::Fatal,
                "code: {code}"
            );
        }
        let deadline = CloudError::DeadlineExceeded {
            operation: "wait".into(),
            waited: Duration::from_secs(1),
        };
        assert_eq!(classify(&deadline), ErrorVerdict::Fatal);
        assert_eq!(
            classify(&CloudError::InvalidId {
                id: "a#b".into(),
                reason: "expected 3 parts".into()
            }),
            ErrorVerdict::Fatal
        );
    }

    #[test]
    fn test_classification_is_stable() {
        let err = CloudError::api("ResourceBusy", "busy");
        let first = classify(&err);
        for _ in 0..100 {
            assert_eq!(classify(&err), first);
        }
    }

    #[test]
    fn test_already_exists() {
        assert!(is_already_exists(&CloudError::api(
            "FailedOperation.DomainExists",
            "dup"
        )));
        assert!(is_already_exists(&CloudError::api(
            "InvalidParameterValue.SnapshotName.AlreadyExists",
            "dup"
        )));
        assert!(!is_already_exists(&CloudError::api("ResourceBusy", "busy")));
        assert!(!is_already_exists(&CloudError::Transport("timeout".into())));
    }

    #[test]
    fn test_suggestions() {
        let err = CloudError::api("AuthFailure.SecretIdNotFound", "bad id");
        assert!(suggestion(&err).unwrap().contains("secret"));
        assert!(suggestion(&CloudError::api("SomethingElse", "x")).is_none());
        assert!(suggestion(&CloudError::Transport("x".into())).is_none());
    }
}
