use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication failure. Always terminal for the affected run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthFailure {
    #[error("credentials must have a non-empty identifier and secret")]
    InvalidCredentials,

    #[error("authentication rejected: {message}")]
    Rejected { message: String },

    #[error("authentication succeeded but no token was returned")]
    MissingToken,

    #[error("authentication request failed: {0}")]
    Transport(String),

    #[error("session token is empty or expired")]
    Expired,
}

/// Failure raised while executing or asserting a step
#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Auth(#[from] AuthFailure),

    #[error("expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },

    #[error("step timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("environment failure: {0}")]
    Environment(String),

    #[error("run cancelled")]
    Cancelled,
}

impl VerifyError {
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        VerifyError::Mismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Wrap a collaborator error (driver, HTTP transport, store)
    pub fn environment(err: impl std::fmt::Display) -> Self {
        VerifyError::Environment(err.to_string())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            VerifyError::Auth(_) => FailureKind::Auth,
            VerifyError::Mismatch { .. } => FailureKind::Mismatch,
            VerifyError::Timeout { .. } => FailureKind::Timeout,
            VerifyError::Environment(_) => FailureKind::Environment,
            VerifyError::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Auth and environment failures abort the profile regardless of the
    /// step's declared criticality.
    pub fn is_always_hard(&self) -> bool {
        matches!(
            self,
            VerifyError::Auth(_) | VerifyError::Environment(_) | VerifyError::Cancelled
        )
    }
}

/// Cause tag stored on a failed step outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Auth,
    Mismatch,
    Timeout,
    Environment,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Auth => "auth",
            FailureKind::Mismatch => "mismatch",
            FailureKind::Timeout => "timeout",
            FailureKind::Environment => "environment",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
