//! Controller error taxonomy.
//!
//! Every variant carries owned strings so a single verdict can be cloned and
//! handed to every caller of an admission batch.

use std::time::Duration;

use thiserror::Error;

/// What kind of cluster object a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Service,
    Endpoints,
    Secret,
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupKind::Service => write!(f, "service"),
            LookupKind::Endpoints => write!(f, "endpoints"),
            LookupKind::Secret => write!(f, "secret"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    /// A declaration is malformed or conflicts with an admitted one.
    #[error("invalid declaration {key}: {reason}")]
    DeclarationInvalid { key: String, reason: String },

    /// The routing model could not be synthesized or failed its checks.
    #[error("routing model build failed: {0}")]
    BuildFailure(String),

    /// The data plane rejected a full reload or a dynamic update.
    #[error("data plane publish failed: {0}")]
    PublishFailure(String),

    /// A referenced cluster object does not exist.
    #[error("{kind} {key} not found")]
    LookupMiss { kind: LookupKind, key: String },

    /// The admission verdict did not arrive before the caller's deadline.
    #[error("admission verdict not ready after {0:?}")]
    AdmissionTimeout(Duration),

    /// The admission batcher is stopped.
    #[error("admission batcher is not running")]
    AdmissionUnavailable,

    #[error("i/o error: {0}")]
    Io(String),
}

impl ControllerError {
    pub fn invalid(key: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        ControllerError::DeclarationInvalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn lookup_miss(kind: LookupKind, key: impl Into<String>) -> Self {
        ControllerError::LookupMiss {
            kind,
            key: key.into(),
        }
    }

    /// Short machine-friendly label used for metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            ControllerError::DeclarationInvalid { .. } => "declaration_invalid",
            ControllerError::BuildFailure(_) => "build_failure",
            ControllerError::PublishFailure(_) => "publish_failure",
            ControllerError::LookupMiss { .. } => "lookup_miss",
            ControllerError::AdmissionTimeout(_) => "timeout",
            ControllerError::AdmissionUnavailable => "unavailable",
            ControllerError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(e: std::io::Error) -> Self {
        ControllerError::Io(e.to_string())
    }
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;
