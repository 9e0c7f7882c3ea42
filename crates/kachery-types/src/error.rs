use std::path::PathBuf;

use thiserror::Error;

/// Error kinds propagated by the CAS, Downloader, SubfeedStore, and
/// HubCoordinator. Each carries enough structured context to log usefully
/// without the caller having to reparse a string.
#[derive(Error, Debug, Clone)]
pub enum KacheryError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("integrity violation: {reason}")]
    IntegrityViolation { reason: String },

    #[error("precondition failed: {reason}")]
    PreconditionFailure { reason: String },

    #[error("transient error: {reason}")]
    Transient { reason: String },

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("io error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl KacheryError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn hash_mismatch(expected: &str, actual: &str) -> Self {
        Self::IntegrityViolation {
            reason: format!("expected sha1 {expected}, got {actual}"),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailure {
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Whether the CAS/Downloader retry machinery may retry this within its
    /// bounded budget; `IntegrityViolation` and `PreconditionFailure` never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
