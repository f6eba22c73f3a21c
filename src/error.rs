//! Error types for ticket intake.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Local persistence errors (queue, ledger, cursor, artifacts).
///
/// A failed write never rolls back the in-memory state that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error on {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Blocking write task failed for {path}: {reason}")]
    Task { path: PathBuf, reason: String },

    #[error("Invalid artifact key: {0:?}")]
    InvalidKey(String),
}

/// Ticket source errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source connection failed: {0}")]
    Connection(String),

    #[error("Source query failed: {0}")]
    Query(String),
}

/// Remote collaborator errors (user directory, classifier, generator, delivery).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("{service} returned status {status}")]
    Status { service: String, status: u16 },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("{service} token exchange failed: {reason}")]
    AuthFailed { service: String, reason: String },

    #[error("{service} reported an error: {message}")]
    Rejected { service: String, message: String },
}

/// Per-item processing errors raised inside a worker.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("User lookup failed: {0}")]
    Lookup(#[source] ServiceError),

    #[error("Classification failed: {0}")]
    Classification(#[source] ServiceError),

    #[error("Response generation failed: {0}")]
    Generation(#[source] ServiceError),

    #[error("Delivery failed: {0}")]
    Delivery(#[source] ServiceError),

    #[error("Artifact write failed: {0}")]
    Artifact(#[from] StoreError),

    #[error("Invalid work item: {0}")]
    InvalidItem(String),
}

impl PipelineError {
    /// Whether a later drain cycle could succeed on the same item.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidItem(_) => false,
            Self::Artifact(StoreError::InvalidKey(_)) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_failures_are_transient() {
        let err = PipelineError::Classification(ServiceError::RequestFailed {
            service: "classifier".into(),
            reason: "timeout".into(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn bad_keys_and_items_are_permanent() {
        assert!(!PipelineError::Artifact(StoreError::InvalidKey("../x".into())).is_transient());
        assert!(!PipelineError::InvalidItem("empty id".into()).is_transient());
    }

    #[test]
    fn io_artifact_failure_is_transient() {
        let err = PipelineError::Artifact(StoreError::Io {
            path: PathBuf::from("out/1.json"),
            source: std::io::Error::other("disk full"),
        });
        assert!(err.is_transient());
    }
}
