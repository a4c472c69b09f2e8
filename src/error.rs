//! Error types for the Store operator

use std::fmt;

use thiserror::Error;

use crate::crd::StoreState;

/// Errors surfaced by reconciliation and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// HTTP request to the object store failed before a response arrived
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Object store answered with a non-success status
    #[error("Object store error ({status}) {code}: {message}")]
    ObjectStoreError {
        status: u16,
        code: String,
        message: String,
    },

    /// A bounded wait ran out of attempts
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency rejection or conflicting resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Temporary failure of an external dependency
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Status write that would leave the lifecycle graph
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: StoreState, to: StoreState },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Coarse classification used by the retry policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Object or dependent resource is absent
    NotFound,
    /// Network, timeout or throttling against an external resource
    Transient,
    /// Optimistic-concurrency rejection; retry from a fresh read
    Conflict,
    /// Input or configuration problem that a retry alone will not fix
    Invalid,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => match resp.code {
                404 => ErrorKind::NotFound,
                409 => ErrorKind::Conflict,
                400 | 422 => ErrorKind::Invalid,
                _ => ErrorKind::Transient,
            },
            Error::KubeError(_) | Error::HttpError(_) => ErrorKind::Transient,
            Error::ObjectStoreError { status, .. } => match status {
                404 => ErrorKind::NotFound,
                409 => ErrorKind::Conflict,
                400 | 403 => ErrorKind::Invalid,
                _ => ErrorKind::Transient,
            },
            Error::Timeout(_) | Error::Transient(_) => ErrorKind::Transient,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::ValidationError(_)
            | Error::InvalidTransition { .. }
            | Error::ConfigError(_)
            | Error::SerializationError(_) => ErrorKind::Invalid,
        }
    }

    /// Whether a quick retry is likely to succeed
    ///
    /// Invalid errors are still retried by the controller, just on the slow
    /// schedule, since the user may fix the spec in the meantime.
    pub fn is_retriable(&self) -> bool {
        self.kind() != ErrorKind::Invalid
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
