//! Error types for layer publication and lifecycle operations.

use serde::Serialize;
use thiserror::Error;

use crate::identity::IdentityError;

/// Result type alias for map server calls.
pub type PublishResult<T> = Result<T, PublishError>;

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Failure class of a map server call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishErrorKind {
    /// Transport failure, timeout, or the server is still starting.
    Unreachable,
    /// The server answered with a client or validation error.
    Rejected,
    /// The target does not exist.
    NotFound,
}

impl std::fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PublishErrorKind::Unreachable => "unreachable",
            PublishErrorKind::Rejected => "rejected",
            PublishErrorKind::NotFound => "not found",
        })
    }
}

/// Error returned by every map server operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Map server {kind}: {detail}")]
pub struct PublishError {
    pub kind: PublishErrorKind,
    pub detail: String,
}

impl PublishError {
    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self { kind: PublishErrorKind::Unreachable, detail: detail.into() }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self { kind: PublishErrorKind::Rejected, detail: detail.into() }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self { kind: PublishErrorKind::NotFound, detail: detail.into() }
    }

    /// Only unreachable errors may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind == PublishErrorKind::Unreachable
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == PublishErrorKind::NotFound
    }
}

/// Errors surfaced by the layer lifecycle manager.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Map server is not ready: {0}")]
    ServiceNotReady(String),

    #[error("Invalid layer identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    #[error("Invalid publish request: {0}")]
    InvalidRequest(String),

    #[error("Failed to publish layer '{name}': {source}")]
    Publish {
        name: String,
        #[source]
        source: PublishError,
    },

    #[error("Map server request failed: {0}")]
    Backend(#[from] PublishError),

    #[error("Metadata store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            LifecycleError::InvalidIdentity(_) | LifecycleError::InvalidRequest(_) => 400,

            LifecycleError::Publish { source, .. } | LifecycleError::Backend(source) => {
                match source.kind {
                    PublishErrorKind::Rejected => 422,
                    PublishErrorKind::NotFound => 404,
                    PublishErrorKind::Unreachable => 502,
                }
            }

            LifecycleError::ServiceNotReady(_) => 503,

            LifecycleError::Store(_) | LifecycleError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::ServiceNotReady(_) => "service_not_ready",
            LifecycleError::InvalidIdentity(_) => "invalid_identity",
            LifecycleError::InvalidRequest(_) => "invalid_request",
            LifecycleError::Publish { source, .. } | LifecycleError::Backend(source) => {
                match source.kind {
                    PublishErrorKind::Unreachable => "unreachable",
                    PublishErrorKind::Rejected => "rejected",
                    PublishErrorKind::NotFound => "not_found",
                }
            }
            LifecycleError::Store(_) => "store_error",
            LifecycleError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unreachable_is_retryable() {
        assert!(PublishError::unreachable("timeout").is_retryable());
        assert!(!PublishError::rejected("bad workspace").is_retryable());
        assert!(!PublishError::not_found("gone").is_retryable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(LifecycleError::ServiceNotReady("initializing".into()).http_status_code(), 503);
        assert_eq!(LifecycleError::InvalidRequest("x".into()).http_status_code(), 400);
        let err = LifecycleError::Publish {
            name: "laos_temp_rcp45".into(),
            source: PublishError::rejected("bad style"),
        };
        assert_eq!(err.http_status_code(), 422);
        assert_eq!(err.code(), "rejected");
        assert!(err.to_string().contains("laos_temp_rcp45"));
    }

    #[test]
    fn test_publish_error_display() {
        let err = PublishError::unreachable("connection refused");
        assert_eq!(err.to_string(), "Map server unreachable: connection refused");
    }
}
