use thiserror::Error;

use crate::models::ServiceIdentifier;

/// Failure reported by a coordination backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("registry backend unavailable: {0}")]
    Unavailable(String),

    #[error("registry session is closed")]
    SessionClosed,

    #[error("registry backend error: {0}")]
    Internal(String),
}

/// Errors returned by [`crate::ServiceDiscoveryClient`].
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("invalid service identifier '{raw}'")]
    InvalidIdentifier { raw: String },

    #[error("registry connection for '{id}' unavailable: {source}")]
    ConnectionUnavailable {
        id: ServiceIdentifier,
        #[source]
        source: BackendError,
    },

    #[error("serverset subscription for '{id}' unavailable: {source}")]
    SubscriptionUnavailable {
        id: ServiceIdentifier,
        #[source]
        source: BackendError,
    },
}

impl DiscoveryError {
    /// Backend failures are never cached, so the same lookup may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DiscoveryError::InvalidIdentifier { .. })
    }
}
