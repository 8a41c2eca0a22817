use async_trait::async_trait;

use crate::error::DiscoveryError;
use crate::models::{CacheStats, EndpointEntity};

/// Public API of the `service_discovery` module.
///
/// Implementations keep one registry connection and one serverset
/// subscription per identifier, shared by every caller.
#[async_trait]
pub trait ServiceDiscoveryClient: Send + Sync {
    /// Current members of the serverset named by `raw` (`role/env/service`).
    ///
    /// # Errors
    /// - [`DiscoveryError::InvalidIdentifier`] if `raw` fails validation
    /// - [`DiscoveryError::ConnectionUnavailable`] if no registry session could be opened
    /// - [`DiscoveryError::SubscriptionUnavailable`] if the serverset watch could not be established
    async fn lookup(&self, raw: &str) -> Result<Vec<EndpointEntity>, DiscoveryError>;

    /// Evict the cached connection and subscription for `raw`, releasing both.
    /// Returns `true` if anything was evicted.
    ///
    /// # Errors
    /// Returns [`DiscoveryError::InvalidIdentifier`] if `raw` fails validation.
    async fn invalidate(&self, raw: &str) -> Result<bool, DiscoveryError>;

    fn stats(&self) -> CacheStats;
}
