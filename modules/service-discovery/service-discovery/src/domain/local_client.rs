use std::sync::Arc;

use async_trait::async_trait;
use service_discovery_sdk::{CacheStats, DiscoveryError, EndpointEntity, ServiceDiscoveryClient};

use super::service::DiscoveryCache;

/// Local implementation of the `ServiceDiscoveryClient` trait that delegates
/// to the in-process cache.
pub struct ServiceDiscoveryLocalClient {
    cache: Arc<DiscoveryCache>,
}

impl ServiceDiscoveryLocalClient {
    #[must_use]
    pub fn new(cache: Arc<DiscoveryCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ServiceDiscoveryClient for ServiceDiscoveryLocalClient {
    async fn lookup(&self, raw: &str) -> Result<Vec<EndpointEntity>, DiscoveryError> {
        self.cache.lookup(raw).await
    }

    async fn invalidate(&self, raw: &str) -> Result<bool, DiscoveryError> {
        self.cache.invalidate(raw).await
    }

    fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
