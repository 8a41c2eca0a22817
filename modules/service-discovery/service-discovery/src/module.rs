use std::sync::Arc;

use axum::Router;
use service_discovery_sdk::{RegistryClient, ServiceDiscoveryClient};
use tracing::info;

use crate::api::rest::routes;
use crate::backends::StaticRegistry;
use crate::config::{ConfigError, DiscoveryConfig};
use crate::domain::DiscoveryCache;
use crate::domain::local_client::ServiceDiscoveryLocalClient;

/// Service discovery module: owns the cache and exposes it to the host.
pub struct ServiceDiscoveryModule {
    cache: Arc<DiscoveryCache>,
    client: Arc<dyn ServiceDiscoveryClient>,
}

impl ServiceDiscoveryModule {
    /// Validate `config` and start the cache over `registry`.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn init(
        config: &DiscoveryConfig,
        registry: Arc<dyn RegistryClient>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = DiscoveryCache::start(registry, config);
        let client: Arc<dyn ServiceDiscoveryClient> =
            Arc::new(ServiceDiscoveryLocalClient::new(Arc::clone(&cache)));

        info!(
            ttl = %humantime::format_duration(config.ttl),
            sweep_interval = %humantime::format_duration(config.sweep_interval),
            base_path = %config.base_path,
            "Service discovery module initialized"
        );
        Ok(Self { cache, client })
    }

    /// Start the module over an in-memory registry seeded from
    /// `config.static_members`. The registry is returned so members can be
    /// changed at runtime.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn with_static_registry(
        config: &DiscoveryConfig,
    ) -> Result<(Self, StaticRegistry), ConfigError> {
        let registry = StaticRegistry::from_members(config.static_members.clone());
        let module = Self::init(config, Arc::new(registry.clone()))?;
        Ok((module, registry))
    }

    #[must_use]
    pub fn client(&self) -> Arc<dyn ServiceDiscoveryClient> {
        Arc::clone(&self.client)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<DiscoveryCache> {
        &self.cache
    }

    #[must_use]
    pub fn register_routes(&self, router: Router) -> Router {
        routes::register_routes(router, self.client())
    }

    #[must_use]
    pub fn register_admin_routes(&self, router: Router) -> Router {
        routes::register_admin_routes(router, self.client())
    }

    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}
