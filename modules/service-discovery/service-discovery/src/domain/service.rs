use std::sync::{Arc, Weak};
use std::time::Duration;

use service_discovery_sdk::{
    CacheStats, DiscoveryError, EndpointEntity, RegistryClient, ServiceIdentifier,
};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connections::ConnectionRegistry;
use super::subscriptions::SubscriptionRegistry;
use crate::config::DiscoveryConfig;

/// Lookup facade over the connection and subscription registries.
///
/// A lookup validates the identifier, obtains the shared connection for it,
/// then the shared subscription bound to that connection, and returns the
/// subscription's current members.
pub struct DiscoveryCache {
    connections: ConnectionRegistry,
    subscriptions: Arc<SubscriptionRegistry>,
    sweep_interval: Duration,
    cancel: CancellationToken,
}

impl DiscoveryCache {
    #[must_use]
    pub fn new(client: Arc<dyn RegistryClient>, config: &DiscoveryConfig) -> Self {
        let subscriptions = Arc::new(SubscriptionRegistry::new(config.ttl));
        let connections = ConnectionRegistry::new(
            client,
            config.ttl,
            &config.base_path,
            &config.cluster,
            Arc::clone(&subscriptions),
        );

        Self {
            connections,
            subscriptions,
            sweep_interval: config.sweep_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Build the cache and start its background sweeper.
    #[must_use]
    pub fn start(client: Arc<dyn RegistryClient>, config: &DiscoveryConfig) -> Arc<Self> {
        let cache = Arc::new(Self::new(client, config));
        cache.spawn_sweeper();
        cache
    }

    /// Resolve `raw` (`role/env/service`) to its current members.
    ///
    /// # Errors
    /// See [`service_discovery_sdk::ServiceDiscoveryClient::lookup`].
    #[tracing::instrument(skip_all, fields(service = %raw))]
    pub async fn lookup(&self, raw: &str) -> Result<Vec<EndpointEntity>, DiscoveryError> {
        let id = ServiceIdentifier::parse(raw).inspect_err(|_| {
            warn!("Rejected invalid service identifier");
        })?;
        self.resolve(&id).await
    }

    /// Resolve an already validated identifier.
    ///
    /// # Errors
    /// [`DiscoveryError::ConnectionUnavailable`] or
    /// [`DiscoveryError::SubscriptionUnavailable`]; nothing is cached on failure.
    pub async fn resolve(&self, id: &ServiceIdentifier) -> Result<Vec<EndpointEntity>, DiscoveryError> {
        let conn = self.connections.get_or_create(id).await.map_err(|source| {
            warn!(error = %source, "Registry connection unavailable");
            DiscoveryError::ConnectionUnavailable {
                id: id.clone(),
                source,
            }
        })?;

        let sub = self
            .subscriptions
            .get_or_create(id, &conn)
            .await
            .map_err(|source| {
                warn!(error = %source, "Serverset subscription unavailable");
                DiscoveryError::SubscriptionUnavailable {
                    id: id.clone(),
                    source,
                }
            })?;

        let endpoints = sub.current_endpoints();
        debug!(count = endpoints.len(), "Resolved serverset members");
        Ok(endpoints)
    }

    /// Release the cached subscription and connection of `raw`.
    ///
    /// # Errors
    /// Returns [`DiscoveryError::InvalidIdentifier`] if `raw` fails validation.
    pub async fn invalidate(&self, raw: &str) -> Result<bool, DiscoveryError> {
        let id = ServiceIdentifier::parse(raw)?;
        let subscription = self.subscriptions.invalidate(&id).await;
        let connection = self.connections.invalidate(&id).await;
        if subscription || connection {
            info!(service = %id, "Invalidated cached serverset");
        }
        Ok(subscription || connection)
    }

    /// Evict idle subscriptions, then idle connections.
    pub async fn sweep(&self) -> CacheStats {
        let evicted = CacheStats {
            subscriptions: self.subscriptions.sweep().await,
            connections: self.connections.sweep().await,
        };
        if evicted != CacheStats::default() {
            info!(
                connections = evicted.connections,
                subscriptions = evicted.subscriptions,
                "Swept idle entries"
            );
        }
        evicted
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            connections: self.connections.len(),
            subscriptions: self.subscriptions.len(),
        }
    }

    /// Stop the sweeper and release everything, including entries still
    /// being built. Lookups completing afterwards are served but not
    /// retained. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let subscriptions = self.subscriptions.close().await;
        let connections = self.connections.close().await;
        info!(connections, subscriptions, "Discovery cache shut down");
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        let cache: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let period = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(strong) = cache.upgrade() else { break };
                        strong.sweep().await;
                    }
                }
            }
            debug!("Discovery cache sweeper stopped");
        });
    }
}
