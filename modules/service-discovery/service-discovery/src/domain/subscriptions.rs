use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use service_discovery_sdk::{
    BackendError, EndpointEntity, EndpointSnapshot, Membership, ServiceIdentifier, WatchGuard,
};
use tokio::sync::watch;
use tracing::info;

use super::connections::ConnectionHandle;
use super::resource_cache::ResourceCache;

/// A live serverset watch bound to the connection that created it.
///
/// The backend pushes membership changes into the watch channel, so reading
/// the current members never blocks on the backend.
pub struct SubscriptionHandle {
    id: ServiceIdentifier,
    connection: Weak<ConnectionHandle>,
    updates: watch::Receiver<EndpointSnapshot>,
    guard: Box<dyn WatchGuard>,
    closed: AtomicBool,
}

impl SubscriptionHandle {
    /// Establish a watch over `conn`.
    ///
    /// # Errors
    /// Returns the backend error if the watch cannot be started.
    #[tracing::instrument(skip_all, fields(service = %id))]
    pub async fn open(id: ServiceIdentifier, conn: &Arc<ConnectionHandle>) -> Result<Self, BackendError> {
        let Membership { updates, guard } = conn.watch().await?;
        info!(members = updates.borrow().len(), "Serverset watch established");
        Ok(Self {
            id,
            connection: Arc::downgrade(conn),
            updates,
            guard,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> &ServiceIdentifier {
        &self.id
    }

    /// Members as of the most recent backend notification.
    #[must_use]
    pub fn current_endpoints(&self) -> Vec<EndpointEntity> {
        self.updates.borrow().to_vec()
    }

    /// `true` while `conn` is the live connection this watch was opened on.
    #[must_use]
    pub fn belongs_to(&self, conn: &Arc<ConnectionHandle>) -> bool {
        self.connection
            .upgrade()
            .is_some_and(|parent| Arc::ptr_eq(&parent, conn) && !parent.is_closed())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the watch. Only the first call reaches the backend.
    ///
    /// # Errors
    /// Returns the backend error from the first close.
    pub async fn close(&self) -> Result<(), BackendError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.guard.close().await
    }
}

/// One serverset subscription per identifier.
pub struct SubscriptionRegistry {
    cache: ResourceCache<ServiceIdentifier, SubscriptionHandle, BackendError>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = ResourceCache::new("subscriptions", ttl).with_release(
            |id: ServiceIdentifier, sub: Arc<SubscriptionHandle>| async move {
                info!(service = %id, "Stopping serverset watch");
                sub.close().await
            },
        );
        Self { cache }
    }

    /// Cached subscription for `id`. A cached subscription opened on any
    /// connection other than `conn` is released and replaced.
    ///
    /// # Errors
    /// Returns the backend error if the watch cannot be started.
    pub async fn get_or_create(
        &self,
        id: &ServiceIdentifier,
        conn: &Arc<ConnectionHandle>,
    ) -> Result<Arc<SubscriptionHandle>, BackendError> {
        match self.fetch(id, conn).await {
            // Joined a watch started on a session that has since closed.
            Err(BackendError::SessionClosed) if !conn.is_closed() => self.fetch(id, conn).await,
            result => result,
        }
    }

    async fn fetch(
        &self,
        id: &ServiceIdentifier,
        conn: &Arc<ConnectionHandle>,
    ) -> Result<Arc<SubscriptionHandle>, BackendError> {
        self.cache
            .try_get_with_filter(
                id,
                |sub| sub.belongs_to(conn),
                || {
                    let id = id.clone();
                    let conn = Arc::clone(conn);
                    async move { SubscriptionHandle::open(id, &conn).await }
                },
            )
            .await
    }

    pub async fn invalidate(&self, id: &ServiceIdentifier) -> bool {
        self.cache.invalidate(id).await
    }

    /// Release the subscription of `id`, waiting for one being established.
    pub async fn invalidate_settled(&self, id: &ServiceIdentifier) -> bool {
        self.cache.invalidate_settled(id).await
    }

    pub async fn sweep(&self) -> usize {
        self.cache.sweep().await
    }

    /// Stop every watch, including those still starting.
    pub async fn close(&self) -> usize {
        self.cache.close().await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
