use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use service_discovery_sdk::{BackendError, Membership, RegistryClient, RegistrySession, ServiceIdentifier};
use tracing::info;

use super::resource_cache::ResourceCache;
use super::subscriptions::SubscriptionRegistry;

/// An open session to the coordination cluster, scoped to one identifier.
pub struct ConnectionHandle {
    id: ServiceIdentifier,
    session: Arc<dyn RegistrySession>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(id: ServiceIdentifier, session: Arc<dyn RegistrySession>) -> Self {
        Self {
            id,
            session,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ServiceIdentifier {
        &self.id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start a membership watch over this session.
    ///
    /// # Errors
    /// [`BackendError::SessionClosed`] once the handle is closed, otherwise
    /// whatever the backend reports.
    pub async fn watch(&self) -> Result<Membership, BackendError> {
        if self.is_closed() {
            return Err(BackendError::SessionClosed);
        }
        self.session.watch().await
    }

    /// Close the underlying session. Only the first call reaches the backend.
    ///
    /// # Errors
    /// Returns the backend error from the first close.
    pub async fn close(&self) -> Result<(), BackendError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.session.close().await
    }
}

/// One registry connection per identifier.
///
/// Evicting a connection first releases the subscription of the same
/// identifier, including one still being established, then closes the
/// session.
pub struct ConnectionRegistry {
    cache: ResourceCache<ServiceIdentifier, ConnectionHandle, BackendError>,
    client: Arc<dyn RegistryClient>,
    base_path: Arc<str>,
    cluster: Arc<[String]>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(
        client: Arc<dyn RegistryClient>,
        ttl: Duration,
        base_path: &str,
        cluster: &[String],
        subscriptions: Arc<SubscriptionRegistry>,
    ) -> Self {
        let cache = ResourceCache::new("connections", ttl).with_release(
            move |id: ServiceIdentifier, conn: Arc<ConnectionHandle>| {
                let subscriptions = Arc::clone(&subscriptions);
                async move {
                    subscriptions.invalidate_settled(&id).await;
                    info!(service = %id, "Closing registry session");
                    conn.close().await
                }
            },
        );

        Self {
            cache,
            client,
            base_path: Arc::from(base_path),
            cluster: Arc::from(cluster),
        }
    }

    /// Cached connection for `id`, opening a session on first use.
    ///
    /// # Errors
    /// Returns the backend error if the session cannot be opened.
    pub async fn get_or_create(
        &self,
        id: &ServiceIdentifier,
    ) -> Result<Arc<ConnectionHandle>, BackendError> {
        self.cache
            .try_get_with(id, || {
                let client = Arc::clone(&self.client);
                let base_path = Arc::clone(&self.base_path);
                let cluster = Arc::clone(&self.cluster);
                let id = id.clone();
                async move {
                    info!(
                        service = %id,
                        path = %id.registry_path(&base_path),
                        cluster = %cluster.join(","),
                        "Opening registry session"
                    );
                    let session = client.open_session(&id, &base_path, &cluster).await?;
                    Ok(ConnectionHandle::new(id, session))
                }
            })
            .await
    }

    pub async fn invalidate(&self, id: &ServiceIdentifier) -> bool {
        self.cache.invalidate(id).await
    }

    pub async fn sweep(&self) -> usize {
        self.cache.sweep().await
    }

    /// Close every session, including those still opening.
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
