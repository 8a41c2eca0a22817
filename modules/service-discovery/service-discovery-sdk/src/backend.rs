//! Traits a coordination backend implements to feed the discovery cache.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::BackendError;
use crate::models::{EndpointEntity, ServiceIdentifier};

/// Immutable view of a serverset's members at one point in time.
pub type EndpointSnapshot = Arc<[EndpointEntity]>;

/// Opens sessions against the coordination cluster.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Open a session scoped to the serverset of `id`, rooted at `base_path`.
    ///
    /// # Errors
    /// Returns [`BackendError`] when the cluster cannot be reached.
    async fn open_session(
        &self,
        id: &ServiceIdentifier,
        base_path: &str,
        cluster: &[String],
    ) -> Result<Arc<dyn RegistrySession>, BackendError>;
}

/// One open session to the coordination cluster.
#[async_trait]
pub trait RegistrySession: Send + Sync {
    /// Start watching the serverset this session is scoped to.
    ///
    /// # Errors
    /// Returns [`BackendError::SessionClosed`] after [`RegistrySession::close`].
    async fn watch(&self) -> Result<Membership, BackendError>;

    /// # Errors
    /// Returns [`BackendError`] if the backend fails to tear the session down.
    async fn close(&self) -> Result<(), BackendError>;
}

/// Stops a membership watch when closed.
#[async_trait]
pub trait WatchGuard: Send + Sync {
    /// # Errors
    /// Returns [`BackendError`] if the backend fails to cancel the watch.
    async fn close(&self) -> Result<(), BackendError>;
}

/// A live membership watch: the backend publishes every change into `updates`.
pub struct Membership {
    pub updates: watch::Receiver<EndpointSnapshot>,
    pub guard: Box<dyn WatchGuard>,
}

impl Membership {
    #[must_use]
    pub fn new(updates: watch::Receiver<EndpointSnapshot>, guard: impl WatchGuard + 'static) -> Self {
        Self {
            updates,
            guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Membership")
            .field("members", &self.updates.borrow().len())
            .finish_non_exhaustive()
    }
}
