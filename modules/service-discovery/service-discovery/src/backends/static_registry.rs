//! In-memory registry backend.
//!
//! Serves serversets from process memory. Members are seeded from
//! configuration and can be changed at runtime, and every change is pushed to
//! open watches the same way a coordination service would notify them. The
//! backend records each session and watch it hands out, which makes it the
//! fixture of choice for exercising the cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use service_discovery_sdk::{
    BackendError, EndpointEntity, EndpointSnapshot, Membership, RegistryClient, RegistrySession,
    ServiceIdentifier, WatchGuard,
};
use tokio::sync::watch;
use tracing::debug;

/// Backend-side lifecycle event, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    SessionOpened(ServiceIdentifier),
    SessionClosed(ServiceIdentifier),
    WatchOpened(ServiceIdentifier),
    WatchClosed(ServiceIdentifier),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounters {
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub watches_opened: usize,
    pub watches_closed: usize,
}

#[derive(Default)]
struct Shared {
    serversets: DashMap<ServiceIdentifier, Arc<watch::Sender<EndpointSnapshot>>>,
    journal: Mutex<Vec<RegistryEvent>>,
    fail_sessions: AtomicBool,
    fail_watches: AtomicBool,
    session_latency: Mutex<Duration>,
    watch_latency: Mutex<Duration>,
}

impl Shared {
    fn serverset(&self, id: &ServiceIdentifier) -> Arc<watch::Sender<EndpointSnapshot>> {
        let sender = self
            .serversets
            .entry(id.clone())
            .or_insert_with(|| Arc::new(watch::Sender::new(Arc::from(Vec::new()))));
        Arc::clone(sender.value())
    }

    fn record(&self, event: RegistryEvent) {
        debug!(?event, "Static registry event");
        self.journal.lock().push(event);
    }

    async fn simulate_latency(latency: &Mutex<Duration>) {
        let latency = *latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// In-memory [`RegistryClient`].
#[derive(Clone, Default)]
pub struct StaticRegistry {
    shared: Arc<Shared>,
}

impl StaticRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_members<I>(members: I) -> Self
    where
        I: IntoIterator<Item = (ServiceIdentifier, Vec<EndpointEntity>)>,
    {
        let registry = Self::new();
        for (id, endpoints) in members {
            registry.set_members(&id, endpoints);
        }
        registry
    }

    /// Delay applied to every session open and watch start.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.session_latency.lock() = latency;
        *self.shared.watch_latency.lock() = latency;
    }

    /// Delay applied to watch starts only.
    pub fn set_watch_latency(&self, latency: Duration) {
        *self.shared.watch_latency.lock() = latency;
    }

    /// Make subsequent session opens fail with [`BackendError::Unavailable`].
    pub fn fail_sessions(&self, fail: bool) {
        self.shared.fail_sessions.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent watch starts fail with [`BackendError::Unavailable`].
    pub fn fail_watches(&self, fail: bool) {
        self.shared.fail_watches.store(fail, Ordering::SeqCst);
    }

    /// Replace the members of `id` and notify its watchers.
    pub fn set_members(&self, id: &ServiceIdentifier, endpoints: Vec<EndpointEntity>) {
        self.shared.serverset(id).send_replace(Arc::from(endpoints));
    }

    pub fn add_member(&self, id: &ServiceIdentifier, endpoint: EndpointEntity) {
        self.shared.serverset(id).send_modify(|members| {
            let mut next = members.to_vec();
            next.push(endpoint);
            *members = Arc::from(next);
        });
    }

    /// Remove every member listening on `host:port`. Returns `true` if any matched.
    pub fn remove_member(&self, id: &ServiceIdentifier, host: &str, port: u16) -> bool {
        self.shared.serverset(id).send_if_modified(|members| {
            let before = members.len();
            let next: Vec<EndpointEntity> = members
                .iter()
                .filter(|ep| !(ep.host == host && ep.port == port))
                .cloned()
                .collect();
            if next.len() == before {
                return false;
            }
            *members = Arc::from(next);
            true
        })
    }

    #[must_use]
    pub fn members(&self, id: &ServiceIdentifier) -> Vec<EndpointEntity> {
        self.shared.serverset(id).borrow().to_vec()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RegistryEvent> {
        self.shared.journal.lock().clone()
    }

    #[must_use]
    pub fn counters(&self) -> RegistryCounters {
        self.shared
            .journal
            .lock()
            .iter()
            .fold(RegistryCounters::default(), |mut acc, event| {
                match event {
                    RegistryEvent::SessionOpened(_) => acc.sessions_opened += 1,
                    RegistryEvent::SessionClosed(_) => acc.sessions_closed += 1,
                    RegistryEvent::WatchOpened(_) => acc.watches_opened += 1,
                    RegistryEvent::WatchClosed(_) => acc.watches_closed += 1,
                }
                acc
            })
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn open_session(
        &self,
        id: &ServiceIdentifier,
        base_path: &str,
        _cluster: &[String],
    ) -> Result<Arc<dyn RegistrySession>, BackendError> {
        Shared::simulate_latency(&self.shared.session_latency).await;
        if self.shared.fail_sessions.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!(
                "no quorum for {}",
                id.registry_path(base_path)
            )));
        }

        self.shared.record(RegistryEvent::SessionOpened(id.clone()));
        Ok(Arc::new(StaticSession {
            id: id.clone(),
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

struct StaticSession {
    id: ServiceIdentifier,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl RegistrySession for StaticSession {
    async fn watch(&self) -> Result<Membership, BackendError> {
        Shared::simulate_latency(&self.shared.watch_latency).await;
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::SessionClosed);
        }
        if self.shared.fail_watches.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!("watch on {} refused", self.id)));
        }

        let updates = self.shared.serverset(&self.id).subscribe();
        self.shared.record(RegistryEvent::WatchOpened(self.id.clone()));
        Ok(Membership::new(
            updates,
            StaticWatchGuard {
                id: self.id.clone(),
                shared: Arc::clone(&self.shared),
                closed: AtomicBool::new(false),
            },
        ))
    }

    async fn close(&self) -> Result<(), BackendError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.record(RegistryEvent::SessionClosed(self.id.clone()));
        }
        Ok(())
    }
}

struct StaticWatchGuard {
    id: ServiceIdentifier,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl WatchGuard for StaticWatchGuard {
    async fn close(&self) -> Result<(), BackendError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.record(RegistryEvent::WatchClosed(self.id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn id() -> ServiceIdentifier {
        ServiceIdentifier::parse("search/prod/api").unwrap()
    }

    #[tokio::test]
    async fn watch_sees_member_changes() {
        let registry = StaticRegistry::from_members([(id(), vec![EndpointEntity::new("a", 1)])]);
        let session = registry.open_session(&id(), "/aurora", &[]).await.unwrap();
        let mut membership = session.watch().await.unwrap();
        assert_eq!(membership.updates.borrow().len(), 1);

        registry.add_member(&id(), EndpointEntity::new("b", 2));
        membership.updates.changed().await.unwrap();
        assert_eq!(membership.updates.borrow_and_update().len(), 2);

        assert!(registry.remove_member(&id(), "a", 1));
        assert!(!registry.remove_member(&id(), "a", 1));
        assert_eq!(registry.members(&id()), vec![EndpointEntity::new("b", 2)]);
        assert_eq!(membership.updates.borrow()[0].host, "b");
    }

    #[tokio::test]
    async fn closed_session_refuses_watches() {
        let registry = StaticRegistry::new();
        let session = registry.open_session(&id(), "/aurora", &[]).await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(session.watch().await.unwrap_err(), BackendError::SessionClosed);
        assert_eq!(
            registry.events(),
            vec![RegistryEvent::SessionOpened(id()), RegistryEvent::SessionClosed(id())]
        );
    }

    #[tokio::test]
    async fn failure_injection() {
        let registry = StaticRegistry::new();
        registry.fail_sessions(true);
        let err = registry.open_session(&id(), "/aurora", &[]).await.err().unwrap();
        assert!(matches!(err, BackendError::Unavailable(msg) if msg.contains("/aurora/search/prod/api")));

        registry.fail_sessions(false);
        registry.fail_watches(true);
        let session = registry.open_session(&id(), "/aurora", &[]).await.unwrap();
        assert!(matches!(session.watch().await, Err(BackendError::Unavailable(_))));
        assert_eq!(
            registry.counters(),
            RegistryCounters {
                sessions_opened: 1,
                ..RegistryCounters::default()
            }
        );
    }

    #[tokio::test]
    async fn watch_guard_close_is_recorded_once() {
        let registry = StaticRegistry::new();
        let session = registry.open_session(&id(), "/aurora", &[]).await.unwrap();
        let membership = session.watch().await.unwrap();
        membership.guard.close().await.unwrap();
        membership.guard.close().await.unwrap();

        let counters = registry.counters();
        assert_eq!(counters.watches_opened, 1);
        assert_eq!(counters.watches_closed, 1);
    }
}
