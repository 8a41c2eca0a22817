//! Keyed cache of asynchronously constructed resources.
//!
//! Per key the cache keeps at most one construction in flight, and every
//! concurrent caller awaits that same construction. Construction runs on its
//! own task, so a caller that gives up does not abort it. Failed constructions
//! are not stored.
//!
//! Eviction hands the value to the release hook exactly once. The key stays
//! blocked until the hook has finished, so a replacement is never built while
//! its predecessor is still being torn down. Entries idle for longer than the
//! TTL are evicted on the next access or by [`ResourceCache::sweep`].
//!
//! Once [`ResourceCache::close`] has run, a construction that completes is
//! handed straight to the release hook instead of being stored.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

pub type ReleaseFn<K, V, E> =
    Arc<dyn Fn(K, Arc<V>) -> BoxFuture<'static, Result<(), E>> + Send + Sync>;

type Outcome<V, E> = Option<Result<Arc<V>, E>>;

struct Cached<V> {
    generation: u64,
    value: Arc<V>,
    last_access: Mutex<Instant>,
}

impl<V> Cached<V> {
    fn new(generation: u64, value: Arc<V>) -> Self {
        Self {
            generation,
            value,
            last_access: Mutex::new(Instant::now()),
        }
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(*self.last_access.lock()) >= ttl
    }

    fn touch(&self, now: Instant) {
        let mut last = self.last_access.lock();
        if now > *last {
            *last = now;
        }
    }
}

enum Slot<V, E> {
    Pending {
        generation: u64,
        outcome: watch::Receiver<Outcome<V, E>>,
    },
    Ready(Arc<Cached<V>>),
    Releasing {
        generation: u64,
        released: watch::Receiver<bool>,
    },
}

impl<V, E> Slot<V, E> {
    fn is_pending(&self, gen_id: u64) -> bool {
        matches!(self, Slot::Pending { generation, .. } if *generation == gen_id)
    }

    fn is_releasing(&self, gen_id: u64) -> bool {
        matches!(self, Slot::Releasing { generation, .. } if *generation == gen_id)
    }
}

enum Claim<V, E> {
    Hit(Arc<V>),
    Await(watch::Receiver<Outcome<V, E>>),
    Construct {
        generation: u64,
        outcome: watch::Sender<Outcome<V, E>>,
    },
    Blocked(watch::Receiver<bool>),
    Evict {
        cached: Arc<Cached<V>>,
        released: watch::Sender<bool>,
    },
}

enum Eviction<V> {
    Won {
        cached: Arc<Cached<V>>,
        released: watch::Sender<bool>,
    },
    InFlight(watch::Receiver<bool>),
    Skipped,
}

/// Shared-ownership TTL cache keyed by `K`.
pub struct ResourceCache<K, V, E> {
    name: &'static str,
    ttl: Duration,
    entries: Arc<DashMap<K, Slot<V, E>>>,
    next_generation: AtomicU64,
    release: Option<ReleaseFn<K, V, E>>,
    closed: Arc<AtomicBool>,
}

impl<K, V, E> ResourceCache<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
{
    /// `name` only labels log records.
    #[must_use]
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
            release: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hook run once for every evicted value. Failures are logged and the
    /// eviction completes regardless.
    #[must_use]
    pub fn with_release<F, Fut>(mut self, release_fn: F) -> Self
    where
        F: Fn(K, Arc<V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.release = Some(Arc::new(move |key, value| release_fn(key, value).boxed()));
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of constructed, not yet evicted entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready(_)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached value for `key` without constructing one. Refreshes the TTL on hit.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lookup_ready(key, &|_: &V| true)
    }

    /// Return the cached value for `key`, constructing it with `init` if absent.
    ///
    /// # Errors
    /// Returns the error produced by the construction this call awaited.
    pub async fn try_get_with<F, Fut>(&self, key: &K, init: F) -> Result<Arc<V>, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.try_get_with_filter(key, |_| true, init).await
    }

    /// Like [`Self::try_get_with`], but a cached value rejected by `keep` is
    /// evicted and rebuilt.
    ///
    /// # Errors
    /// Returns the error produced by the construction this call awaited.
    pub async fn try_get_with_filter<P, F, Fut>(
        &self,
        key: &K,
        keep: P,
        init: F,
    ) -> Result<Arc<V>, E>
    where
        P: Fn(&V) -> bool,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.lookup_ready(key, &keep) {
            return Ok(value);
        }

        loop {
            let (outcome, joined) = match self.claim(key, &keep) {
                Claim::Hit(value) => return Ok(value),
                Claim::Await(outcome) => (outcome, true),
                Claim::Construct {
                    generation,
                    outcome,
                } => {
                    let waiter = outcome.subscribe();
                    self.spawn_construct(key.clone(), generation, init(), outcome);
                    (waiter, false)
                }
                Claim::Blocked(released) => {
                    wait_released(released).await;
                    continue;
                }
                Claim::Evict { cached, released } => {
                    let waiter = released.subscribe();
                    self.spawn_release(key.clone(), cached, released);
                    wait_released(waiter).await;
                    continue;
                }
            };

            // `None`: the construction task vanished without reporting; its slot is gone.
            if let Some(result) = wait_outcome(outcome).await {
                match result {
                    // A joined construction must still pass this caller's filter.
                    Ok(value) if joined && !keep(value.as_ref()) => {}
                    result => return result,
                }
            }
        }
    }

    /// Evict `key` and wait for its release. Returns `false` if there was no
    /// constructed entry (in-flight constructions are left alone).
    pub async fn invalidate(&self, key: &K) -> bool {
        self.evict_if(key, |_| true).await
    }

    /// Like [`Self::invalidate`], but an in-flight construction is awaited
    /// first and its result evicted too.
    pub async fn invalidate_settled(&self, key: &K) -> bool {
        loop {
            let pending = match self.entries.get(key).as_deref() {
                Some(Slot::Pending { outcome, .. }) => Some(outcome.clone()),
                Some(_) => None,
                None => return false,
            };
            match pending {
                Some(outcome) => {
                    wait_outcome(outcome).await;
                }
                None => return self.evict_if(key, |_| true).await,
            }
        }
    }

    /// Evict every entry idle for at least the TTL. Returns how many were evicted.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready(cached) if cached.is_expired(now, self.ttl) => Some(entry.key().clone()),
                _ => None,
            })
            .collect();

        let mut evicted = 0;
        for key in &expired {
            if self
                .evict_if(key, |cached| cached.is_expired(now, self.ttl))
                .await
            {
                evicted += 1;
            }
        }
        evicted
    }

    /// Evict every entry, waiting out constructions in flight.
    pub async fn clear(&self) -> usize {
        let keys: Vec<K> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        join_all(keys.iter().map(|key| self.invalidate_settled(key)))
            .await
            .into_iter()
            .filter(|evicted| *evicted)
            .count()
    }

    /// Stop retaining values and evict everything. Constructions that finish
    /// afterwards are released as soon as they complete.
    pub async fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.clear().await
    }

    fn lookup_ready(&self, key: &K, keep: &impl Fn(&V) -> bool) -> Option<Arc<V>> {
        let slot = self.entries.get(key)?;
        let Slot::Ready(cached) = &*slot else {
            return None;
        };
        let now = Instant::now();
        if cached.is_expired(now, self.ttl) || !keep(cached.value.as_ref()) {
            return None;
        }
        cached.touch(now);
        Some(Arc::clone(&cached.value))
    }

    fn claim(&self, key: &K, keep: &impl Fn(&V) -> bool) -> Claim<V, E> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let stale = match occupied.get() {
                    Slot::Pending { outcome, .. } => return Claim::Await(outcome.clone()),
                    Slot::Releasing { released, .. } => return Claim::Blocked(released.clone()),
                    Slot::Ready(cached) => {
                        let now = Instant::now();
                        if !cached.is_expired(now, self.ttl) && keep(cached.value.as_ref()) {
                            cached.touch(now);
                            return Claim::Hit(Arc::clone(&cached.value));
                        }
                        Arc::clone(cached)
                    }
                };
                let (released, waiter) = watch::channel(false);
                occupied.insert(Slot::Releasing {
                    generation: stale.generation,
                    released: waiter,
                });
                Claim::Evict {
                    cached: stale,
                    released,
                }
            }
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (outcome, waiter) = watch::channel(None);
                vacant.insert(Slot::Pending {
                    generation,
                    outcome: waiter,
                });
                Claim::Construct {
                    generation,
                    outcome,
                }
            }
        }
    }

    async fn evict_if(&self, key: &K, should_evict: impl Fn(&Cached<V>) -> bool) -> bool {
        let eviction = match self.entries.get_mut(key) {
            Some(mut slot) => match &*slot {
                Slot::Ready(cached) if should_evict(cached) => {
                    let cached = Arc::clone(cached);
                    let (released, waiter) = watch::channel(false);
                    *slot = Slot::Releasing {
                        generation: cached.generation,
                        released: waiter,
                    };
                    Eviction::Won { cached, released }
                }
                Slot::Releasing { released, .. } => Eviction::InFlight(released.clone()),
                _ => Eviction::Skipped,
            },
            None => Eviction::Skipped,
        };

        match eviction {
            Eviction::Won { cached, released } => {
                let waiter = released.subscribe();
                self.spawn_release(key.clone(), cached, released);
                wait_released(waiter).await;
                true
            }
            Eviction::InFlight(waiter) => {
                wait_released(waiter).await;
                false
            }
            Eviction::Skipped => false,
        }
    }

    fn spawn_construct<Fut>(
        &self,
        key: K,
        generation: u64,
        construct: Fut,
        outcome: watch::Sender<Outcome<V, E>>,
    ) where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut guard = PendingGuard {
            entries: Arc::clone(&self.entries),
            key,
            generation,
            armed: true,
        };
        let closed = Arc::clone(&self.closed);
        let release = self.release.clone();
        let name = self.name;

        tokio::spawn(async move {
            let result = construct.await.map(Arc::new);
            match &result {
                Ok(value) => {
                    let retired = match guard.entries.get_mut(&guard.key) {
                        Some(mut slot) if slot.is_pending(generation) => {
                            let cached = Arc::new(Cached::new(generation, Arc::clone(value)));
                            if closed.load(Ordering::SeqCst) {
                                let (released, waiter) = watch::channel(false);
                                *slot = Slot::Releasing {
                                    generation,
                                    released: waiter,
                                };
                                Some((cached, released))
                            } else {
                                *slot = Slot::Ready(cached);
                                None
                            }
                        }
                        _ => None,
                    };
                    guard.armed = false;
                    if let Some((cached, released)) = retired {
                        tracing::debug!(cache = name, key = %guard.key, "Cache closed, releasing late construction");
                        spawn_release_task(
                            ReleaseGuard {
                                entries: Arc::clone(&guard.entries),
                                key: guard.key.clone(),
                                generation,
                                released,
                            },
                            release,
                            cached,
                            name,
                        );
                    } else {
                        tracing::debug!(cache = name, key = %guard.key, "Resource constructed");
                    }
                }
                Err(err) => {
                    tracing::warn!(cache = name, key = %guard.key, error = %err, "Resource construction failed");
                    drop(guard);
                }
            }
            outcome.send_replace(Some(result));
        });
    }

    fn spawn_release(&self, key: K, cached: Arc<Cached<V>>, released: watch::Sender<bool>) {
        let guard = ReleaseGuard {
            entries: Arc::clone(&self.entries),
            key,
            generation: cached.generation,
            released,
        };
        spawn_release_task(guard, self.release.clone(), cached, self.name);
    }
}

fn spawn_release_task<K, V, E>(
    guard: ReleaseGuard<K, V, E>,
    release: Option<ReleaseFn<K, V, E>>,
    cached: Arc<Cached<V>>,
    name: &'static str,
) where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    tokio::spawn(async move {
        if let Some(release) = release {
            match release(guard.key.clone(), Arc::clone(&cached.value)).await {
                Ok(()) => tracing::debug!(cache = name, key = %guard.key, "Resource released"),
                Err(err) => {
                    tracing::warn!(cache = name, key = %guard.key, error = %err, "Resource release failed");
                }
            }
        }
        drop(guard);
    });
}

async fn wait_outcome<V, E: Clone>(
    mut outcome: watch::Receiver<Outcome<V, E>>,
) -> Option<Result<Arc<V>, E>> {
    let current = outcome.wait_for(Option::is_some).await.ok()?;
    (*current).clone()
}

async fn wait_released(mut released: watch::Receiver<bool>) {
    if released.wait_for(|done| *done).await.is_err() {
        // Sender dropped by the release guard; the slot is already cleared.
        tracing::trace!("Release task ended without signalling");
    }
}

/// Clears a `Pending` slot whose construction failed or was dropped.
struct PendingGuard<K: Eq + Hash, V, E> {
    entries: Arc<DashMap<K, Slot<V, E>>>,
    key: K,
    generation: u64,
    armed: bool,
}

impl<K: Eq + Hash, V, E> Drop for PendingGuard<K, V, E> {
    fn drop(&mut self) {
        if self.armed {
            self.entries
                .remove_if(&self.key, |_, slot| slot.is_pending(self.generation));
        }
    }
}

/// Unblocks the key once its release finished, even if the hook panicked.
struct ReleaseGuard<K: Eq + Hash, V, E> {
    entries: Arc<DashMap<K, Slot<V, E>>>,
    key: K,
    generation: u64,
    released: watch::Sender<bool>,
}

impl<K: Eq + Hash, V, E> Drop for ReleaseGuard<K, V, E> {
    fn drop(&mut self) {
        self.entries
            .remove_if(&self.key, |_, slot| slot.is_releasing(self.generation));
        self.released.send_replace(true);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type TestCache = ResourceCache<&'static str, u32, String>;

    const TTL: Duration = Duration::from_secs(60);

    fn counting_release(cache: TestCache, releases: &Arc<AtomicUsize>) -> TestCache {
        let releases = Arc::clone(releases);
        cache.with_release(move |_key, _value| {
            let releases = Arc::clone(&releases);
            async move {
                releases.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn slow_init(
        builds: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32, String>> + use<> {
        let builds = Arc::clone(builds);
        move || {
            let builds = Arc::clone(&builds);
            async move {
                builds.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_construction() {
        let cache = TestCache::new("test", TTL);
        let builds = Arc::new(AtomicUsize::new(0));
        let init = slow_init(&builds, 7);

        let results = join_all((0..8).map(|_| cache.try_get_with(&"a", &init))).await;

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            let value = result.as_ref().unwrap();
            assert_eq!(**value, 7);
            assert!(Arc::ptr_eq(first, value));
        }
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_construction_is_not_cached() {
        let cache = TestCache::new("test", TTL);
        let attempts = Arc::new(AtomicUsize::new(0));

        let init = || {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("backend down".to_owned())
                } else {
                    Ok(1)
                }
            }
        };

        let err = cache.try_get_with(&"a", init).await.unwrap_err();
        assert_eq!(err, "backend down");
        assert!(cache.is_empty());

        let value = cache.try_get_with(&"a", init).await.unwrap();
        assert_eq!(*value, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_does_not_abort_construction() {
        let cache = TestCache::new("test", TTL);
        let builds = Arc::new(AtomicUsize::new(0));
        let init = slow_init(&builds, 3);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), cache.try_get_with(&"a", &init)).await;
        assert!(timed_out.is_err());

        let value = cache.try_get_with(&"a", &init).await.unwrap();
        assert_eq!(*value, 3);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entry_expires_and_is_released_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = counting_release(TestCache::new("test", TTL), &releases);
        let builds = Arc::new(AtomicUsize::new(0));
        let init = slow_init(&builds, 1);

        let first = cache.try_get_with(&"a", &init).await.unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert!(cache.get(&"a").is_none());

        let second = cache.try_get_with(&"a", &init).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn access_refreshes_ttl() {
        let cache = TestCache::new("test", TTL);
        let builds = Arc::new(AtomicUsize::new(0));
        let init = slow_init(&builds, 1);

        cache.try_get_with(&"a", &init).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(cache.get(&"a").is_some());
        tokio::time::advance(Duration::from_secs(40)).await;
        cache.try_get_with(&"a", &init).await.unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.sweep().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_idle_entries() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = counting_release(TestCache::new("test", TTL), &releases);
        let builds = Arc::new(AtomicUsize::new(0));
        let init = slow_init(&builds, 1);

        cache.try_get_with(&"old", &init).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.try_get_with(&"new", &init).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.sweep().await, 1);
        assert!(cache.get(&"old").is_none());
        assert!(cache.get(&"new").is_some());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn racing_invalidations_release_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = counting_release(TestCache::new("test", TTL), &releases);
        let builds = Arc::new(AtomicUsize::new(0));

        cache
            .try_get_with(&"a", slow_init(&builds, 1))
            .await
            .unwrap();

        let (first, second) = tokio::join!(cache.invalidate(&"a"), cache.invalidate(&"a"));
        assert!(first ^ second);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!cache.invalidate(&"a").await);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_waits_for_release_to_finish() {
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let release_log = Arc::clone(&log);
        let cache = Arc::new(TestCache::new("test", TTL).with_release(move |_key, _value| {
            let log = Arc::clone(&release_log);
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                log.lock().push("released");
                Ok(())
            }
        }));
        let init = || {
            let log = Arc::clone(&log);
            async move {
                log.lock().push("built");
                Ok(1)
            }
        };

        cache.try_get_with(&"a", init).await.unwrap();

        let evictor = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.invalidate(&"a").await })
        };
        tokio::task::yield_now().await;

        cache.try_get_with(&"a", init).await.unwrap();
        assert!(evictor.await.unwrap());
        assert_eq!(*log.lock(), vec!["built", "released", "built"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_value_is_released_and_rebuilt() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = counting_release(TestCache::new("test", TTL), &releases);
        let builds = Arc::new(AtomicUsize::new(0));
        let init = slow_init(&builds, 5);

        cache.try_get_with(&"a", &init).await.unwrap();
        let value = cache
            .try_get_with_filter(&"a", |v| *v != 5, &init)
            .await
            .unwrap();

        assert_eq!(*value, 5);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_releases_everything() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = counting_release(TestCache::new("test", TTL), &releases);
        let builds = Arc::new(AtomicUsize::new(0));
        let init = slow_init(&builds, 1);

        for key in ["a", "b", "c"] {
            cache.try_get_with(&key, &init).await.unwrap();
        }

        assert_eq!(cache.clear().await, 3);
        assert!(cache.is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_construction_is_checked_against_filter() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = counting_release(TestCache::new("test", TTL), &releases);
        let builds = Arc::new(AtomicUsize::new(0));
        let stale = slow_init(&builds, 1);
        let fresh = slow_init(&builds, 2);

        let (first, second) = tokio::join!(
            cache.try_get_with(&"a", &stale),
            cache.try_get_with_filter(&"a", |v| *v == 2, &fresh),
        );

        assert_eq!(*first.unwrap(), 1);
        assert_eq!(*second.unwrap(), 2);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_invalidation_evicts_construction_in_flight() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(counting_release(TestCache::new("test", TTL), &releases));
        let builds = Arc::new(AtomicUsize::new(0));

        let builder = {
            let cache = Arc::clone(&cache);
            let init = slow_init(&builds, 1);
            tokio::spawn(async move { cache.try_get_with(&"a", init).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!cache.invalidate(&"a").await);
        assert_eq!(cache.sweep().await, 0);
        assert!(cache.invalidate_settled(&"a").await);

        assert_eq!(*builder.await.unwrap().unwrap(), 1);
        assert!(cache.is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_cache_releases_late_constructions() {
        let releases = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(counting_release(TestCache::new("test", TTL), &releases));
        let builds = Arc::new(AtomicUsize::new(0));

        let builder = {
            let cache = Arc::clone(&cache);
            let init = slow_init(&builds, 1);
            tokio::spawn(async move { cache.try_get_with(&"a", init).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        cache.close().await;
        assert!(cache.is_closed());
        assert_eq!(*builder.await.unwrap().unwrap(), 1);
        assert!(cache.is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let value = cache.try_get_with(&"b", slow_init(&builds, 2)).await.unwrap();
        assert_eq!(*value, 2);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(cache.is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }
}
