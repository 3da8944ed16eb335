//! Keyed async resource cache.
//!
//! Maps a key to its last fetched [`FetchPhase`] and to at most one in-flight
//! fetch. Concurrent requests for the same key coalesce onto that fetch, so
//! a burst of identical image or list requests costs one network call.
//!
//! Fetches run on their own tokio task and commit to the entry map when they
//! finish, even if the requester that started them has gone away. When two
//! fetches for a key overlap across an [`invalidate`](ResourceCache::invalidate),
//! the last one to complete sets the entry. A fetch whose entry was
//! invalidated and never re-requested is discarded on completion.
//!
//! Without a capacity the cache grows without bound. With one, the least
//! recently used idle entry is evicted once the bound is exceeded.

use crate::{
    error::{ErrorKind, FetchError, Result},
    metrics,
    observer::{Observers, Subscription},
    phase::FetchPhase,
};
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type SharedFetch<V> = Shared<BoxFuture<'static, FetchPhase<V>>>;

/// Handle to the fetch currently running for a key.
struct InFlight<V> {
    id: u64,
    fetch: SharedFetch<V>,
}

struct CacheEntry<V> {
    phase: FetchPhase<V>,
    in_flight: Option<InFlight<V>>,
    last_access: u64,
}

impl<V> CacheEntry<V> {
    fn new() -> Self {
        Self {
            phase: FetchPhase::Empty,
            in_flight: None,
            last_access: 0,
        }
    }
}

/// A phase transition for one key, as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseChange<K, V> {
    pub key: K,
    pub phase: FetchPhase<V>,
}

struct Inner<K, V> {
    /// Label for logs and metrics.
    name: &'static str,
    entries: DashMap<K, CacheEntry<V>>,
    observers: Observers<PhaseChange<K, V>>,
    capacity: Option<usize>,
    /// Monotonic counter for access ticks and fetch ids.
    clock: AtomicU64,
}

/// Shared handle to a keyed resource cache.
///
/// Cloning is cheap and every clone addresses the same entries.
pub struct ResourceCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ResourceCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an unbounded cache labelled `name` in logs and metrics.
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, 0)
    }

    /// Create a cache holding at most `capacity` entries. `0` means unbounded.
    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                entries: DashMap::new(),
                observers: Observers::new(),
                capacity: (capacity > 0).then_some(capacity),
                clock: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Return the phase for `key`, fetching it when needed.
    ///
    /// A `Success` entry is returned as-is unless `invalidate` is set. A
    /// missing or `Failure` entry, or any entry under `invalidate`, moves to
    /// `Empty` and is fetched with `fetch(key)`. If a fetch for `key` is
    /// already in flight this call awaits that fetch instead of starting
    /// another one.
    pub async fn request<F, Fut>(&self, key: K, fetch: F, invalidate: bool) -> FetchPhase<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let inner = &self.inner;
        let tick = inner.tick();

        let (shared, started) = {
            let mut entry = inner
                .entries
                .entry(key.clone())
                .or_insert_with(CacheEntry::new);
            entry.last_access = tick;

            if !invalidate && entry.phase.is_success() {
                debug!("{} cache HIT for {:?}", inner.name, key);
                metrics::record_hit(inner.name);
                return entry.phase.clone();
            }

            if let Some(in_flight) = &entry.in_flight {
                debug!("{} cache joining in-flight fetch for {:?}", inner.name, key);
                metrics::record_coalesced(inner.name);
                (in_flight.fetch.clone(), None)
            } else {
                debug!("{} cache MISS for {:?}", inner.name, key);
                metrics::record_miss(inner.name);

                let id = inner.tick();
                let (tx, rx) = oneshot::channel();
                let shared = rx
                    .map(|received| {
                        received.unwrap_or_else(|_| {
                            FetchPhase::Failure(FetchError::Network(
                                "fetch task ended without a result".to_string(),
                            ))
                        })
                    })
                    .boxed()
                    .shared();

                entry.phase = FetchPhase::Empty;
                entry.in_flight = Some(InFlight {
                    id,
                    fetch: shared.clone(),
                });
                (shared, Some((id, tx)))
            }
        };

        // The entry lock is released; building the fetch future may re-enter.
        if let Some((id, tx)) = started {
            inner.notify(&key, FetchPhase::Empty);
            // The in-flight slot is taken; it must be settled even if building
            // the future unwinds.
            let future = match std::panic::catch_unwind(AssertUnwindSafe(|| fetch(key.clone()))) {
                Ok(future) => future,
                Err(_) => {
                    warn!("{} fetch for {:?} panicked before starting", inner.name, key);
                    let phase =
                        FetchPhase::Failure(FetchError::Network("fetch panicked".to_string()));
                    metrics::record_fetch_error(inner.name, ErrorKind::NetworkFailure);
                    inner.commit(&key, id, phase.clone());
                    let _ = tx.send(phase);
                    inner.evict_over_capacity();
                    return shared.await;
                }
            };
            let task_inner = inner.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let phase = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => FetchPhase::from(result),
                    Err(_) => {
                        warn!("{} fetch for {:?} panicked", task_inner.name, key);
                        FetchPhase::Failure(FetchError::Network("fetch panicked".to_string()))
                    }
                };
                metrics::record_fetch_duration(task_inner.name, start);
                if let FetchPhase::Failure(err) = &phase {
                    metrics::record_fetch_error(task_inner.name, err.kind());
                }

                task_inner.commit(&key, id, phase.clone());
                let _ = tx.send(phase);
                task_inner.evict_over_capacity();
            });
            inner.evict_over_capacity();
        }

        shared.await
    }

    /// Drop the entry for `key` so the next request fetches again.
    ///
    /// An in-flight fetch is not cancelled; its waiters still receive its
    /// result.
    pub fn invalidate(&self, key: &K) {
        if self.inner.entries.remove(key).is_some() {
            debug!("{} cache invalidated {:?}", self.inner.name, key);
            self.inner.notify(key, FetchPhase::Empty);
        }
    }

    pub fn invalidate_all(&self) {
        let keys: Vec<K> = self
            .inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            self.invalidate(&key);
        }
    }

    /// Current phase for `key` without triggering a fetch.
    pub fn peek(&self, key: &K) -> FetchPhase<V> {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.phase.clone())
            .unwrap_or_default()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Observe phase changes of a single key.
    #[must_use = "dropping the subscription unregisters the callback"]
    pub fn subscribe(
        &self,
        key: K,
        on_change: impl Fn(&FetchPhase<V>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.subscribe(move |change| {
            if change.key == key {
                on_change(&change.phase);
            }
        })
    }

    /// Observe phase changes of every key.
    #[must_use = "dropping the subscription unregisters the callback"]
    pub fn subscribe_all(
        &self,
        on_change: impl Fn(&PhaseChange<K, V>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.subscribe(on_change)
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn notify(&self, key: &K, phase: FetchPhase<V>) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.notify(&PhaseChange {
            key: key.clone(),
            phase,
        });
    }

    /// Store the outcome of fetch `id` for `key`.
    fn commit(&self, key: &K, id: u64, phase: FetchPhase<V>) {
        let committed = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.in_flight.as_ref().is_some_and(|f| f.id == id) {
                    entry.in_flight = None;
                } else {
                    debug!(
                        "{} fetch for {:?} finished behind a newer request",
                        self.name, key
                    );
                }
                entry.phase = phase.clone();
                true
            }
            None => {
                debug!(
                    "{} discarding result for invalidated key {:?}",
                    self.name, key
                );
                false
            }
        };

        if committed {
            self.notify(key, phase);
        }
    }

    /// Evict least recently used idle entries until within capacity.
    fn evict_over_capacity(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };

        while self.entries.len() > capacity {
            let victim = self
                .entries
                .iter()
                .filter(|entry| entry.in_flight.is_none())
                .min_by_key(|entry| entry.last_access)
                .map(|entry| (entry.key().clone(), entry.last_access));

            // Everything left is in flight; retry after the next commit.
            let Some((key, last_access)) = victim else {
                break;
            };

            let removed = self.entries.remove_if(&key, |_, entry| {
                entry.in_flight.is_none() && entry.last_access == last_access
            });
            if removed.is_some() {
                debug!("{} cache evicted {:?}", self.name, key);
                metrics::record_eviction(self.name);
                self.notify(&key, FetchPhase::Empty);
            }
        }
    }
}

impl<K, V> Debug for ResourceCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl FnOnce(String) -> BoxFuture<'static, Result<String>> {
        let calls = calls.clone();
        move |key| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(format!("{value}:{key}")) }.boxed()
        }
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let cache = ResourceCache::<String, String>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..8).map(|_| {
            let calls = calls.clone();
            cache.request(
                "https://image.tmdb.org/t/p/w500/poster.jpg".to_string(),
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok("bytes".to_string())
                    }
                },
                false,
            )
        });
        let phases = futures_util::future::join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one fetch");
        assert!(
            phases
                .iter()
                .all(|p| *p == FetchPhase::Success("bytes".to_string()))
        );
    }

    #[tokio::test]
    async fn success_entry_skips_fetch() {
        let cache = ResourceCache::<String, String>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .request("popular".into(), counting_fetch(&calls, "v1"), false)
            .await;
        let second = cache
            .request("popular".into(), counting_fetch(&calls, "v2"), false)
            .await;

        assert_eq!(first, FetchPhase::Success("v1:popular".into()));
        assert_eq!(second, FetchPhase::Success("v1:popular".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = ResourceCache::<String, String>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .request("popular".into(), counting_fetch(&calls, "v1"), false)
            .await;
        cache.invalidate(&"popular".to_string());
        assert!(cache.peek(&"popular".to_string()).is_empty());

        let phase = cache
            .request("popular".into(), counting_fetch(&calls, "v2"), false)
            .await;

        assert_eq!(phase, FetchPhase::Success("v2:popular".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_flag_refetches_success() {
        let cache = ResourceCache::<String, String>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .request("top_rated".into(), counting_fetch(&calls, "v1"), false)
            .await;
        let phase = cache
            .request("top_rated".into(), counting_fetch(&calls, "v2"), true)
            .await;

        assert_eq!(phase, FetchPhase::Success("v2:top_rated".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_is_stored_and_refetched_on_next_request() {
        let cache = ResourceCache::<u64, String>::new("test");

        let failed = cache
            .request(
                550,
                |_| async { Err::<String, _>(FetchError::InvalidResponse("HTTP 500".into())) },
                false,
            )
            .await;
        assert_eq!(
            failed.description().as_deref(),
            Some("Invalid response: HTTP 500")
        );
        assert!(cache.peek(&550).is_failure());

        let retried = cache
            .request(550, |id| async move { Ok(format!("movie {id}")) }, false)
            .await;
        assert_eq!(retried, FetchPhase::Success("movie 550".into()));
    }

    #[tokio::test]
    async fn failures_stay_with_their_key() {
        let cache = ResourceCache::<u64, String>::new("test");

        let bad = cache
            .request(
                1,
                |_| async { Err::<String, _>(FetchError::Network("offline".into())) },
                false,
            )
            .await;
        let good = cache
            .request(2, |_| async { Ok("fine".to_string()) }, false)
            .await;

        assert!(bad.is_failure());
        assert_eq!(good, FetchPhase::Success("fine".into()));
        assert!(cache.peek(&1).is_failure());
    }

    #[tokio::test]
    async fn peek_does_not_fetch() {
        let cache = ResourceCache::<String, String>::new("test");
        assert!(cache.peek(&"upcoming".to_string()).is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidated_in_flight_result_is_discarded() {
        let cache = ResourceCache::<String, String>::new("test");
        let (release, gate) = oneshot::channel::<()>();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .request(
                        "q".into(),
                        move |_| async move {
                            let _ = gate.await;
                            Ok("late".to_string())
                        },
                        false,
                    )
                    .await
            })
        };
        settle().await;
        assert!(cache.is_in_flight(&"q".to_string()));

        cache.invalidate(&"q".to_string());
        release.send(()).unwrap();

        // The original requester still gets its answer.
        assert_eq!(
            waiter.await.unwrap(),
            FetchPhase::Success("late".to_string())
        );
        assert!(cache.peek(&"q".to_string()).is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn last_fetch_to_complete_wins() {
        let cache = ResourceCache::<String, String>::new("test");
        let (release_old, old_gate) = oneshot::channel::<()>();

        let old = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .request(
                        "k".into(),
                        move |_| async move {
                            let _ = old_gate.await;
                            Ok("old".to_string())
                        },
                        false,
                    )
                    .await
            })
        };
        settle().await;

        cache.invalidate(&"k".to_string());
        let fresh = cache
            .request("k".into(), |_| async { Ok("new".to_string()) }, false)
            .await;
        assert_eq!(fresh, FetchPhase::Success("new".into()));

        release_old.send(()).unwrap();
        assert_eq!(old.await.unwrap(), FetchPhase::Success("old".into()));
        assert_eq!(cache.peek(&"k".to_string()), FetchPhase::Success("old".into()));
    }

    #[tokio::test]
    async fn panicking_fetch_becomes_failure() {
        let cache = ResourceCache::<String, String>::new("test");

        let phase = cache
            .request(
                "boom".into(),
                |_| async {
                    if true {
                        panic!("fetch exploded");
                    }
                    Ok("unreachable".to_string())
                },
                false,
            )
            .await;
        assert!(phase.is_failure());
        assert!(!cache.is_in_flight(&"boom".to_string()));

        let phase = cache
            .request("boom".into(), |_| async { Ok("ok".to_string()) }, false)
            .await;
        assert!(phase.is_success());
    }

    #[tokio::test]
    async fn panic_while_building_fetch_releases_key() {
        let cache = ResourceCache::<String, String>::new("test");

        let phase = cache
            .request(
                "k".into(),
                |_| -> std::future::Ready<Result<String>> { panic!("no future for you") },
                false,
            )
            .await;
        assert_eq!(
            phase,
            FetchPhase::Failure(FetchError::Network("fetch panicked".into()))
        );
        assert!(!cache.is_in_flight(&"k".to_string()));
        assert!(cache.peek(&"k".to_string()).is_failure());

        let phase = cache
            .request("k".into(), |_| async { Ok("fresh".to_string()) }, false)
            .await;
        assert_eq!(phase, FetchPhase::Success("fresh".into()));
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = ResourceCache::<String, String>::with_capacity("test", 2);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.request("a".into(), counting_fetch(&calls, "v"), false).await;
        cache.request("b".into(), counting_fetch(&calls, "v"), false).await;
        // Touch "a" so "b" becomes the oldest.
        cache.request("a".into(), counting_fetch(&calls, "v"), false).await;
        cache.request("c".into(), counting_fetch(&calls, "v"), false).await;
        settle().await;

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&"a".to_string()).is_success());
        assert!(cache.peek(&"b".to_string()).is_empty());
        assert!(cache.peek(&"c".to_string()).is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_capacity_is_unbounded() {
        let cache = ResourceCache::<u64, u64>::with_capacity("test", 0);
        for id in 0..50 {
            cache.request(id, |id| async move { Ok(id * 2) }, false).await;
        }
        assert_eq!(cache.len(), 50);
    }

    #[tokio::test]
    async fn observers_see_empty_then_outcome() {
        let cache = ResourceCache::<String, String>::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _sub = {
            let seen = seen.clone();
            cache.subscribe("now_playing".into(), move |phase| {
                seen.lock().unwrap().push(phase.clone())
            })
        };
        let _other = cache.subscribe("popular".into(), |_| panic!("wrong key"));

        cache
            .request("now_playing".into(), |_| async { Ok("list".to_string()) }, false)
            .await;
        cache.invalidate(&"now_playing".to_string());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                FetchPhase::Empty,
                FetchPhase::Success("list".to_string()),
                FetchPhase::Empty,
            ]
        );
    }

    #[tokio::test]
    async fn subscribe_all_reports_keys() {
        let cache = ResourceCache::<u64, u64>::new("test");
        let keys = Arc::new(Mutex::new(Vec::new()));

        let _sub = {
            let keys = keys.clone();
            cache.subscribe_all(move |change| {
                if change.phase.is_success() {
                    keys.lock().unwrap().push(change.key);
                }
            })
        };
        cache.request(7, |k| async move { Ok(k) }, false).await;
        cache.request(9, |k| async move { Ok(k) }, false).await;

        assert_eq!(*keys.lock().unwrap(), vec![7, 9]);
    }

    #[tokio::test]
    async fn invalidate_all_clears_entries() {
        let cache = ResourceCache::<u64, u64>::new("test");
        for id in 0..3 {
            cache.request(id, |id| async move { Ok(id) }, false).await;
        }
        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
