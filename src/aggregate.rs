//! Endpoint fan-out.
//!
//! Fetches several independent sub-resources concurrently and assembles them
//! into one result ordered by a fixed per-key priority rather than by
//! completion order. Failed sub-fetches are dropped from the result unless
//! every sub-fetch failed, in which case the first failure to arrive becomes
//! the result. The dropped failures stay available in [`FanOutReport`] and
//! through [`Aggregator::last_failures`].

use crate::{
    cache::ResourceCache,
    error::{FetchError, Result},
    observer::{Observers, Subscription},
    phase::FetchPhase,
};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Fixed output position of a sub-key. Lower sorts first.
pub trait SortPriority {
    fn sort_priority(&self) -> u32;
}

/// One successful sub-result.
#[derive(Debug, Clone, PartialEq)]
pub struct Section<S, V> {
    pub key: S,
    pub value: V,
}

/// Everything a fan-out produced.
#[derive(Debug, Clone)]
pub struct FanOutReport<S, V> {
    /// Successful sub-results, sorted by priority.
    pub successes: Vec<Section<S, V>>,
    /// Failed sub-keys in the order their failures arrived.
    pub failures: Vec<(S, FetchError)>,
}

impl<S, V> FanOutReport<S, V> {
    /// Collapse into the aggregate result: the successes, or the first
    /// failure when nothing succeeded.
    pub fn into_result(self) -> Result<Vec<Section<S, V>>> {
        if self.successes.is_empty()
            && let Some((_, err)) = self.failures.into_iter().next()
        {
            return Err(err);
        }
        Ok(self.successes)
    }
}

/// Run `fetch` for every key concurrently and wait for all of them.
pub async fn fan_out<S, V, F, Fut>(keys: impl IntoIterator<Item = S>, fetch: F) -> FanOutReport<S, V>
where
    S: SortPriority + Clone,
    F: Fn(S) -> Fut,
    Fut: Future<Output = Result<V>>,
{
    let mut pending: FuturesUnordered<_> = keys
        .into_iter()
        .map(|key| {
            let fut = fetch(key.clone());
            async move { (key, fut.await) }
        })
        .collect();

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    while let Some((key, result)) = pending.next().await {
        match result {
            Ok(value) => successes.push(Section { key, value }),
            Err(err) => failures.push((key, err)),
        }
    }

    successes.sort_by_key(|section| section.key.sort_priority());
    FanOutReport {
        successes,
        failures,
    }
}

type FetchFn<S, V> = Arc<dyn Fn(S) -> BoxFuture<'static, Result<V>> + Send + Sync>;

struct AggregateState<S, V> {
    phase: FetchPhase<Vec<Section<S, V>>>,
    failures: Vec<(S, FetchError)>,
}

struct Inner<S, V> {
    cache: ResourceCache<S, V>,
    keys: Vec<S>,
    fetch: FetchFn<S, V>,
    state: Mutex<AggregateState<S, V>>,
    observers: Observers<FetchPhase<Vec<Section<S, V>>>>,
}

/// A fixed set of sub-keys loaded together through a per-key cache.
pub struct Aggregator<S, V> {
    inner: Arc<Inner<S, V>>,
}

impl<S, V> Clone for Aggregator<S, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, V> Aggregator<S, V>
where
    S: SortPriority + Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(cache: ResourceCache<S, V>, keys: Vec<S>, fetch: F) -> Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let fetch: FetchFn<S, V> = Arc::new(move |key| fetch(key).boxed());
        Self {
            inner: Arc::new(Inner {
                cache,
                keys,
                fetch,
                state: Mutex::new(AggregateState {
                    phase: FetchPhase::Empty,
                    failures: Vec::new(),
                }),
                observers: Observers::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregateState<S, V>> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Load every sub-key.
    ///
    /// An existing `Success` is returned unchanged unless `invalidate` is set.
    /// Otherwise the sub-keys go through the cache; `invalidate` forces each of
    /// them to be fetched again, while a plain load reuses sub-results that
    /// are still cached.
    pub async fn load(&self, invalidate: bool) -> FetchPhase<Vec<Section<S, V>>> {
        let cleared = {
            let mut st = self.lock();
            if !invalidate && st.phase.is_success() {
                return st.phase.clone();
            }
            let cleared = !st.phase.is_empty();
            st.phase = FetchPhase::Empty;
            cleared
        };
        if cleared {
            self.inner.observers.notify(&FetchPhase::Empty);
        }

        let cache = &self.inner.cache;
        let report = fan_out(self.inner.keys.iter().cloned(), |key| {
            let fetch = self.inner.fetch.clone();
            async move {
                match cache.request(key, move |k| fetch(k), invalidate).await {
                    FetchPhase::Success(value) => Ok(value),
                    FetchPhase::Failure(err) => Err(err),
                    FetchPhase::Empty => Err(FetchError::Network(
                        "fetch finished without a result".to_string(),
                    )),
                }
            }
        })
        .await;

        for (key, err) in &report.failures {
            warn!("{} sub-fetch {:?} failed: {}", cache.name(), key, err);
        }
        info!(
            "{} loaded {} of {} sections",
            cache.name(),
            report.successes.len(),
            self.inner.keys.len()
        );

        let failures = report.failures.clone();
        let phase = FetchPhase::from(report.into_result());
        {
            let mut st = self.lock();
            st.phase = phase.clone();
            st.failures = failures;
        }
        self.inner.observers.notify(&phase);
        phase
    }

    /// Drop the assembled aggregate so the next plain load rebuilds it from
    /// the per-key cache. Sub-results are not refetched.
    pub fn reset(&self) {
        let cleared = {
            let mut st = self.lock();
            let cleared = !st.phase.is_empty();
            st.phase = FetchPhase::Empty;
            st.failures.clear();
            cleared
        };
        if cleared {
            self.inner.observers.notify(&FetchPhase::Empty);
        }
    }

    pub fn phase(&self) -> FetchPhase<Vec<Section<S, V>>> {
        self.lock().phase.clone()
    }

    /// Sub-keys that failed during the most recent load.
    pub fn last_failures(&self) -> Vec<(S, FetchError)> {
        self.lock().failures.clone()
    }

    pub fn keys(&self) -> &[S] {
        &self.inner.keys
    }

    pub fn cache(&self) -> &ResourceCache<S, V> {
        &self.inner.cache
    }

    #[must_use = "dropping the subscription unregisters the callback"]
    pub fn subscribe(
        &self,
        on_change: impl Fn(&FetchPhase<Vec<Section<S, V>>>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.subscribe(on_change)
    }
}

impl<S, V> Debug for Aggregator<S, V>
where
    S: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("keys", &self.inner.keys)
            .finish_non_exhaustive()
    }
}
