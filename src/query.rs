//! Debounced query channel.
//!
//! Turns a live-edited query (typed or dictated search text) into fetches
//! against a [`ResourceCache`] keyed by the trimmed query:
//!
//! - a blank query clears the phase to `Empty` immediately;
//! - a non-blank query waits out a quiet window, restarted by every change;
//! - a result is committed only if the query that requested it is still the
//!   current one, so a slow response never replaces a newer one.

use crate::{
    cache::ResourceCache,
    error::Result,
    observer::{Observers, Subscription},
    phase::FetchPhase,
};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default quiet window before a query is dispatched.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Where the channel is in handling the current query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// The query is blank.
    Idle,
    /// Waiting out the quiet window.
    Pending,
    /// The fetch for the current query has been dispatched.
    Fetching,
    /// The phase holds the outcome for the current query.
    Settled,
}

type FetchFn<V> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<V>> + Send + Sync>;

struct ChannelState<V> {
    query: String,
    trimmed: String,
    state: QueryState,
    phase: FetchPhase<V>,
    /// Cancels the debounce timer of the pending dispatch.
    pending: Option<CancellationToken>,
}

struct Inner<V> {
    cache: ResourceCache<String, V>,
    fetch: FetchFn<V>,
    debounce: Duration,
    state: Mutex<ChannelState<V>>,
    observers: Observers<FetchPhase<V>>,
}

/// Debounced, stale-guarded search front-end over a [`ResourceCache`].
pub struct QueryChannel<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryChannel<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> QueryChannel<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(cache: ResourceCache<String, V>, debounce: Duration, fetch: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let fetch: FetchFn<V> = Arc::new(move |query| fetch(query).boxed());
        Self {
            inner: Arc::new(Inner {
                cache,
                fetch,
                debounce,
                state: Mutex::new(ChannelState {
                    query: String::new(),
                    trimmed: String::new(),
                    state: QueryState::Idle,
                    phase: FetchPhase::Empty,
                    pending: None,
                }),
                observers: Observers::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState<V>> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Feed a new raw query.
    ///
    /// Must be called from within a tokio runtime when the query is not blank.
    pub fn set_query(&self, raw: impl Into<String>) {
        let raw = raw.into();
        let trimmed = raw.trim().to_string();

        let mut st = self.lock();
        st.query = raw;
        st.trimmed = trimmed.clone();
        if let Some(token) = st.pending.take() {
            token.cancel();
        }

        if trimmed.is_empty() {
            st.state = QueryState::Idle;
            let cleared = !st.phase.is_empty();
            st.phase = FetchPhase::Empty;
            drop(st);
            if cleared {
                self.inner.observers.notify(&FetchPhase::Empty);
            }
            return;
        }

        let token = CancellationToken::new();
        st.pending = Some(token.clone());
        st.state = QueryState::Pending;
        drop(st);

        let channel = self.clone();
        let debounce = self.inner.debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Debounce cancelled for query {:?}", trimmed);
                    return;
                }
                _ = tokio::time::sleep(debounce) => {}
            }
            channel.dispatch(trimmed, Some(token), false).await;
        });
    }

    /// Re-run the current query right away, bypassing both the quiet window
    /// and any cached result.
    pub async fn retry(&self) {
        let trimmed = {
            let mut st = self.lock();
            if let Some(token) = st.pending.take() {
                token.cancel();
            }
            st.trimmed.clone()
        };
        if trimmed.is_empty() {
            return;
        }
        self.dispatch(trimmed, None, true).await;
    }

    async fn dispatch(&self, trimmed: String, token: Option<CancellationToken>, invalidate: bool) {
        let cleared = {
            let mut st = self.lock();
            // A change may have landed between the timer firing and here.
            if token.as_ref().is_some_and(CancellationToken::is_cancelled) || st.trimmed != trimmed
            {
                return;
            }
            st.pending = None;
            st.state = QueryState::Fetching;
            let cleared = !st.phase.is_empty();
            st.phase = FetchPhase::Empty;
            cleared
        };
        if cleared {
            self.inner.observers.notify(&FetchPhase::Empty);
        }

        info!("Searching for query {:?}", trimmed);
        let fetch = self.inner.fetch.clone();
        let phase = self
            .inner
            .cache
            .request(trimmed.clone(), move |query| fetch(query), invalidate)
            .await;

        {
            let mut st = self.lock();
            if st.trimmed != trimmed {
                debug!(
                    "Discarding stale result for {:?}; current query is {:?}",
                    trimmed, st.trimmed
                );
                return;
            }
            st.phase = phase.clone();
            if st.pending.is_none() {
                st.state = QueryState::Settled;
            }
        }
        self.inner.observers.notify(&phase);
    }

    /// The raw query as last fed.
    pub fn query(&self) -> String {
        self.lock().query.clone()
    }

    pub fn trimmed_query(&self) -> String {
        self.lock().trimmed.clone()
    }

    pub fn state(&self) -> QueryState {
        self.lock().state
    }

    pub fn phase(&self) -> FetchPhase<V> {
        self.lock().phase.clone()
    }

    /// Observe committed phase changes.
    #[must_use = "dropping the subscription unregisters the callback"]
    pub fn subscribe(
        &self,
        on_change: impl Fn(&FetchPhase<V>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.subscribe(on_change)
    }

    /// The cache backing this channel.
    pub fn cache(&self) -> &ResourceCache<String, V> {
        &self.inner.cache
    }
}

impl<V> std::fmt::Debug for QueryChannel<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryChannel")
            .field("debounce", &self.inner.debounce)
            .finish_non_exhaustive()
    }
}
