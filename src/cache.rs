//! In-memory query cache with staleness, lazy eviction and request
//! de-duplication.
//!
//! Each cached resource is addressed by a [`QueryKey`] such as
//! `["history", "1", "10"]`. Reads go through [`QueryCache::query`]:
//!
//! 1. Expired entries (unread for longer than `evict_after`) are dropped.
//! 2. A fresh entry (younger than `stale_after` and not invalidated) is
//!    returned without calling the fetcher.
//! 3. If a fetch for the key is already in flight, the caller waits on it.
//! 4. Otherwise a fetch is spawned; transient failures are retried up to
//!    `retries` times with exponential backoff.
//!
//! Fetches run as spawned tasks. A caller that drops its future does not
//! cancel the fetch: the result still lands in the cache and is simply not
//! delivered to anyone.
//!
//! On failure the previous value, if any, stays cached and is returned
//! alongside the error in [`QueryError::stale`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::{ApiError, ApiResult, HttpError, HttpErrorKind};

// ═══════════════════════════════════════════════════════════════════════
// Keys and policy
// ═══════════════════════════════════════════════════════════════════════

/// Logical identifier of a cached resource.
///
/// The first segment names the resource family (`"history"`, `"health"`);
/// the rest are its parameters. Invalidation matches on prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn health() -> Self {
        Self::new(["health"])
    }

    pub fn history(page: u32, page_size: u32) -> Self {
        Self(vec![
            "history".to_string(),
            page.to_string(),
            page_size.to_string(),
        ])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        prefix.len() <= self.0.len() && prefix.iter().zip(&self.0).all(|(p, s)| *p == s)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub stale_after: Duration,
    pub evict_after: Duration,
    /// Extra attempts after a transient query failure.
    pub retries: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            stale_after: config.stale_after(),
            evict_after: config.evict_after(),
            retries: config.query_retries,
        }
    }
}

/// Failures worth retrying: the backend may answer differently next time.
fn is_transient(err: &ApiError) -> bool {
    matches!(
        err.http_kind(),
        Some(HttpErrorKind::NetworkError | HttpErrorKind::Timeout | HttpErrorKind::ServerError)
    )
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

// ═══════════════════════════════════════════════════════════════════════
// Results and events
// ═══════════════════════════════════════════════════════════════════════

/// A failed query, carrying the last good value if one was cached.
#[derive(Debug, Clone)]
pub struct QueryError<T> {
    pub error: ApiError,
    pub stale: Option<T>,
}

impl<T> fmt::Display for QueryError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<T: fmt::Debug> std::error::Error for QueryError<T> {}

impl<T> QueryError<T> {
    pub fn into_inner(self) -> ApiError {
        self.error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Nothing cached and nothing in flight.
    Idle,
    Fetching,
    Fresh,
    /// Cached but due for refetch on next read.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
    Evicted(QueryKey),
    FetchFailed { key: QueryKey, error: ApiError },
    Cleared,
}

// ═══════════════════════════════════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════════════════════════════════

type Outcome = ApiResult<Value>;

struct CacheEntry {
    data: Value,
    fetched_at: Instant,
    last_access: Instant,
    invalidated: bool,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, stale_after: Duration) -> bool {
        !self.invalidated && now.duration_since(self.fetched_at) < stale_after
    }
}

/// What to do with a fetch result once it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Landing {
    Store,
    /// Invalidated while in flight; store but mark for refetch.
    StoreInvalidated,
    /// Cache cleared while in flight; drop the result.
    Discard,
}

struct InFlight {
    /// Distinguishes this fetch from a later one for the same key.
    id: u64,
    rx: watch::Receiver<Option<Outcome>>,
    landing: Landing,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<QueryKey, CacheEntry>,
    in_flight: HashMap<QueryKey, InFlight>,
    next_fetch_id: u64,
}

struct Shared {
    policy: CachePolicy,
    inner: Mutex<Inner>,
    events: broadcast::Sender<CacheEvent>,
}

/// Shared query cache. Cloning is cheap and yields a handle to the same cache.
#[derive(Clone)]
pub struct QueryCache {
    shared: Arc<Shared>,
}

const EVENT_CAPACITY: usize = 64;

impl QueryCache {
    pub fn new(policy: CachePolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                policy,
                inner: Mutex::new(Inner::default()),
                events,
            }),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.shared.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.shared.events.subscribe()
    }

    /// Read `key`, fetching it with `fetcher` if it is absent, stale or
    /// invalidated.
    pub async fn query<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<T, QueryError<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let (fetch_id, mut rx) = {
            let now = Instant::now();
            let mut inner = self.shared.lock();
            self.shared.evict_expired(&mut inner, now);

            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.last_access = now;
                if entry.is_fresh(now, self.shared.policy.stale_after) {
                    tracing::trace!(key = %key, "cache hit");
                    let data = entry.data.clone();
                    drop(inner);
                    return decode::<T>(&key, data).map_err(|error| QueryError {
                        error,
                        stale: None,
                    });
                }
            }

            let joined = inner.in_flight.get(&key).map(|f| (f.id, f.rx.clone()));
            match joined {
                Some((id, rx)) => {
                    tracing::trace!(key = %key, "joining in-flight fetch");
                    (id, rx)
                }
                None => {
                    let id = inner.next_fetch_id;
                    inner.next_fetch_id += 1;
                    let (tx, rx) = watch::channel(None);
                    inner.in_flight.insert(
                        key.clone(),
                        InFlight {
                            id,
                            rx: rx.clone(),
                            landing: Landing::Store,
                        },
                    );
                    drop(inner);
                    self.spawn_fetch(key.clone(), id, fetcher, tx);
                    (id, rx)
                }
            }
        };

        let outcome = match rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(aborted(&key))),
            Err(_) => {
                // The fetch task ended without reporting (panicked).
                self.shared.take_in_flight(&key, fetch_id);
                Err(aborted(&key))
            }
        };

        match outcome.and_then(|data| decode::<T>(&key, data)) {
            Ok(data) => Ok(data),
            Err(error) => Err(QueryError {
                error,
                stale: self.peek(&key),
            }),
        }
    }

    /// Fetch `key` now, regardless of staleness.
    pub async fn refetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<T, QueryError<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        {
            let mut inner = self.shared.lock();
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.invalidated = true;
            }
        }
        self.query(key, fetcher).await
    }

    /// The cached value for `key`, fresh or not. Does not count as an access.
    pub fn peek<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let inner = self.shared.lock();
        let entry = inner.entries.get(key)?;
        serde_json::from_value(entry.data.clone()).ok()
    }

    pub fn status(&self, key: &QueryKey) -> QueryStatus {
        let inner = self.shared.lock();
        if inner.in_flight.contains_key(key) {
            return QueryStatus::Fetching;
        }
        match inner.entries.get(key) {
            Some(entry) if entry.is_fresh(Instant::now(), self.shared.policy.stale_after) => {
                QueryStatus::Fresh
            }
            Some(_) => QueryStatus::Stale,
            None => QueryStatus::Idle,
        }
    }

    /// When `key` was last fetched successfully.
    pub fn fetched_at(&self, key: &QueryKey) -> Option<Instant> {
        self.shared.lock().entries.get(key).map(|e| e.fetched_at)
    }

    /// Mark every key starting with `prefix` for refetch on next read.
    ///
    /// Cached values are kept as a fallback. Fetches already in flight for
    /// matching keys land as invalidated.
    pub fn invalidate(&self, prefix: &[&str]) -> usize {
        let mut invalidated = Vec::new();
        {
            let mut inner = self.shared.lock();
            for (key, entry) in inner.entries.iter_mut() {
                if key.starts_with(prefix) && !entry.invalidated {
                    entry.invalidated = true;
                    invalidated.push(key.clone());
                }
            }
            for (key, flight) in inner.in_flight.iter_mut() {
                if key.starts_with(prefix) && flight.landing == Landing::Store {
                    flight.landing = Landing::StoreInvalidated;
                }
            }
        }
        for key in &invalidated {
            tracing::debug!(key = %key, "invalidated");
            let _ = self.shared.events.send(CacheEvent::Invalidated(key.clone()));
        }
        invalidated.len()
    }

    /// Drop every entry and detach every fetch in flight.
    ///
    /// Callers already waiting on a detached fetch still receive its
    /// result, but it is not stored, and later queries start a new fetch.
    pub fn clear(&self) {
        {
            let mut inner = self.shared.lock();
            inner.entries.clear();
            inner.in_flight.clear();
        }
        tracing::debug!("cache cleared");
        let _ = self.shared.events.send(CacheEvent::Cleared);
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn_fetch<T, F, Fut>(
        &self,
        key: QueryKey,
        id: u64,
        fetcher: F,
        tx: watch::Sender<Option<Outcome>>,
    ) where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let retries = shared.policy.retries;
            let mut attempt = 0;
            let outcome = loop {
                match fetcher().await {
                    Ok(data) => break encode(&key, &data),
                    Err(e) if attempt < retries && is_transient(&e) => {
                        attempt += 1;
                        tracing::warn!(key = %key, attempt, error = %e, "query failed; retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                    Err(e) => break Err(e),
                }
            };
            shared.complete(&key, id, &outcome);
            // Err only when every caller has gone away.
            let _ = tx.send(Some(outcome));
        });
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every update leaves the map consistent, so poisoning is ignored.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn evict_expired(&self, inner: &mut Inner, now: Instant) {
        let evict_after = self.policy.evict_after;
        let expired: Vec<QueryKey> = inner
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_access) > evict_after)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            inner.entries.remove(&key);
            tracing::debug!(key = %key, "evicted");
            let _ = self.events.send(CacheEvent::Evicted(key));
        }
    }

    /// Remove the in-flight record for `key` if it still belongs to fetch `id`.
    fn take_in_flight(&self, key: &QueryKey, id: u64) -> Option<InFlight> {
        Self::take_locked(&mut self.lock(), key, id)
    }

    fn take_locked(inner: &mut Inner, key: &QueryKey, id: u64) -> Option<InFlight> {
        match inner.in_flight.get(key) {
            Some(flight) if flight.id == id => inner.in_flight.remove(key),
            _ => None,
        }
    }

    fn complete(&self, key: &QueryKey, id: u64, outcome: &Outcome) {
        let now = Instant::now();
        let mut inner = self.lock();
        // A missing record means the cache was cleared while this fetch ran.
        let landing = Self::take_locked(&mut inner, key, id)
            .map(|f| f.landing)
            .unwrap_or(Landing::Discard);

        match outcome {
            Ok(data) if landing != Landing::Discard => {
                let last_access = inner
                    .entries
                    .get(key)
                    .map(|e| e.last_access.max(now))
                    .unwrap_or(now);
                inner.entries.insert(
                    key.clone(),
                    CacheEntry {
                        data: data.clone(),
                        fetched_at: now,
                        last_access,
                        invalidated: landing == Landing::StoreInvalidated,
                    },
                );
                drop(inner);
                tracing::debug!(key = %key, "cache updated");
                let _ = self.events.send(CacheEvent::Updated(key.clone()));
            }
            Ok(_) => {}
            Err(error) => {
                drop(inner);
                let _ = self.events.send(CacheEvent::FetchFailed {
                    key: key.clone(),
                    error: error.clone(),
                });
            }
        }
    }
}

fn encode<T: Serialize>(key: &QueryKey, data: &T) -> Outcome {
    serde_json::to_value(data).map_err(|e| {
        HttpError::new(
            HttpErrorKind::Decode,
            format!("failed to cache {}: {}", key, e),
        )
        .into()
    })
}

fn decode<T: DeserializeOwned>(key: &QueryKey, data: Value) -> ApiResult<T> {
    serde_json::from_value(data).map_err(|e| {
        HttpError::new(
            HttpErrorKind::Decode,
            format!("cached value for {} has unexpected shape: {}", key, e),
        )
        .into()
    })
}

fn aborted(key: &QueryKey) -> ApiError {
    HttpError::new(
        HttpErrorKind::RequestError,
        format!("fetch for {} ended without a result", key),
    )
    .into()
}
