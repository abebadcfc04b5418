//! One-shot mutations: state-changing backend calls that are never cached
//! and never retried.
//!
//! A [`Mutation`] wraps an async function and a list of cache key prefixes
//! to invalidate when it succeeds. Each [`execute`](Mutation::execute)
//! call runs the function exactly once and moves the observable
//! [`MutationState`] from `Pending` to either `Success` or `Error`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::QueryCache;
use crate::error::{ApiError, ApiResult};

type MutationFuture<T> = Pin<Box<dyn Future<Output = ApiResult<T>> + Send>>;
type MutationFn<P, T> = Arc<dyn Fn(P) -> MutationFuture<T> + Send + Sync>;

/// Observable state of the most recent invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    Idle,
    Pending,
    Success(T),
    Error(ApiError),
}

impl<T> MutationState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationState::Pending)
    }
}

pub struct Mutation<P, T> {
    name: &'static str,
    run: MutationFn<P, T>,
    invalidates: Vec<Vec<String>>,
    state: watch::Sender<MutationState<T>>,
}

impl<P, T> Mutation<P, T>
where
    P: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let (state, _) = watch::channel(MutationState::Idle);
        Self {
            name,
            run: Arc::new(move |payload| Box::pin(f(payload)) as MutationFuture<T>),
            invalidates: Vec::new(),
            state,
        }
    }

    /// Declare a cache key prefix to invalidate after each success.
    pub fn invalidates(mut self, prefix: &[&str]) -> Self {
        self.invalidates
            .push(prefix.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn state(&self) -> MutationState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<T>> {
        self.state.subscribe()
    }

    /// Run the mutation once with `payload`.
    ///
    /// On success the declared prefixes are invalidated in `cache`. The
    /// result itself is never stored in the cache.
    pub async fn execute(&self, cache: &QueryCache, payload: P) -> ApiResult<T> {
        self.state.send_replace(MutationState::Pending);

        let result = (self.run)(payload).await;

        match &result {
            Ok(data) => {
                for prefix in &self.invalidates {
                    let prefix: Vec<&str> = prefix.iter().map(String::as_str).collect();
                    cache.invalidate(&prefix);
                }
                tracing::debug!(mutation = self.name, "succeeded");
                self.state.send_replace(MutationState::Success(data.clone()));
            }
            Err(e) => {
                tracing::warn!(mutation = self.name, error = %e, "failed");
                self.state.send_replace(MutationState::Error(e.clone()));
            }
        }
        result
    }
}
