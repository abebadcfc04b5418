//! Background health polling.
//!
//! [`HealthMonitor`] re-queries the health key on a fixed interval,
//! independent of staleness or user interaction. Each result lands in the
//! shared [`QueryCache`], so readers of the health key always see the most
//! recent poll; failures are published as
//! [`CacheEvent::FetchFailed`](crate::cache::CacheEvent::FetchFailed).

use std::sync::Arc;
use std::time::Duration;

use rag_client_core::models::HealthResponse;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api;
use crate::cache::{QueryCache, QueryKey};
use crate::error::ApiError;
use crate::gateway::Gateway;

/// Handle to a running poller. Polling stops when the handle is dropped.
pub struct HealthMonitor {
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start polling `/health` every `interval`. The first poll is immediate.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(cache: QueryCache, gateway: Arc<Gateway>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let gateway = gateway.clone();
                let result = cache
                    .refetch(QueryKey::health(), move || {
                        let gateway = gateway.clone();
                        async move { Ok::<HealthResponse, ApiError>(api::health(&gateway).await?) }
                    })
                    .await;
                match result {
                    Ok(health) => {
                        tracing::trace!(status = %health.status, version = %health.version, "health poll")
                    }
                    Err(e) => tracing::debug!(error = %e, "health poll failed"),
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
