//! Client facade wiring the gateway, session store, auth manager, query
//! cache and mutations together.
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  RagClient   │
//!                 └──┬───┬───┬───┘
//!        ┌───────────┘   │   └────────────┐
//!        ▼               ▼                ▼
//!  ┌───────────┐  ┌────────────┐  ┌──────────────┐
//!  │   Auth    │  │ QueryCache │  │  Mutations   │
//!  │  Manager  │  │  history   │  │ search/fdbk  │
//!  └─────┬─────┘  │  health    │  └──────┬───────┘
//!        │        └─────┬──────┘         │
//!        └──────────────┼────────────────┘
//!                       ▼
//!                 ┌───────────┐     ┌──────────────┐
//!                 │  Gateway  │────▶│ SessionStore │
//!                 └───────────┘     └──────────────┘
//! ```
//!
//! Every collaborator is constructed here and handed to the others
//! explicitly; there are no globals.

use std::sync::Arc;

use anyhow::Result;
use rag_client_core::models::{
    FeedbackRequest, FeedbackResponse, HealthResponse, HistoryResponse, LoginRequest,
    SearchRequest, SearchResponse, UserProfile,
};
use rag_client_core::storage::KeyValueStorage;
use rag_client_core::validate::FeedbackDraft;
use tokio::task::JoinHandle;

use crate::api;
use crate::auth::{AuthSessionManager, AuthState};
use crate::cache::{CachePolicy, QueryCache, QueryError, QueryKey};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::gateway::Gateway;
use crate::health::HealthMonitor;
use crate::mutation::Mutation;
use crate::session::SessionStore;
use crate::storage::FileStorage;

pub struct RagClient {
    config: Arc<Config>,
    gateway: Arc<Gateway>,
    session: Arc<SessionStore>,
    auth: Arc<AuthSessionManager>,
    cache: QueryCache,
    search: Mutation<SearchRequest, SearchResponse>,
    feedback: Mutation<FeedbackRequest, FeedbackResponse>,
    /// Sent with every search so the backend can group one client run.
    session_id: String,
}

impl RagClient {
    /// Build a client persisting its session in `config.session.path`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = Arc::new(FileStorage::new(config.session.path.clone()));
        Self::with_storage(config, storage)
    }

    /// Build a client over an arbitrary storage backend.
    pub fn with_storage(config: &Config, storage: Arc<dyn KeyValueStorage>) -> Result<Self> {
        let config = Arc::new(config.clone());
        let session = Arc::new(SessionStore::new(storage));
        let gateway = Arc::new(Gateway::from_config(&config.api, session.clone())?);
        let cache = QueryCache::new(CachePolicy::from(&config.cache));
        let auth = Arc::new(AuthSessionManager::new(
            gateway.clone(),
            session.clone(),
            cache.clone(),
        ));

        let search = {
            let gateway = gateway.clone();
            Mutation::new("search", move |request: SearchRequest| {
                let gateway = gateway.clone();
                async move { api::search(&gateway, &request).await }
            })
        };

        let feedback = {
            let gateway = gateway.clone();
            Mutation::new("feedback", move |request: FeedbackRequest| {
                let gateway = gateway.clone();
                async move { api::submit_feedback(&gateway, &request).await }
            })
            .invalidates(&["history"])
        };

        Ok(Self {
            config,
            gateway,
            session,
            auth,
            cache,
            search,
            feedback,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Restore the saved session and start reacting to forced sign-outs.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init(&self) -> Result<(AuthState, JoinHandle<()>)> {
        let listener = self.auth.spawn_invalidation_listener();
        let state = self.auth.init()?;
        Ok((state, listener))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn auth(&self) -> &Arc<AuthSessionManager> {
        &self.auth
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn search_mutation(&self) -> &Mutation<SearchRequest, SearchResponse> {
        &self.search
    }

    pub fn feedback_mutation(&self) -> &Mutation<FeedbackRequest, FeedbackResponse> {
        &self.feedback
    }

    pub async fn login(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> ApiResult<UserProfile> {
        self.auth
            .login(LoginRequest {
                email: email.into(),
                password: password.into(),
            })
            .await
    }

    pub async fn logout(&self) {
        self.auth.logout().await
    }

    /// Ask a question. Never cached, never retried.
    ///
    /// Missing `user_id` and `session_id` are filled from the current
    /// session and this client instance.
    pub async fn search(&self, mut request: SearchRequest) -> ApiResult<SearchResponse> {
        if request.user_id.is_none() {
            request.user_id = self.auth.current_user().map(|u| u.id);
        }
        if request.session_id.is_none() {
            request.session_id = Some(self.session_id.clone());
        }
        self.search.execute(&self.cache, request).await
    }

    /// Rate an answer. On success every cached history page is invalidated.
    pub async fn submit_feedback(&self, draft: FeedbackDraft) -> ApiResult<FeedbackResponse> {
        let request = draft.into_request()?;
        self.feedback.execute(&self.cache, request).await
    }

    pub async fn history(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryResponse, QueryError<HistoryResponse>> {
        let gateway = self.gateway.clone();
        self.cache
            .query(QueryKey::history(page, page_size), move || {
                let gateway = gateway.clone();
                async move {
                    Ok::<HistoryResponse, ApiError>(api::history(&gateway, page, page_size).await?)
                }
            })
            .await
    }

    pub async fn health(&self) -> Result<HealthResponse, QueryError<HealthResponse>> {
        let gateway = self.gateway.clone();
        self.cache
            .query(QueryKey::health(), move || {
                let gateway = gateway.clone();
                async move { Ok::<HealthResponse, ApiError>(api::health(&gateway).await?) }
            })
            .await
    }

    /// Start polling `/health` at the configured interval.
    pub fn watch_health(&self) -> HealthMonitor {
        HealthMonitor::spawn(
            self.cache.clone(),
            self.gateway.clone(),
            self.config.health.poll_interval(),
        )
    }
}
