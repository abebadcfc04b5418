//! Auth session manager: who is signed in, and the transitions between
//! signed-in and signed-out.
//!
//! ```text
//!            init()                       login() ok
//!  Unknown ──────────▶ Anonymous ─────────────────────▶ Authenticated(user)
//!     │                    ▲                                   │
//!     │  valid session     │  logout() / 401 invalidation      │
//!     └────────────────────┼───────────────────────────────────┘
//!                          └───────────────────────────────────┘
//! ```
//!
//! The manager is an explicit object, constructed with the gateway,
//! session store and query cache it works with, and shared behind `Arc`.
//! Current state is published on a `watch` channel.
//!
//! Every transition flushes the query cache, so nothing fetched under one
//! identity is served under another.

use std::sync::Arc;

use anyhow::Result;
use rag_client_core::models::{LoginRequest, UserProfile};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::api;
use crate::cache::QueryCache;
use crate::error::{ApiError, ApiResult};
use crate::gateway::Gateway;
use crate::session::{Session, SessionEvent, SessionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The persisted session has not been evaluated yet.
    Unknown,
    Anonymous,
    Authenticated(UserProfile),
}

impl AuthState {
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            AuthState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

pub struct AuthSessionManager {
    gateway: Arc<Gateway>,
    store: Arc<SessionStore>,
    cache: QueryCache,
    state: watch::Sender<AuthState>,
}

impl AuthSessionManager {
    pub fn new(gateway: Arc<Gateway>, store: Arc<SessionStore>, cache: QueryCache) -> Self {
        let (state, _) = watch::channel(AuthState::Unknown);
        Self {
            gateway,
            store,
            cache,
            state,
        }
    }

    /// Evaluate the persisted session. Called once at startup.
    ///
    /// A storage failure leaves the manager `Anonymous` and is returned.
    pub fn init(&self) -> Result<AuthState> {
        let next = match self.store.load() {
            Ok(Some(session)) => AuthState::Authenticated(session.user),
            Ok(None) => AuthState::Anonymous,
            Err(e) => {
                self.state.send_replace(AuthState::Anonymous);
                return Err(e.context("Failed to load saved session"));
            }
        };
        tracing::debug!(authenticated = next.user().is_some(), "auth initialized");
        self.state.send_replace(next.clone());
        Ok(next)
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.state.borrow(), AuthState::Authenticated(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.state.borrow(), AuthState::Unknown)
    }

    /// Sign in and persist the session.
    ///
    /// On failure the state is left as it was and the error is returned.
    pub async fn login(&self, credentials: LoginRequest) -> ApiResult<UserProfile> {
        let response = match api::login(&self.gateway, &credentials).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(email = %credentials.email, error = %e, "login failed");
                return Err(e.into());
            }
        };

        let session = Session {
            token: response.access_token,
            user: response.user,
        };
        self.store
            .save(&session)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;

        self.cache.clear();
        self.state
            .send_replace(AuthState::Authenticated(session.user.clone()));
        tracing::info!(user_id = %session.user.id, "logged in");
        Ok(session.user)
    }

    /// Sign out. Always ends `Anonymous` with the local session removed.
    ///
    /// The backend call is best-effort: its failure is logged, not returned.
    pub async fn logout(&self) {
        if let Err(e) = api::logout(&self.gateway).await {
            tracing::warn!(error = %e, "logout request failed; clearing local session anyway");
        }
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "failed to clear saved session");
        }
        self.become_anonymous();
        tracing::info!("logged out");
    }

    /// Apply a session event published by the store.
    pub fn handle_event(&self, event: &SessionEvent) {
        if let SessionEvent::Invalidated = event {
            self.become_anonymous();
        }
    }

    /// React to gateway-forced invalidations for the life of the runtime.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_invalidation_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.store.subscribe();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => manager.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "session events lagged; re-reading store");
                        // Missed events may include an invalidation.
                        if manager.store.token().is_none() {
                            manager.become_anonymous();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn become_anonymous(&self) {
        self.cache.clear();
        self.state.send_replace(AuthState::Anonymous);
    }
}
