//! Persisted session: the bearer token and the signed-in user's profile.
//!
//! [`SessionStore`] is the only writer of session data. It keeps two keys in
//! a [`KeyValueStorage`] (`access_token` and `user`) and maintains one
//! invariant: both are present or both are absent. A half-written session
//! found at load time is discarded and the leftover key removed.
//!
//! Changes are published as [`SessionEvent`]s on a broadcast channel so the
//! auth manager and any views can react without polling.

use std::sync::Arc;

use anyhow::{Context, Result};
use rag_client_core::models::UserProfile;
use rag_client_core::storage::{KeyValueStorage, StorageOp, ACCESS_TOKEN_KEY, USER_KEY};
use tokio::sync::broadcast;

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user: UserProfile,
}

/// Notification published by the [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new session was persisted.
    Saved(UserProfile),
    /// The session was cleared on request (logout or partial-state cleanup).
    Cleared,
    /// The backend rejected the token. The session has already been
    /// cleared; the user must log in again.
    Invalidated,
}

const EVENT_CAPACITY: usize = 16;

pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { storage, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Read the persisted session.
    ///
    /// Returns `Ok(None)` when no complete, parseable session exists. If only
    /// one half is present, or the profile does not parse, the remaining
    /// state is removed before returning.
    pub fn load(&self) -> Result<Option<Session>> {
        let token = self
            .storage
            .get(ACCESS_TOKEN_KEY)?
            .filter(|t| !t.trim().is_empty());
        let user_json = self.storage.get(USER_KEY)?;

        match (token, user_json) {
            (None, None) => Ok(None),
            (Some(token), Some(user_json)) => match serde_json::from_str::<UserProfile>(&user_json)
            {
                Ok(user) => Ok(Some(Session { token, user })),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse saved user; discarding session");
                    self.remove_pair()?;
                    Ok(None)
                }
            },
            (token, user) => {
                tracing::warn!(
                    has_token = token.is_some(),
                    has_user = user.is_some(),
                    "partial session in storage; discarding"
                );
                self.remove_pair()?;
                Ok(None)
            }
        }
    }

    /// Persist `session`, replacing any previous one.
    pub fn save(&self, session: &Session) -> Result<()> {
        let user_json =
            serde_json::to_string(&session.user).context("Failed to serialize user profile")?;
        self.storage.apply(&[
            StorageOp::set(ACCESS_TOKEN_KEY, session.token.as_str()),
            StorageOp::set(USER_KEY, user_json),
        ])?;
        tracing::debug!(user_id = %session.user.id, "session saved");
        let _ = self.events.send(SessionEvent::Saved(session.user.clone()));
        Ok(())
    }

    /// Remove the persisted session.
    pub fn clear(&self) -> Result<()> {
        self.remove_pair()?;
        tracing::debug!("session cleared");
        let _ = self.events.send(SessionEvent::Cleared);
        Ok(())
    }

    /// Remove the persisted session because the backend rejected it.
    ///
    /// Publishes exactly one [`SessionEvent::Invalidated`] per call.
    pub fn invalidate(&self) -> Result<()> {
        let result = self.remove_pair();
        tracing::warn!("session invalidated by backend; login required");
        let _ = self.events.send(SessionEvent::Invalidated);
        result
    }

    /// Current bearer token, if a session is stored.
    ///
    /// Storage failures are logged and treated as "no token"; the request
    /// then goes out unauthenticated and the backend decides.
    pub fn token(&self) -> Option<String> {
        match self.storage.get(ACCESS_TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read access token");
                None
            }
        }
    }

    fn remove_pair(&self) -> Result<()> {
        self.storage.apply(&[
            StorageOp::remove(ACCESS_TOKEN_KEY),
            StorageOp::remove(USER_KEY),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_client_core::storage::memory::MemoryStorage;

    fn user() -> UserProfile {
        UserProfile {
            id: "u1".into(),
            email: "user@example.com".into(),
            name: "Test User".into(),
            department: "Engineering".into(),
            access_level: 1,
        }
    }

    fn store() -> (Arc<MemoryStorage>, SessionStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone());
        (storage, store)
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let (_, store) = store();
        let session = Session {
            token: "tok1".into(),
            user: user(),
        };
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));
        assert_eq!(store.token().as_deref(), Some("tok1"));
    }

    #[test]
    fn test_clear_then_load_is_absent() {
        let (storage, store) = store();
        store
            .save(&Session {
                token: "tok1".into(),
                user: user(),
            })
            .unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_token_only_is_discarded() {
        let (storage, store) = store();
        storage.set(ACCESS_TOKEN_KEY, "tok1").unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_user_only_is_discarded() {
        let (storage, store) = store();
        storage
            .set(USER_KEY, &serde_json::to_string(&user()).unwrap())
            .unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert_eq!(storage.get(USER_KEY).unwrap(), None);
    }

    #[test]
    fn test_unparseable_user_is_discarded() {
        let (storage, store) = store();
        storage.set(ACCESS_TOKEN_KEY, "tok1").unwrap();
        storage.set(USER_KEY, "{not json").unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_events_published() {
        let (_, store) = store();
        let mut rx = store.subscribe();

        store
            .save(&Session {
                token: "tok1".into(),
                user: user(),
            })
            .unwrap();
        store.invalidate().unwrap();

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Saved(user()));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Invalidated);
        assert!(rx.try_recv().is_err());
    }
}
