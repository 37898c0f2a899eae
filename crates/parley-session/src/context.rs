use std::sync::{Arc, RwLock};

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::store::{MemoryStore, SessionStore, StoredSession};

/// Lifecycle notifications for whoever owns navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { username: String },
    Refreshed,
    /// Tokens were invalidated by the server or are missing; the user must
    /// log in again.
    LoginRequired,
    LoggedOut,
}

/// The explicit session object injected into the networking layer.
///
/// Holds the in-memory copy of the tokens and writes every change through to
/// the backing store. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    store: Box<dyn SessionStore>,
    state: RwLock<StoredSession>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    /// Load the persisted session at startup.
    pub fn load(store: impl SessionStore + 'static) -> Result<Self> {
        let state = store.load()?;
        if state.refresh_token.is_some() {
            info!(
                "Restored session for {}",
                state.username.as_deref().unwrap_or("<unknown>")
            );
        }
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            inner: Arc::new(SessionInner {
                store: Box::new(store),
                state: RwLock::new(state),
                events,
            }),
        })
    }

    pub fn in_memory(session: StoredSession) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(SessionInner {
                store: Box::new(MemoryStore::new(session.clone())),
                state: RwLock::new(session),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> StoredSession {
        self.read(|s| s.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(|s| s.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(|s| s.refresh_token.clone())
    }

    pub fn username(&self) -> Option<String> {
        self.read(|s| s.username.clone())
    }

    pub fn user_id(&self) -> Option<i64> {
        self.read(|s| s.user_id)
    }

    pub fn is_logged_in(&self) -> bool {
        self.read(|s| s.refresh_token.is_some())
    }

    /// Replace the whole session after a successful login.
    pub fn store_login(&self, access: String, refresh: String, username: String) -> Result<()> {
        let session = StoredSession {
            access_token: Some(access),
            refresh_token: Some(refresh),
            username: Some(username.clone()),
            user_id: None,
        };
        self.inner.store.save(&session)?;
        *self.write() = session;
        let _ = self.inner.events.send(SessionEvent::LoggedIn { username });
        Ok(())
    }

    /// Record identity learned after login (current-user lookup).
    pub fn set_identity(&self, username: String, user_id: Option<i64>) {
        let snapshot = {
            let mut state = self.write();
            state.username = Some(username);
            if user_id.is_some() {
                state.user_id = user_id;
            }
            state.clone()
        };
        self.persist(&snapshot);
    }

    /// Install tokens minted by a refresh. A missing `refresh` keeps the
    /// current refresh token.
    pub fn update_tokens(&self, access: String, refresh: Option<String>) {
        let snapshot = {
            let mut state = self.write();
            state.access_token = Some(access);
            if let Some(refresh) = refresh {
                state.refresh_token = Some(refresh);
            }
            state.clone()
        };
        self.persist(&snapshot);
        let _ = self.inner.events.send(SessionEvent::Refreshed);
    }

    /// Drop every token and identity field, in memory and on disk, and tell
    /// subscribers a new login is needed.
    pub fn invalidate(&self) {
        warn!("Session invalidated; login required");
        self.wipe();
        let _ = self.inner.events.send(SessionEvent::LoginRequired);
    }

    pub fn logout(&self) {
        info!("Logged out");
        self.wipe();
        let _ = self.inner.events.send(SessionEvent::LoggedOut);
    }

    fn wipe(&self) {
        *self.write() = StoredSession::default();
        if let Err(e) = self.inner.store.clear() {
            error!("Failed to clear session store: {}", e);
        }
    }

    fn persist(&self, session: &StoredSession) {
        if let Err(e) = self.inner.store.save(session) {
            error!("Failed to persist session: {}", e);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&StoredSession) -> T) -> T {
        let guard = self
            .inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoredSession> {
        self.inner
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
