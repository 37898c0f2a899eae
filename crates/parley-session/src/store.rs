use std::sync::Mutex;

use anyhow::Result;

/// Client state that outlives the process: tokens plus minimal identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub user_id: Option<i64>,
}

/// Persistent key-value storage for the session.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<StoredSession>;
    fn save(&self, session: &StoredSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Process-local store, used when nothing should touch disk.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoredSession>,
}

impl MemoryStore {
    pub fn new(session: StoredSession) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<StoredSession> {
        let guard = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory store lock poisoned: {}", e))?;
        Ok(guard.clone())
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory store lock poisoned: {}", e))?;
        *guard = session.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.save(&StoredSession::default())
    }
}

impl<T: SessionStore + ?Sized> SessionStore for std::sync::Arc<T> {
    fn load(&self) -> Result<StoredSession> {
        (**self).load()
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        (**self).save(session)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}
