pub mod context;
pub mod migrations;
pub mod store;
pub mod token;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use context::{SessionContext, SessionEvent};
pub use store::{MemoryStore, SessionStore, StoredSession};

const KEY_ACCESS: &str = "access_token";
const KEY_REFRESH: &str = "refresh_token";
const KEY_USERNAME: &str = "username";
const KEY_USER_ID: &str = "user_id";

/// Persistent key-value store backed by a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Session store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Session store lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM session_kv WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    /// Number of persisted keys.
    pub fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM session_kv", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl SessionStore for SqliteStore {
    fn load(&self) -> Result<StoredSession> {
        Ok(StoredSession {
            access_token: self.get(KEY_ACCESS)?,
            refresh_token: self.get(KEY_REFRESH)?,
            username: self.get(KEY_USERNAME)?,
            user_id: self.get(KEY_USER_ID)?.and_then(|v| v.parse().ok()),
        })
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        let user_id = session.user_id.map(|id| id.to_string());
        let entries = [
            (KEY_ACCESS, session.access_token.as_deref()),
            (KEY_REFRESH, session.refresh_token.as_deref()),
            (KEY_USERNAME, session.username.as_deref()),
            (KEY_USER_ID, user_id.as_deref()),
        ];

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for (key, value) in entries {
                match value {
                    Some(v) => {
                        tx.execute(
                            "INSERT INTO session_kv (key, value) VALUES (?1, ?2)
                             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                            updated_at = datetime('now')",
                            (key, v),
                        )?;
                    }
                    None => {
                        tx.execute("DELETE FROM session_kv WHERE key = ?1", [key])?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM session_kv", [])?;
            Ok(())
        })
    }
}
