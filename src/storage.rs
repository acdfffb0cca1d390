/// Persisted session state
///
/// Holds the access token, refresh token and current user id between runs.
/// Read at startup to decide the initial auth state and whether the
/// connection manager should try to connect at all.

use crate::error::{ClientError, Result};
use crate::models::AuthTokens;
use crate::services::websocket_manager::CredentialSource;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const TOKEN_KEY: &str = "token";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const USER_ID_KEY: &str = "userId";

/// Snapshot of the persisted session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
}

/// SQLite-backed key/value store for the authenticated session
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) the session database at the given path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing and ephemeral sessions)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ClientError::State("Failed to lock session store".to_string()))
    }

    fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row("SELECT value FROM session WHERE key = ?1", (key,), |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Persist a freshly issued token pair and the user it belongs to
    pub fn save(&self, tokens: &AuthTokens, user_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        for (key, value) in [
            (TOKEN_KEY, tokens.access_token.as_str()),
            (REFRESH_TOKEN_KEY, tokens.refresh_token.as_str()),
            (USER_ID_KEY, user_id),
        ] {
            tx.execute(
                "INSERT OR REPLACE INTO session (key, value, updated_at) VALUES (?1, ?2, ?3)",
                (key, value, &updated_at),
            )?;
        }
        tx.commit()?;

        log::debug!("Session saved for user {}", user_id);
        Ok(())
    }

    /// Load the persisted session, if an access token is present
    pub fn load(&self) -> Result<Option<SessionData>> {
        let conn = self.lock()?;
        let Some(access_token) = Self::get(&conn, TOKEN_KEY)? else {
            return Ok(None);
        };

        Ok(Some(SessionData {
            access_token,
            refresh_token: Self::get(&conn, REFRESH_TOKEN_KEY)?.filter(|t| !t.is_empty()),
            user_id: Self::get(&conn, USER_ID_KEY)?,
        }))
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        Self::get(&conn, TOKEN_KEY)
    }

    pub fn user_id(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        Self::get(&conn, USER_ID_KEY)
    }

    /// Drop only the access token (the server rejected it)
    pub fn clear_access_token(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM session WHERE key = ?1", (TOKEN_KEY,))?;
        Ok(())
    }

    /// Forget the whole session (logout)
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM session", ())?;
        log::debug!("Session cleared");
        Ok(())
    }
}

impl CredentialSource for SessionStore {
    fn credential(&self) -> Option<String> {
        match self.access_token() {
            Ok(token) => token,
            Err(e) => {
                log::warn!("Failed to read access token: {}", e);
                None
            }
        }
    }
}
