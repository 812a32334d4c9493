// @zen-component: SES-TokenStore
//
//! Durable key/value persistence for the session.
//!
//! Four keys are written and all four go away together on [`TokenStore::clear`]:
//! `access_token`, `refresh_token`, `token_saved_at` and `cached_identity`.
//! Stores hold no session logic; the controller is their only writer.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::session::{IdentitySnapshot, SessionTokens};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Token store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Session persistence contract. All operations are synchronous.
pub trait TokenStore: Send + Sync {
    /// Read the stored tokens (all fields `None` when nothing is stored).
    fn get(&self) -> StoreResult<SessionTokens>;

    /// Overwrite the stored tokens.
    fn set(&self, tokens: &SessionTokens) -> StoreResult<()>;

    /// Remove every key the store writes, identity snapshot included.
    fn clear(&self) -> StoreResult<()>;

    /// Read the cached identity snapshot.
    fn identity_snapshot(&self) -> StoreResult<Option<IdentitySnapshot>>;

    /// Overwrite the cached identity snapshot.
    fn set_identity_snapshot(&self, snapshot: &IdentitySnapshot) -> StoreResult<()>;

    /// Write tokens and snapshot as one unit.
    ///
    /// The default writes them one after the other; stores that can do it
    /// in a single write should override this.
    fn save_session(&self, tokens: &SessionTokens, snapshot: &IdentitySnapshot) -> StoreResult<()> {
        self.set(tokens)?;
        self.set_identity_snapshot(snapshot)
    }
}

/// On-disk layout. Field names are the persisted keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_saved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cached_identity: Option<IdentitySnapshot>,
}

impl StoredSession {
    fn tokens(&self) -> SessionTokens {
        SessionTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            saved_at: self.token_saved_at,
        }
    }

    fn apply_tokens(&mut self, tokens: &SessionTokens) {
        self.access_token = tokens.access_token.clone();
        self.refresh_token = tokens.refresh_token.clone();
        self.token_saved_at = tokens.saved_at;
    }

    fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.token_saved_at.is_none()
            && self.cached_identity.is_none()
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Process-local store, used by tests and by consumers that opt out of
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<StoredSession>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session.
    pub fn with_session(tokens: &SessionTokens, snapshot: Option<&IdentitySnapshot>) -> Self {
        let mut stored = StoredSession::default();
        stored.apply_tokens(tokens);
        stored.cached_identity = snapshot.cloned();
        Self {
            inner: Mutex::new(stored),
        }
    }

    /// `true` when no key is present.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.inner.lock().map_err(|_| StoreError::Poisoned)?.is_empty())
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> StoreResult<SessionTokens> {
        Ok(self.inner.lock().map_err(|_| StoreError::Poisoned)?.tokens())
    }

    fn set(&self, tokens: &SessionTokens) -> StoreResult<()> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .apply_tokens(tokens);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        *self.inner.lock().map_err(|_| StoreError::Poisoned)? = StoredSession::default();
        Ok(())
    }

    fn identity_snapshot(&self) -> StoreResult<Option<IdentitySnapshot>> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .cached_identity
            .clone())
    }

    fn set_identity_snapshot(&self, snapshot: &IdentitySnapshot) -> StoreResult<()> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .cached_identity = Some(snapshot.clone());
        Ok(())
    }

    fn save_session(&self, tokens: &SessionTokens, snapshot: &IdentitySnapshot) -> StoreResult<()> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.apply_tokens(tokens);
        inner.cached_identity = Some(snapshot.clone());
        Ok(())
    }
}

// =============================================================================
// File store
// =============================================================================

/// JSON file store. Every write replaces the file atomically
/// (temp file + rename); clearing deletes it.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at [`default_session_path`].
    pub fn open_default() -> Self {
        Self::new(default_session_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> StoreResult<StoredSession> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(StoredSession::default()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredSession::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, stored: &StoredSession) -> StoreResult<()> {
        if stored.is_empty() {
            return self.remove();
        }
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        serde_json::to_writer_pretty(&mut file, stored)?;
        file.flush()?;
        file.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn remove(&self) -> StoreResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut StoredSession)) -> StoreResult<()> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stored = self.read()?;
        f(&mut stored);
        self.write(&stored)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> StoreResult<SessionTokens> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.read()?.tokens())
    }

    fn set(&self, tokens: &SessionTokens) -> StoreResult<()> {
        self.update(|stored| stored.apply_tokens(tokens))
    }

    fn clear(&self) -> StoreResult<()> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.remove()
    }

    fn identity_snapshot(&self) -> StoreResult<Option<IdentitySnapshot>> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.read()?.cached_identity)
    }

    fn set_identity_snapshot(&self, snapshot: &IdentitySnapshot) -> StoreResult<()> {
        self.update(|stored| stored.cached_identity = Some(snapshot.clone()))
    }

    fn save_session(&self, tokens: &SessionTokens, snapshot: &IdentitySnapshot) -> StoreResult<()> {
        self.update(|stored| {
            stored.apply_tokens(tokens);
            stored.cached_identity = Some(snapshot.clone());
        })
    }
}

/// Default session file: `<data dir>/matchdesk/session.json`.
pub fn default_session_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("matchdesk")
        .join("session.json")
}
