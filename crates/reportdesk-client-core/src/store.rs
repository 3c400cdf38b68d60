//! Device-local persistence for the session, its token, and user preferences.
//!
//! The raw backend is a string key/value store ([`KeyValueStorage`]);
//! [`PersistentStore`] layers the typed, fail-soft API on top. Nothing here
//! ever returns an error to the caller: unreadable data is treated as absent
//! and failed writes are logged.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::{AccessGrant, Capabilities, capabilities};

pub const SESSION_KEY: &str = "reportdesk.session";
pub const SESSION_TOKEN_KEY: &str = "reportdesk.session_token";
pub const AUTO_DELIVER_KEY: &str = "reportdesk.auto_deliver";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("storage io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {path} is not valid json: {message}")]
    Corrupt { path: PathBuf, message: String },
}

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// One JSON object on disk holding every key. Writes go through a sibling
/// temp file and a rename so a crash never leaves a half-written file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `state.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("state.json"))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|error| StorageError::Corrupt {
            path: self.path.clone(),
            message: error.to_string(),
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let io_error = |source: std::io::Error| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let serialized = serde_json::to_vec_pretty(entries).map_err(|error| {
            StorageError::Corrupt {
                path: self.path.clone(),
                message: error.to_string(),
            }
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).map_err(io_error)?;
        file.write_all(&serialized).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        fs::rename(&tmp_path, &self.path).map_err(io_error)
    }

    // A corrupt file is rewritten from scratch rather than blocking writes.
    fn read_for_update(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match self.read_all() {
            Err(StorageError::Corrupt { path, message }) => {
                tracing::warn!(path = %path.display(), %message, "discarding corrupt state file");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.read_for_update()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.read_for_update()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// Snapshot of a verified login. Replaced wholesale on re-verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub email: String,
    #[serde(default)]
    pub access_grant: AccessGrant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
    pub verified_at: DateTime<Utc>,
    pub session_token: String,
}

impl Session {
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        capabilities(Some(&self.access_grant))
    }
}

/// Single writer of session state on this device. Reads are cheap and may
/// happen from any component; writes are last-write-wins.
pub struct PersistentStore {
    storage: Box<dyn KeyValueStorage>,
}

impl PersistentStore {
    pub fn new(storage: impl KeyValueStorage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    pub fn load_session(&self) -> Option<Session> {
        let raw = self.read(SESSION_KEY)?;
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(error) => {
                tracing::warn!(%error, "ignoring malformed stored session");
                None
            }
        }
    }

    pub fn save_session(&self, session: &Session) {
        match serde_json::to_string(session) {
            Ok(serialized) => self.write(SESSION_KEY, &serialized),
            Err(error) => tracing::warn!(%error, "failed to serialize session"),
        }
    }

    pub fn clear_session(&self) {
        self.delete(SESSION_KEY);
    }

    pub fn load_token(&self) -> Option<String> {
        self.read(SESSION_TOKEN_KEY)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }

    pub fn save_token(&self, token: &str) {
        self.write(SESSION_TOKEN_KEY, token.trim());
    }

    pub fn clear_token(&self) {
        self.delete(SESSION_TOKEN_KEY);
    }

    /// Defaults to on when never set or unreadable.
    pub fn load_auto_deliver(&self) -> bool {
        self.read(AUTO_DELIVER_KEY)
            .map(|raw| !matches!(raw.trim(), "0" | "false" | "off"))
            .unwrap_or(true)
    }

    pub fn save_auto_deliver(&self, enabled: bool) {
        self.write(AUTO_DELIVER_KEY, if enabled { "true" } else { "false" });
    }

    /// Capabilities of the stored session, recomputed on every call.
    pub fn capabilities(&self) -> Capabilities {
        let session = self.load_session();
        capabilities(session.as_ref().map(|session| &session.access_grant))
    }

    /// Logout path: removes the session, its token, and preferences.
    pub fn clear_all(&self) {
        self.clear_session();
        self.clear_token();
        self.delete(AUTO_DELIVER_KEY);
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, key, "storage read failed");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(error) = self.storage.set(key, value) {
            tracing::warn!(%error, key, "storage write failed");
        }
    }

    fn delete(&self, key: &str) {
        if let Err(error) = self.storage.remove(key) {
            tracing::warn!(%error, key, "storage delete failed");
        }
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_session() -> Session {
        Session {
            email: "a@b.com".to_string(),
            access_grant: AccessGrant::new(json!({"features": {"app_access": true}})),
            app_url: Some("https://app.example.com".to_string()),
            verified_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("date"),
            session_token: "tok1".to_string(),
        }
    }

    #[test]
    fn session_round_trips_and_clears() {
        let store = PersistentStore::in_memory();
        assert!(store.load_session().is_none());

        let session = sample_session();
        store.save_session(&session);
        store.save_token(&session.session_token);
        assert_eq!(store.load_session(), Some(session));
        assert_eq!(store.load_token().as_deref(), Some("tok1"));
        assert!(store.capabilities().app_access);

        store.clear_all();
        assert!(store.load_session().is_none());
        assert!(store.load_token().is_none());
        assert!(!store.capabilities().app_access);
    }

    #[test]
    fn token_survives_a_corrupt_session() {
        let storage = MemoryStorage::new();
        storage.set(SESSION_KEY, "{not json").expect("set");
        storage.set(SESSION_TOKEN_KEY, "tok9").expect("set");
        let store = PersistentStore::new(storage);

        assert!(store.load_session().is_none());
        assert_eq!(store.load_token().as_deref(), Some("tok9"));
    }

    #[test]
    fn blank_token_reads_as_absent() {
        let store = PersistentStore::in_memory();
        store.save_token("   ");
        assert!(store.load_token().is_none());
    }

    #[test]
    fn auto_deliver_defaults_on() {
        let store = PersistentStore::in_memory();
        assert!(store.load_auto_deliver());
        store.save_auto_deliver(false);
        assert!(!store.load_auto_deliver());
        store.save_auto_deliver(true);
        assert!(store.load_auto_deliver());
    }

    #[test]
    fn file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = PersistentStore::new(FileStorage::in_dir(dir.path()));
            store.save_session(&sample_session());
            store.save_token("tok1");
        }
        let store = PersistentStore::new(FileStorage::in_dir(dir.path()));
        assert_eq!(store.load_token().as_deref(), Some("tok1"));
        assert_eq!(store.load_session().map(|s| s.email), Some("a@b.com".to_string()));
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_overwritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::in_dir(dir.path());
        fs::write(storage.path(), "garbage").expect("write");
        let store = PersistentStore::new(storage);

        assert!(store.load_token().is_none());
        store.save_token("tok2");
        assert_eq!(store.load_token().as_deref(), Some("tok2"));
    }
}
