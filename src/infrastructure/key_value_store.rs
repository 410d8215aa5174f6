use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// `Sync` records follow the user across devices, `Local` stays on this machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StorageArea {
    Sync,
    Local,
}

impl StorageArea {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageChange {
    pub area: StorageArea,
    pub key: String,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, area: StorageArea, key: &str) -> Result<Option<serde_json::Value>, InfraError>;
    /// Replaces the whole value stored under `key`.
    fn set(&self, area: StorageArea, key: &str, value: &serde_json::Value) -> Result<(), InfraError>;
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    db_path: PathBuf,
    changes: broadcast::Sender<StorageChange>,
}

impl SqliteKeyValueStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            changes,
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, area: StorageArea, key: &str) -> Result<Option<serde_json::Value>, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value FROM kv_store WHERE area = ?1 AND key = ?2",
                params![area.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|value| serde_json::from_str(&value).map_err(InfraError::from))
            .transpose()
    }

    fn set(&self, area: StorageArea, key: &str, value: &serde_json::Value) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (area, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(area, key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![
                area.as_str(),
                key,
                serde_json::to_string(value)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        let _ = self.changes.send(StorageChange {
            area,
            key: key.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[derive(Debug)]
pub struct InMemoryKeyValueStore {
    values: Mutex<HashMap<(StorageArea, String), serde_json::Value>>,
    changes: broadcast::Sender<StorageChange>,
    writes: AtomicUsize,
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
            writes: AtomicUsize::new(0),
        }
    }
}

impl InMemoryKeyValueStore {
    /// Number of `set` calls, for write-through assertions.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, area: StorageArea, key: &str) -> Result<Option<serde_json::Value>, InfraError> {
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("key value store: {error}")))?;
        Ok(values.get(&(area, key.to_string())).cloned())
    }

    fn set(&self, area: StorageArea, key: &str, value: &serde_json::Value) -> Result<(), InfraError> {
        {
            let mut values = self
                .values
                .lock()
                .map_err(|error| InfraError::LockPoisoned(format!("key value store: {error}")))?;
            values.insert((area, key.to_string()), value.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let _ = self.changes.send(StorageChange {
            area,
            key: key.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use std::fs;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sitelimit-kv-tests-{}-{name}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("kv.sqlite");
        initialize_database(&path).expect("initialize database");
        path
    }

    #[test]
    fn sqlite_store_returns_none_for_missing_keys() {
        let store = SqliteKeyValueStore::new(temp_db_path("missing"));
        assert_eq!(store.get(StorageArea::Sync, "blockedSites").expect("get"), None);
    }

    #[test]
    fn sqlite_store_replaces_whole_value_and_separates_areas() {
        let store = SqliteKeyValueStore::new(temp_db_path("replace"));
        store
            .set(StorageArea::Sync, "timeLimitedSites", &serde_json::json!({ "a.com": 5, "b.com": 10 }))
            .expect("first set");
        store
            .set(StorageArea::Sync, "timeLimitedSites", &serde_json::json!({ "c.com": 1 }))
            .expect("second set");
        store
            .set(StorageArea::Local, "timeLimitedSites", &serde_json::json!({ "local.com": 2 }))
            .expect("local set");

        assert_eq!(
            store.get(StorageArea::Sync, "timeLimitedSites").expect("get sync"),
            Some(serde_json::json!({ "c.com": 1 }))
        );
        assert_eq!(
            store.get(StorageArea::Local, "timeLimitedSites").expect("get local"),
            Some(serde_json::json!({ "local.com": 2 }))
        );
    }

    #[test]
    fn writes_are_broadcast_to_subscribers() {
        let store = InMemoryKeyValueStore::default();
        let mut receiver = store.subscribe();
        store
            .set(StorageArea::Local, "totalTimeSpent", &serde_json::json!({}))
            .expect("set");

        let change = receiver.try_recv().expect("change notification");
        assert_eq!(change.area, StorageArea::Local);
        assert_eq!(change.key, "totalTimeSpent");
        assert_eq!(store.writes(), 1);
    }
}
