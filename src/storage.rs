//! Storage collaborator.
//!
//! The orchestrator only ever fetches every record of an entity kind and
//! upserts single records by id. How records are laid out is up to the
//! implementation.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CadenceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Leads,
    Tasks,
    Metrics,
    Briefings,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Leads,
        EntityKind::Tasks,
        EntityKind::Metrics,
        EntityKind::Briefings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Leads => "leads",
            EntityKind::Tasks => "tasks",
            EntityKind::Metrics => "metrics",
            EntityKind::Briefings => "briefings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Every record of `kind`, in insertion order.
    async fn fetch(&self, kind: EntityKind) -> Result<Vec<Value>>;

    /// Insert or replace the record `id` of `kind`.
    async fn save(&self, kind: EntityKind, id: &str, record: Value) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
struct Record {
    id: String,
    data: Value,
}

/// Keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<EntityKind, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, kind: EntityKind) -> Result<Vec<Value>> {
        Ok(self
            .records
            .lock()
            .get(&kind)
            .map(|records| records.iter().map(|r| r.data.clone()).collect())
            .unwrap_or_default())
    }

    async fn save(&self, kind: EntityKind, id: &str, record: Value) -> Result<()> {
        let mut records = self.records.lock();
        let records = records.entry(kind).or_default();
        match records.iter_mut().find(|r| r.id == id) {
            Some(existing) => existing.data = record,
            None => records.push(Record {
                id: id.to_string(),
                data: record,
            }),
        }
        Ok(())
    }
}

pub const DB_FILE: &str = "cadence.db";

/// SQLite database with one table per entity kind.
///
/// Each record is a JSON document keyed by `id`; upserts update the row in
/// place, so fetches keep first-insertion order.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn storage_error(e: rusqlite::Error) -> CadenceError {
    CadenceError::Storage(e.to_string())
}

impl SqliteStore {
    /// Open or create [`DB_FILE`] under `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            CadenceError::Storage(format!("cannot create {}: {e}", dir.display()))
        })?;
        let path = dir.join(DB_FILE);
        let conn = tokio::task::spawn_blocking(move || Connection::open(path))
            .await
            .map_err(|e| CadenceError::Storage(format!("storage task failed: {e}")))?
            .map_err(storage_error)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(storage_error)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let ddl: String = EntityKind::ALL
            .iter()
            .map(|kind| {
                format!(
                    "CREATE TABLE IF NOT EXISTS {kind} (
                        id TEXT PRIMARY KEY,
                        data TEXT NOT NULL
                    );\n"
                )
            })
            .collect();
        conn.execute_batch(&ddl).map_err(storage_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            op(&conn)
        })
        .await
        .map_err(|e| CadenceError::Storage(format!("storage task failed: {e}")))?
        .map_err(storage_error)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn fetch(&self, kind: EntityKind) -> Result<Vec<Value>> {
        let sql = format!("SELECT data FROM {kind} ORDER BY rowid");
        let rows = self
            .blocking(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()
            })
            .await?;

        rows.iter()
            .map(|raw| {
                serde_json::from_str(raw)
                    .map_err(|e| CadenceError::Storage(format!("corrupt {kind} record: {e}")))
            })
            .collect()
    }

    async fn save(&self, kind: EntityKind, id: &str, record: Value) -> Result<()> {
        let sql = format!(
            "INSERT INTO {kind} (id, data) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data"
        );
        let id = id.to_string();
        let data = serde_json::to_string(&record)?;
        self.blocking(move |conn| conn.execute(&sql, rusqlite::params![id, data]).map(|_| ()))
            .await?;
        tracing::debug!(kind = %kind, "record saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_upserts_by_id() {
        let store = MemoryStore::new();
        store.save(EntityKind::Leads, "a", json!({"name": "Ada"})).await.unwrap();
        store.save(EntityKind::Leads, "b", json!({"name": "Bo"})).await.unwrap();
        store.save(EntityKind::Leads, "a", json!({"name": "Ada L."})).await.unwrap();

        let leads = store.fetch(EntityKind::Leads).await.unwrap();
        assert_eq!(leads, vec![json!({"name": "Ada L."}), json!({"name": "Bo"})]);
        assert!(store.fetch(EntityKind::Tasks).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_upserts_in_place() {
        let store = SqliteStore::in_memory().unwrap();
        store.save(EntityKind::Leads, "a", json!({"name": "Ada"})).await.unwrap();
        store.save(EntityKind::Leads, "b", json!({"name": "Bo"})).await.unwrap();
        store.save(EntityKind::Leads, "a", json!({"name": "Ada L."})).await.unwrap();

        let leads = store.fetch(EntityKind::Leads).await.unwrap();
        assert_eq!(leads, vec![json!({"name": "Ada L."}), json!({"name": "Bo"})]);
        for kind in [EntityKind::Tasks, EntityKind::Metrics, EntityKind::Briefings] {
            assert!(store.fetch(kind).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn sqlite_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteStore::open(dir.path()).await.unwrap();
            store.save(EntityKind::Metrics, "m1", json!({"revenue": 10})).await.unwrap();
            store.save(EntityKind::Metrics, "m2", json!({"revenue": 20})).await.unwrap();
            store.save(EntityKind::Metrics, "m1", json!({"revenue": 15})).await.unwrap();
        }

        let reopened = SqliteStore::open(dir.path()).await.unwrap();
        let metrics = reopened.fetch(EntityKind::Metrics).await.unwrap();
        assert_eq!(metrics, vec![json!({"revenue": 15}), json!({"revenue": 20})]);
        assert!(dir.path().join(DB_FILE).exists());
    }

    #[tokio::test]
    async fn sqlite_store_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested/data")).await.unwrap();
        assert!(store.fetch(EntityKind::Briefings).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_is_a_storage_error() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn
            .lock()
            .execute("INSERT INTO leads (id, data) VALUES ('x', '{not json')", [])
            .unwrap();
        let err = store.fetch(EntityKind::Leads).await.unwrap_err();
        assert!(matches!(err, CadenceError::Storage(_)));
        assert!(err.aborts_cycle());
    }

    #[tokio::test]
    async fn concurrent_saves_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path()).await.unwrap());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .save(EntityKind::Tasks, &format!("t{i}"), json!({"n": i}))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.fetch(EntityKind::Tasks).await.unwrap().len(), 8);
    }
}
