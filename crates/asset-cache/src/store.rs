//! SQLite-backed asset store
//!
//! One table keyed by asset id. Every mutation is a single statement, so a
//! reader never sees a half-written row. The schema is versioned with
//! `PRAGMA user_version` and migrating is idempotent across opens.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use holdings_core::AssetId;

use crate::entry::{AssetCacheEntry, AssetMetadata, Payload};
use crate::{AssetCacheError, AssetResult};

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone)]
pub struct AssetStore {
    db: Arc<Mutex<Connection>>,
}

impl AssetStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> AssetResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!("Opened asset store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> AssetResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> AssetResult<Self> {
        let store = Self {
            db: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> AssetResult<()> {
        let mut db = self.db.lock();
        let version: i64 = db.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version >= SCHEMA_VERSION {
            return Ok(());
        }

        let tx = db.transaction()?;
        tx.execute(
            "CREATE TABLE IF NOT EXISTS badge_assets (
                id TEXT PRIMARY KEY,
                metadata TEXT NOT NULL,
                content_type TEXT,
                payload BLOB NOT NULL,
                cached_at INTEGER NOT NULL
            )",
            [],
        )?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;

        debug!("Migrated asset store schema {} -> {}", version, SCHEMA_VERSION);
        Ok(())
    }

    pub fn schema_version(&self) -> AssetResult<i64> {
        let db = self.db.lock();
        Ok(db.pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    pub fn get(&self, id: &AssetId) -> AssetResult<Option<AssetCacheEntry>> {
        let row = {
            let db = self.db.lock();
            db.query_row(
                "SELECT metadata, content_type, payload, cached_at FROM badge_assets WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((metadata, content_type, bytes, cached_at)) = row else {
            return Ok(None);
        };

        let metadata: AssetMetadata =
            serde_json::from_str(&metadata).map_err(|e| AssetCacheError::Corrupt {
                id: id.clone(),
                message: e.to_string(),
            })?;

        Ok(Some(AssetCacheEntry {
            metadata,
            payload: Payload::new(bytes, content_type),
            cached_at_ms: cached_at.max(0) as u64,
        }))
    }

    /// Insert or overwrite the entry for its id
    pub fn put(&self, entry: &AssetCacheEntry) -> AssetResult<()> {
        let metadata = serde_json::to_string(&entry.metadata).map_err(|e| AssetCacheError::Corrupt {
            id: entry.id().clone(),
            message: e.to_string(),
        })?;

        let db = self.db.lock();
        db.execute(
            "INSERT OR REPLACE INTO badge_assets (id, metadata, content_type, payload, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id().as_str(),
                metadata,
                entry.payload.content_type,
                entry.payload.bytes,
                entry.cached_at_ms as i64,
            ],
        )?;
        Ok(())
    }

    /// Returns whether a row was removed
    pub fn delete(&self, id: &AssetId) -> AssetResult<bool> {
        let db = self.db.lock();
        let removed = db.execute("DELETE FROM badge_assets WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    pub fn count(&self) -> AssetResult<usize> {
        let db = self.db.lock();
        let count: i64 = db.query_row("SELECT COUNT(*) FROM badge_assets", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    #[cfg(test)]
    pub(crate) fn raw_execute(&self, sql: &str) -> AssetResult<usize> {
        Ok(self.db.lock().execute(sql, [])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, bytes: &[u8], at: u64) -> AssetCacheEntry {
        AssetCacheEntry {
            metadata: AssetMetadata::new(id, format!("https://img.example/{}.png", id)),
            payload: Payload::new(bytes.to_vec(), Some("image/png".into())),
            cached_at_ms: at,
        }
    }

    #[test]
    fn test_put_get_delete() {
        let store = AssetStore::open_in_memory().unwrap();
        let id = AssetId::new("42");

        assert!(store.get(&id).unwrap().is_none());
        store.put(&entry("42", b"png", 7)).unwrap();

        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded, entry("42", b"png", 7));

        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_put_overwrites() {
        let store = AssetStore::open_in_memory().unwrap();
        store.put(&entry("42", b"old", 1)).unwrap();
        store.put(&entry("42", b"new", 2)).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let loaded = store.get(&AssetId::new("42")).unwrap().unwrap();
        assert_eq!(loaded.payload.bytes, b"new".to_vec());
        assert_eq!(loaded.cached_at_ms, 2);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.db");

        {
            let store = AssetStore::open(&path).unwrap();
            store.put(&entry("1", b"a", 1)).unwrap();
        }
        let store = AssetStore::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(store.count().unwrap(), 1);

        let again = AssetStore::open(&path).unwrap();
        assert_eq!(again.count().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_metadata_is_reported() {
        let store = AssetStore::open_in_memory().unwrap();
        store
            .raw_execute(
                "INSERT INTO badge_assets (id, metadata, content_type, payload, cached_at)
                 VALUES ('bad', 'not json', NULL, x'00', 0)",
            )
            .unwrap();

        let err = store.get(&AssetId::new("bad")).unwrap_err();
        assert!(matches!(err, AssetCacheError::Corrupt { .. }));
    }
}
