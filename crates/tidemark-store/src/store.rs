//! Local document store.
//!
//! One table per collection, documents stored as canonical JSON with a
//! `dirty` flag for push tracking, plus a `checkpoints` table holding the
//! per-collection replication cursor. Writes go through a single internal
//! connection lock; change events fan out to any number of subscribers.

use std::path::Path;
use std::sync::Mutex;

use crossbeam::channel::{Receiver, Sender, unbounded};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;

use tidemark_core::{Checkpoint, Collection, CoreError, DocId, Stamp, Transience};

/// Who performed the write that produced a change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A local mutation (UI action). Makes the document pending for push.
    Local,
    /// An apply from the pull pipeline or the realtime feed.
    Replication,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub id: DocId,
    pub origin: ChangeOrigin,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("document `{id}` not found in `{collection}`")]
    Missing { collection: Collection, id: DocId },

    #[error("stored document corrupted in `{collection}`: {source}")]
    Corrupt {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },

    #[error("patch for `{collection}` must be a JSON object")]
    InvalidPatch { collection: Collection },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Sql(_) => Transience::Retryable,
            StoreError::Core(_)
            | StoreError::Missing { .. }
            | StoreError::Corrupt { .. }
            | StoreError::InvalidPatch { .. } => Transience::Permanent,
        }
    }
}

pub struct LocalStore {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = LocalStore {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS checkpoints (
              collection TEXT PRIMARY KEY,
              updated_at TEXT NOT NULL
            );
            "#,
        )?;
        for collection in Collection::ALL {
            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                  id TEXT PRIMARY KEY,
                  doc TEXT NOT NULL,
                  updated_at TEXT NOT NULL,
                  dirty INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_dirty ON {table}(dirty);
                "#,
                table = collection.table()
            ))?;
        }
        Ok(())
    }

    /// Subscribe to change notifications. Disconnected receivers are pruned
    /// lazily on the next notification.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = unbounded();
        self.lock_subscribers().push(tx);
        rx
    }

    /// Point lookup by id.
    pub fn get(&self, collection: Collection, id: DocId) -> Result<Option<Value>, StoreError> {
        let conn = self.lock_conn();
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT doc FROM {} WHERE id = ?1", collection.table()),
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => Ok(Some(parse_doc(collection, &text)?)),
            None => Ok(None),
        }
    }

    /// Predicate scan over a collection.
    pub fn query<F>(&self, collection: Collection, mut predicate: F) -> Result<Vec<Value>, StoreError>
    where
        F: FnMut(&Value) -> bool,
    {
        let docs = self.all_docs(collection)?;
        Ok(docs.into_iter().filter(|doc| predicate(doc)).collect())
    }

    /// Insert a locally-created document.
    ///
    /// Validates through the collection schema (fail fast: invalid documents
    /// are never stored, let alone transmitted), marks the row dirty, and
    /// notifies subscribers with a `Local` origin.
    pub fn insert_local(&self, collection: Collection, doc: &Value) -> Result<Value, StoreError> {
        let canonical = collection.project_row(doc)?;
        let id = Collection::doc_id(&canonical)?;
        let stamp = Collection::doc_stamp(&canonical)?;
        self.write_doc(collection, id, &canonical, stamp, true)?;
        self.notify(ChangeEvent {
            collection,
            id,
            origin: ChangeOrigin::Local,
        });
        Ok(canonical)
    }

    /// Merge a field patch into an existing document.
    ///
    /// Bumps `updated_at` past the previous stamp (the writer always sets
    /// it), revalidates, marks dirty, notifies with a `Local` origin.
    pub fn patch_local(
        &self,
        collection: Collection,
        id: DocId,
        patch: &Value,
    ) -> Result<Value, StoreError> {
        let fields = patch
            .as_object()
            .ok_or(StoreError::InvalidPatch { collection })?;
        let mut doc = self
            .get(collection, id)?
            .ok_or(StoreError::Missing { collection, id })?;
        let prev_stamp = Collection::doc_stamp(&doc)?;

        {
            let target = doc.as_object_mut().ok_or(StoreError::Corrupt {
                collection,
                source: serde_json::Error::io(std::io::Error::other("document is not an object")),
            })?;
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
            let next = Stamp::now_after(prev_stamp);
            target.insert(
                "updated_at".to_string(),
                Value::String(next.as_rfc3339()),
            );
        }

        let canonical = collection.project_row(&doc)?;
        let stamp = Collection::doc_stamp(&canonical)?;
        self.write_doc(collection, id, &canonical, stamp, true)?;
        self.notify(ChangeEvent {
            collection,
            id,
            origin: ChangeOrigin::Local,
        });
        Ok(canonical)
    }

    /// Idempotent upsert of a replicated document (insert-or-overwrite by
    /// id, whole-document last-write-wins on `updated_at`).
    ///
    /// Returns `false` without writing when the stored document is already
    /// byte-identical, or when the incoming stamp is older than the stored
    /// one. The stale case matters for echoes: a pushed version looping back
    /// through pull or the feed must not revert a local edit made since the
    /// push, nor clear its dirty flag. Otherwise the row is overwritten,
    /// marked clean, and subscribers see a `Replication` origin.
    pub fn apply_remote(&self, collection: Collection, doc: &Value) -> Result<bool, StoreError> {
        let id = Collection::doc_id(doc)?;
        let stamp = Collection::doc_stamp(doc)?;
        let text = doc.to_string();

        if let Some((existing, stored_stamp)) = self.raw_doc(collection, id)? {
            if existing == text {
                return Ok(false);
            }
            if stamp < stored_stamp {
                tracing::debug!(
                    %collection,
                    %id,
                    incoming = %stamp,
                    stored = %stored_stamp,
                    "skipping stale remote document"
                );
                return Ok(false);
            }
        }

        self.write_doc(collection, id, doc, stamp, false)?;
        self.notify(ChangeEvent {
            collection,
            id,
            origin: ChangeOrigin::Replication,
        });
        Ok(true)
    }

    /// Snapshot of pending local changes, oldest first.
    ///
    /// Does not clear the dirty flag; the push pipeline calls `mark_clean`
    /// with the stamps it captured once the batch is accepted remotely, so a
    /// document re-edited mid-push stays pending.
    pub fn drain_dirty(
        &self,
        collection: Collection,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT doc FROM {} WHERE dirty = 1 ORDER BY updated_at ASC LIMIT ?1",
            collection.table()
        ))?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut docs = Vec::new();
        for raw in rows {
            docs.push(parse_doc(collection, &raw?)?);
        }
        Ok(docs)
    }

    pub fn dirty_count(&self, collection: Collection) -> Result<usize, StoreError> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE dirty = 1", collection.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Clear the dirty flag for rows still at the stamp captured at drain
    /// time. Rows mutated since keep their flag and ride the next batch.
    pub fn mark_clean(
        &self,
        collection: Collection,
        rows: &[(DocId, Stamp)],
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        for (id, stamp) in rows {
            conn.execute(
                &format!(
                    "UPDATE {} SET dirty = 0 WHERE id = ?1 AND updated_at = ?2",
                    collection.table()
                ),
                params![id.to_string(), stamp.as_rfc3339()],
            )?;
        }
        Ok(())
    }

    pub fn checkpoint(&self, collection: Collection) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.lock_conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM checkpoints WHERE collection = ?1",
                params![collection.table()],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => Ok(Some(Checkpoint::at(Stamp::parse(&text)?))),
            None => Ok(None),
        }
    }

    pub fn set_checkpoint(
        &self,
        collection: Collection,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO checkpoints (collection, updated_at) VALUES (?1, ?2)
             ON CONFLICT(collection) DO UPDATE SET updated_at = excluded.updated_at",
            params![
                collection.table(),
                checkpoint.updated_at.as_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn all_docs(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!("SELECT doc FROM {}", collection.table()))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut docs = Vec::new();
        for raw in rows {
            docs.push(parse_doc(collection, &raw?)?);
        }
        Ok(docs)
    }

    fn raw_doc(
        &self,
        collection: Collection,
        id: DocId,
    ) -> Result<Option<(String, Stamp)>, StoreError> {
        let conn = self.lock_conn();
        let row: Option<(String, String)> = conn
            .query_row(
                &format!(
                    "SELECT doc, updated_at FROM {} WHERE id = ?1",
                    collection.table()
                ),
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((doc, raw_stamp)) => Ok(Some((doc, Stamp::parse(&raw_stamp)?))),
            None => Ok(None),
        }
    }

    fn write_doc(
        &self,
        collection: Collection,
        id: DocId,
        doc: &Value,
        stamp: Stamp,
        dirty: bool,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            &format!(
                "INSERT INTO {table} (id, doc, updated_at, dirty) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                   doc = excluded.doc,
                   updated_at = excluded.updated_at,
                   dirty = excluded.dirty",
                table = collection.table()
            ),
            params![
                id.to_string(),
                doc.to_string(),
                stamp.as_rfc3339(),
                dirty as i64
            ],
        )?;
        Ok(())
    }

    fn notify(&self, event: ChangeEvent) {
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|tx| tx.send(event).is_ok());
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Sender<ChangeEvent>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn parse_doc(collection: Collection, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt { collection, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::{Task, UserId};
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::new(Uuid::from_bytes([3u8; 16]))
    }

    fn task_doc(content: &str) -> Value {
        serde_json::to_value(Task::new(user(), content)).unwrap()
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = LocalStore::open_in_memory().unwrap();
        let doc = store.insert_local(Collection::Tasks, &task_doc("walk dog")).unwrap();
        let id = Collection::doc_id(&doc).unwrap();

        let fetched = store.get(Collection::Tasks, id).unwrap().unwrap();
        assert_eq!(fetched, doc);
        assert_eq!(store.dirty_count(Collection::Tasks).unwrap(), 1);
    }

    #[test]
    fn insert_rejects_invalid_documents() {
        let store = LocalStore::open_in_memory().unwrap();
        let invalid = serde_json::json!({ "content": "no id" });
        let err = store.insert_local(Collection::Tasks, &invalid).unwrap_err();
        assert!(matches!(err, StoreError::Core(_)));
        assert_eq!(store.dirty_count(Collection::Tasks).unwrap(), 0);
    }

    #[test]
    fn patch_bumps_updated_at_and_merges_fields() {
        let store = LocalStore::open_in_memory().unwrap();
        let doc = store.insert_local(Collection::Tasks, &task_doc("draft")).unwrap();
        let id = Collection::doc_id(&doc).unwrap();
        let before = Collection::doc_stamp(&doc).unwrap();

        let patched = store
            .patch_local(Collection::Tasks, id, &serde_json::json!({ "content": "final" }))
            .unwrap();
        assert_eq!(patched["content"], "final");
        assert!(Collection::doc_stamp(&patched).unwrap() > before);
    }

    #[test]
    fn patch_missing_document_fails() {
        let store = LocalStore::open_in_memory().unwrap();
        let err = store
            .patch_local(Collection::Tasks, DocId::new(), &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing { .. }));
    }

    #[test]
    fn apply_remote_is_idempotent() {
        let store = LocalStore::open_in_memory().unwrap();
        let doc = Collection::Tasks.project_row(&task_doc("from remote")).unwrap();

        assert!(store.apply_remote(Collection::Tasks, &doc).unwrap());
        assert!(!store.apply_remote(Collection::Tasks, &doc).unwrap());

        let id = Collection::doc_id(&doc).unwrap();
        assert_eq!(store.get(Collection::Tasks, id).unwrap().unwrap(), doc);
        // Replicated rows are clean: nothing to push back.
        assert_eq!(store.dirty_count(Collection::Tasks).unwrap(), 0);
    }

    #[test]
    fn apply_remote_overwrites_local_version() {
        let store = LocalStore::open_in_memory().unwrap();
        let doc = store.insert_local(Collection::Tasks, &task_doc("local wording")).unwrap();
        let id = Collection::doc_id(&doc).unwrap();

        let mut remote = doc.clone();
        remote["content"] = Value::from("remote wording");
        remote["updated_at"] =
            Value::from(Collection::doc_stamp(&doc).unwrap().bump().as_rfc3339());

        assert!(store.apply_remote(Collection::Tasks, &remote).unwrap());
        let current = store.get(Collection::Tasks, id).unwrap().unwrap();
        assert_eq!(current["content"], "remote wording");
    }

    #[test]
    fn apply_remote_skips_stale_version_and_keeps_dirty() {
        let store = LocalStore::open_in_memory().unwrap();
        let v1 = store.insert_local(Collection::Tasks, &task_doc("v1")).unwrap();
        let id = Collection::doc_id(&v1).unwrap();

        store.mark_clean(Collection::Tasks, &[(id, Collection::doc_stamp(&v1).unwrap())]).unwrap();
        let v2 = store
            .patch_local(Collection::Tasks, id, &serde_json::json!({ "content": "v2" }))
            .unwrap();

        // The v1 echo loops back with its old stamp; it must not revert v2.
        assert!(!store.apply_remote(Collection::Tasks, &v1).unwrap());
        let current = store.get(Collection::Tasks, id).unwrap().unwrap();
        assert_eq!(current, v2);
        assert_eq!(store.dirty_count(Collection::Tasks).unwrap(), 1, "v2 still pending");
    }

    #[test]
    fn drain_and_mark_clean_lifecycle() {
        let store = LocalStore::open_in_memory().unwrap();
        let doc = store.insert_local(Collection::Tasks, &task_doc("pending")).unwrap();
        let id = Collection::doc_id(&doc).unwrap();
        let stamp = Collection::doc_stamp(&doc).unwrap();

        let batch = store.drain_dirty(Collection::Tasks, 10).unwrap();
        assert_eq!(batch.len(), 1);

        store.mark_clean(Collection::Tasks, &[(id, stamp)]).unwrap();
        assert_eq!(store.dirty_count(Collection::Tasks).unwrap(), 0);
    }

    #[test]
    fn mark_clean_skips_rows_edited_after_drain() {
        let store = LocalStore::open_in_memory().unwrap();
        let doc = store.insert_local(Collection::Tasks, &task_doc("v1")).unwrap();
        let id = Collection::doc_id(&doc).unwrap();
        let drained_stamp = Collection::doc_stamp(&doc).unwrap();

        // Edit lands between drain and acknowledgment.
        store
            .patch_local(Collection::Tasks, id, &serde_json::json!({ "content": "v2" }))
            .unwrap();

        store.mark_clean(Collection::Tasks, &[(id, drained_stamp)]).unwrap();
        assert_eq!(store.dirty_count(Collection::Tasks).unwrap(), 1, "newer edit stays pending");
    }

    #[test]
    fn checkpoints_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.db");
        let stamp = Stamp::parse("2024-03-01T08:00:00Z").unwrap();

        {
            let store = LocalStore::open(&path).unwrap();
            assert!(store.checkpoint(Collection::Projects).unwrap().is_none());
            store
                .set_checkpoint(Collection::Projects, Checkpoint::at(stamp))
                .unwrap();
        }

        let store = LocalStore::open(&path).unwrap();
        let cp = store.checkpoint(Collection::Projects).unwrap().unwrap();
        assert_eq!(cp.updated_at, stamp);
    }

    #[test]
    fn subscribers_see_origins() {
        let store = LocalStore::open_in_memory().unwrap();
        let rx = store.subscribe();

        let doc = store.insert_local(Collection::Tasks, &task_doc("notify me")).unwrap();
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.origin, ChangeOrigin::Local);
        assert_eq!(ev.collection, Collection::Tasks);

        let mut remote = doc.clone();
        remote["updated_at"] =
            Value::from(Collection::doc_stamp(&doc).unwrap().bump().as_rfc3339());
        store.apply_remote(Collection::Tasks, &remote).unwrap();
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.origin, ChangeOrigin::Replication);
    }

    #[test]
    fn query_filters_by_predicate() {
        let store = LocalStore::open_in_memory().unwrap();
        store.insert_local(Collection::Tasks, &task_doc("keep")).unwrap();
        store.insert_local(Collection::Tasks, &task_doc("drop")).unwrap();

        let kept = store
            .query(Collection::Tasks, |doc| doc["content"] == "keep")
            .unwrap();
        assert_eq!(kept.len(), 1);
    }
}
