use crate::db::Database;
use crate::models::Note;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub enum StoreError {
    Db(rusqlite::Error),
    Serde(serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Db(err) => write!(f, "database error: {err}"),
            StoreError::Serde(err) => write!(f, "serialization error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Db(err) => Some(err),
            StoreError::Serde(err) => Some(err),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    Regular,
    Private,
    /// Ignores the private flag. Only meaningful while security is disabled.
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NoteQuery {
    pub archived: bool,
    pub partition: Partition,
}

impl NoteQuery {
    pub const ACTIVE_REGULAR: NoteQuery = NoteQuery::new(false, Partition::Regular);
    pub const ACTIVE_PRIVATE: NoteQuery = NoteQuery::new(false, Partition::Private);
    pub const ACTIVE_ALL: NoteQuery = NoteQuery::new(false, Partition::All);
    pub const ARCHIVED_REGULAR: NoteQuery = NoteQuery::new(true, Partition::Regular);
    pub const ARCHIVED_PRIVATE: NoteQuery = NoteQuery::new(true, Partition::Private);
    pub const ARCHIVED_ALL: NoteQuery = NoteQuery::new(true, Partition::All);

    pub const LIVE: [NoteQuery; 6] = [
        NoteQuery::ACTIVE_REGULAR,
        NoteQuery::ACTIVE_PRIVATE,
        NoteQuery::ACTIVE_ALL,
        NoteQuery::ARCHIVED_REGULAR,
        NoteQuery::ARCHIVED_PRIVATE,
        NoteQuery::ARCHIVED_ALL,
    ];

    pub const fn new(archived: bool, partition: Partition) -> Self {
        Self {
            archived,
            partition,
        }
    }

    pub fn matches(&self, note: &Note) -> bool {
        if note.archived != self.archived {
            return false;
        }
        match self.partition {
            Partition::Regular => !note.private,
            Partition::Private => note.private,
            Partition::All => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NoteSnapshot {
    pub query: NoteQuery,
    pub notes: Vec<Note>,
}

/// Receives pushed query results. Returns `false` once the listener is gone,
/// which unregisters the watch.
pub type SnapshotSink = Arc<dyn Fn(NoteSnapshot) -> bool + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

pub trait NoteStore: Send + Sync {
    /// Inserts when `note.id == 0`, replaces otherwise. Returns the stored id.
    fn upsert(&self, note: &Note) -> Result<i64, StoreError>;
    fn delete_by_id(&self, note_id: i64) -> Result<usize, StoreError>;
    fn get_by_id(&self, note_id: i64) -> Result<Option<Note>, StoreError>;
    fn exists(&self, note_id: i64) -> Result<bool, StoreError>;
    fn query(&self, query: NoteQuery) -> Result<Vec<Note>, StoreError>;
    fn get_all_encrypted(&self) -> Result<Vec<Note>, StoreError>;
    /// Registers a live channel. The current result is pushed before this returns,
    /// then again after every write.
    fn watch(&self, query: NoteQuery, sink: SnapshotSink) -> Result<WatchId, StoreError>;
    fn unwatch(&self, id: WatchId);
}

struct Watcher {
    id: WatchId,
    query: NoteQuery,
    sink: SnapshotSink,
}

pub type SharedDatabase = Arc<Mutex<Database>>;

pub fn shared(db: Database) -> SharedDatabase {
    Arc::new(Mutex::new(db))
}

pub(crate) fn lock_db(db: &SharedDatabase) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(|err| err.into_inner())
}

pub struct SqliteNoteStore {
    db: SharedDatabase,
    watchers: Mutex<Vec<Watcher>>,
    next_watch_id: AtomicU64,
}

impl SqliteNoteStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            db,
            watchers: Mutex::new(Vec::new()),
            next_watch_id: AtomicU64::new(1),
        }
    }

    pub fn database(&self) -> SharedDatabase {
        Arc::clone(&self.db)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    fn run_query(&self, query: NoteQuery) -> Result<Vec<Note>, StoreError> {
        let db = lock_db(&self.db);
        let private = match query.partition {
            Partition::Regular => Some(false),
            Partition::Private => Some(true),
            Partition::All => None,
        };
        Ok(db.list_notes(query.archived, private)?)
    }

    fn notify_watchers(&self) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|err| err.into_inner());
        watchers.retain(|watcher| match self.run_query(watcher.query) {
            Ok(notes) => (watcher.sink)(NoteSnapshot {
                query: watcher.query,
                notes,
            }),
            Err(err) => {
                tracing::warn!(query = ?watcher.query, error = %err, "live query refresh failed");
                true
            }
        });
    }
}

impl NoteStore for SqliteNoteStore {
    fn upsert(&self, note: &Note) -> Result<i64, StoreError> {
        let id = lock_db(&self.db).upsert_note(note)?;
        tracing::debug!(note_id = id, "note saved");
        self.notify_watchers();
        Ok(id)
    }

    fn delete_by_id(&self, note_id: i64) -> Result<usize, StoreError> {
        let rows = lock_db(&self.db).delete_note(note_id)?;
        tracing::debug!(note_id, rows, "note deleted");
        if rows > 0 {
            self.notify_watchers();
        }
        Ok(rows)
    }

    fn get_by_id(&self, note_id: i64) -> Result<Option<Note>, StoreError> {
        Ok(lock_db(&self.db).get_note(note_id)?)
    }

    fn exists(&self, note_id: i64) -> Result<bool, StoreError> {
        Ok(lock_db(&self.db).note_exists(note_id)?)
    }

    fn query(&self, query: NoteQuery) -> Result<Vec<Note>, StoreError> {
        self.run_query(query)
    }

    fn get_all_encrypted(&self) -> Result<Vec<Note>, StoreError> {
        Ok(lock_db(&self.db).list_encrypted_notes()?)
    }

    fn watch(&self, query: NoteQuery, sink: SnapshotSink) -> Result<WatchId, StoreError> {
        let id = WatchId(self.next_watch_id.fetch_add(1, Ordering::Relaxed));
        let mut watchers = self.watchers.lock().unwrap_or_else(|err| err.into_inner());
        let notes = self.run_query(query)?;
        if sink(NoteSnapshot { query, notes }) {
            watchers.push(Watcher { id, query, sink });
        }
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|err| err.into_inner());
        watchers.retain(|watcher| watcher.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::{shared, NoteQuery, NoteSnapshot, NoteStore, Partition, SqliteNoteStore};
    use crate::db::Database;
    use crate::models::Note;
    use std::sync::{mpsc, Arc};

    fn setup_store() -> SqliteNoteStore {
        let db = Database::new_in_memory().expect("db init");
        db.run_migrations().expect("migrations");
        SqliteNoteStore::new(shared(db))
    }

    #[test]
    fn query_routes_to_partition_predicates() {
        let store = setup_store();
        store.upsert(&Note::text("public", "")).expect("insert");
        store
            .upsert(&Note {
                private: true,
                ..Note::text("private", "")
            })
            .expect("insert");
        store
            .upsert(&Note {
                archived: true,
                ..Note::text("archived", "")
            })
            .expect("insert");

        let titles = |query| -> Vec<String> {
            store
                .query(query)
                .expect("query")
                .into_iter()
                .map(|note| note.title)
                .collect()
        };

        assert_eq!(titles(NoteQuery::ACTIVE_REGULAR), vec!["public"]);
        assert_eq!(titles(NoteQuery::ACTIVE_PRIVATE), vec!["private"]);
        assert_eq!(titles(NoteQuery::ACTIVE_ALL).len(), 2);
        assert_eq!(titles(NoteQuery::ARCHIVED_ALL), vec!["archived"]);
        assert!(titles(NoteQuery::ARCHIVED_PRIVATE).is_empty());
    }

    #[test]
    fn watch_pushes_initial_and_updated_snapshots() {
        let store = setup_store();
        let (tx, rx) = mpsc::channel::<NoteSnapshot>();
        store
            .watch(
                NoteQuery::ACTIVE_REGULAR,
                Arc::new(move |snapshot| tx.send(snapshot).is_ok()),
            )
            .expect("watch");

        let initial = rx.recv().expect("initial");
        assert!(initial.notes.is_empty());

        store.upsert(&Note::text("Shopping", "milk")).expect("insert");
        let updated = rx.recv().expect("updated");
        assert_eq!(updated.query, NoteQuery::ACTIVE_REGULAR);
        assert_eq!(updated.notes.len(), 1);
        assert_eq!(updated.notes[0].title, "Shopping");
    }

    #[test]
    fn unwatch_and_dropped_receivers_unregister() {
        let store = setup_store();
        let (tx, rx) = mpsc::channel::<NoteSnapshot>();
        let id = store
            .watch(
                NoteQuery::ACTIVE_ALL,
                Arc::new(move |snapshot| tx.send(snapshot).is_ok()),
            )
            .expect("watch");
        assert_eq!(store.watcher_count(), 1);
        store.unwatch(id);
        assert_eq!(store.watcher_count(), 0);
        drop(rx);

        let (tx, rx) = mpsc::channel::<NoteSnapshot>();
        store
            .watch(
                NoteQuery::ACTIVE_ALL,
                Arc::new(move |snapshot| tx.send(snapshot).is_ok()),
            )
            .expect("watch");
        drop(rx);
        store.upsert(&Note::text("trigger", "")).expect("insert");
        assert_eq!(store.watcher_count(), 0);
    }

    #[test]
    fn exists_follows_upsert_and_delete() {
        let store = setup_store();
        assert!(!store.exists(1).expect("exists"));

        let id = store.upsert(&Note::text("kept", "")).expect("insert");
        assert!(store.exists(id).expect("exists"));
        assert!(!store.exists(id + 1).expect("exists"));

        assert_eq!(store.delete_by_id(id).expect("delete"), 1);
        assert!(!store.exists(id).expect("exists"));
        assert_eq!(store.delete_by_id(id).expect("delete again"), 0);
    }

    #[test]
    fn note_query_matches_mirrors_predicates() {
        let private = Note {
            private: true,
            ..Note::text("p", "")
        };
        assert!(NoteQuery::ACTIVE_PRIVATE.matches(&private));
        assert!(NoteQuery::ACTIVE_ALL.matches(&private));
        assert!(!NoteQuery::ACTIVE_REGULAR.matches(&private));
        assert!(!NoteQuery::new(true, Partition::Private).matches(&private));
    }
}
