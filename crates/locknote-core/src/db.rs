use crate::models::{ChecklistItem, Note, NoteBody, NoteType};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

pub struct Database {
    conn: Connection,
}

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init",
        up: "CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                note_type TEXT NOT NULL DEFAULT 'text',
                checklist_items TEXT NOT NULL DEFAULT '[]',
                image_uri TEXT,
                is_archived INTEGER NOT NULL DEFAULT 0,
                audio_path TEXT
            );

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS notes_archived_pinned_ts
              ON notes(is_archived, is_pinned, timestamp);",
    },
    Migration {
        version: 2,
        name: "private_notes",
        up: "ALTER TABLE notes ADD COLUMN is_private INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE notes ADD COLUMN is_encrypted INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE notes ADD COLUMN encrypted_content TEXT DEFAULT NULL;
            ALTER TABLE notes ADD COLUMN encrypted_title TEXT DEFAULT NULL;

            CREATE INDEX IF NOT EXISTS notes_private_archived
              ON notes(is_private, is_archived);
            CREATE INDEX IF NOT EXISTS notes_encrypted
              ON notes(is_encrypted);",
    },
];

const NOTE_COLUMNS: &str = "id, title, content, timestamp, is_pinned, note_type, checklist_items,
     image_uri, is_archived, audio_path, is_private, is_encrypted, encrypted_content,
     encrypted_title";

impl Database {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(Self { conn })
    }

    pub fn new_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self { conn })
    }

    fn configure(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )
    }

    pub fn latest_migration_version() -> i64 {
        MIGRATIONS
            .iter()
            .map(|migration| migration.version)
            .max()
            .unwrap_or(0)
    }

    pub fn current_schema_version(&self) -> rusqlite::Result<i64> {
        let has_table: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if has_table.is_none() {
            return Ok(0);
        }
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
    }

    pub fn run_migrations(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )?;

        let current_version = self.current_schema_version()?;

        for migration in MIGRATIONS {
            if migration.version > current_version {
                let tx = self.conn.unchecked_transaction()?;
                tx.execute_batch(migration.up)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    params![migration.version, migration.name],
                )?;
                tx.commit()?;
                tracing::debug!(version = migration.version, name = migration.name, "applied migration");
            }
        }

        Ok(())
    }

    pub fn upsert_note(&self, note: &Note) -> rusqlite::Result<i64> {
        let (content, checklist_items) = match &note.body {
            NoteBody::Text(text) => (text.clone(), "[]".to_string()),
            NoteBody::Checklist(items) => (
                String::new(),
                serde_json::to_string(items)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?,
            ),
        };
        let note_type = note.note_type().as_str();

        if note.is_new() {
            self.conn.execute(
                "INSERT INTO notes (title, content, timestamp, is_pinned, note_type,
                    checklist_items, image_uri, is_archived, audio_path, is_private,
                    is_encrypted, encrypted_content, encrypted_title)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    note.title,
                    content,
                    note.timestamp,
                    note.pinned,
                    note_type,
                    checklist_items,
                    note.image_uri,
                    note.archived,
                    note.audio_path,
                    note.private,
                    note.encrypted,
                    note.encrypted_content,
                    note.encrypted_title,
                ],
            )?;
            return Ok(self.conn.last_insert_rowid());
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO notes (id, title, content, timestamp, is_pinned, note_type,
                checklist_items, image_uri, is_archived, audio_path, is_private,
                is_encrypted, encrypted_content, encrypted_title)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                note.id,
                note.title,
                content,
                note.timestamp,
                note.pinned,
                note_type,
                checklist_items,
                note.image_uri,
                note.archived,
                note.audio_path,
                note.private,
                note.encrypted,
                note.encrypted_content,
                note.encrypted_title,
            ],
        )?;
        Ok(note.id)
    }

    pub fn delete_note(&self, note_id: i64) -> rusqlite::Result<usize> {
        self.conn
            .execute("DELETE FROM notes WHERE id = ?1", [note_id])
    }

    pub fn get_note(&self, note_id: i64) -> rusqlite::Result<Option<Note>> {
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1");
        self.conn
            .query_row(&sql, [note_id], note_from_row)
            .optional()
    }

    pub fn note_exists(&self, note_id: i64) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE id = ?1",
            [note_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Lists notes in one archive bucket. `private = None` ignores the private flag.
    pub fn list_notes(&self, archived: bool, private: Option<bool>) -> rusqlite::Result<Vec<Note>> {
        let order = if archived {
            "ORDER BY timestamp DESC"
        } else {
            "ORDER BY is_pinned DESC, timestamp DESC"
        };
        let rows = match private {
            Some(private) => {
                let sql = format!(
                    "SELECT {NOTE_COLUMNS} FROM notes
                     WHERE is_archived = ?1 AND COALESCE(is_private, 0) = ?2 {order}"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![archived, private], note_from_row)?;
                rows.collect::<rusqlite::Result<Vec<Note>>>()?
            }
            None => {
                let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE is_archived = ?1 {order}");
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map([archived], note_from_row)?;
                rows.collect::<rusqlite::Result<Vec<Note>>>()?
            }
        };
        Ok(rows)
    }

    pub fn list_encrypted_notes(&self) -> rusqlite::Result<Vec<Note>> {
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE is_encrypted = 1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], note_from_row)?;
        rows.collect()
    }

    pub fn get_kv(&self, key: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()
    }

    pub fn set_kv(&self, key: &str, value: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_kv(&self, key: &str) -> rusqlite::Result<()> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let raw_type: String = row.get(5)?;
    let note_type = NoteType::parse(&raw_type).unwrap_or_default();
    let body = match note_type {
        NoteType::Text => NoteBody::Text(row.get(2)?),
        NoteType::Checklist => {
            let raw: String = row.get(6)?;
            let items: Vec<ChecklistItem> = serde_json::from_str(&raw)
                .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err)))?;
            NoteBody::Checklist(items)
        }
    };

    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        body,
        timestamp: row.get(3)?,
        pinned: row.get(4)?,
        image_uri: row.get(7)?,
        archived: row.get(8)?,
        audio_path: row.get(9)?,
        private: row.get::<_, Option<bool>>(10)?.unwrap_or(false),
        encrypted: row.get(11)?,
        encrypted_content: row.get(12)?,
        encrypted_title: row.get(13)?,
    })
}
