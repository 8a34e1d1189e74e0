use std::fs;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{schema, Note, NoteFields, NotePatch, NoteStore, StoreError, StoreResult, Subscribers, Subscription};
use crate::config::StoreOptions;

/// Note collection kept as JSON documents in a SQLite database.
///
/// All access goes through one connection so that `PRAGMA data_version`
/// only moves when *another* connection (a second process, the CLI while
/// the TUI is open) commits. `poll_changes` uses that to pick up foreign
/// writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    collection: String,
    subscribers: Subscribers,
    data_version: Mutex<i64>,
}

impl SqliteStore {
    pub fn open(options: &StoreOptions) -> Result<Self> {
        let db_path = &options.database_path;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        prepare_connection(&conn, options)?;
        schema::apply(&conn)?;
        let data_version = read_data_version(&conn).context("reading data_version")?;
        tracing::debug!(path = %db_path.display(), collection = %options.collection, "opened note store");
        Ok(Self {
            conn: Mutex::new(conn),
            collection: options.collection.clone(),
            subscribers: Subscribers::default(),
            data_version: Mutex::new(data_version),
        })
    }

    /// Current collection contents in storage order.
    pub fn fetch_all(&self) -> StoreResult<Vec<Note>> {
        let conn = self.conn.lock();
        load_snapshot(&conn, &self.collection)
    }

    pub fn fetch_note(&self, id: &str) -> StoreResult<Option<Note>> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![self.collection, id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|raw| decode_note(id.to_string(), &raw)).transpose()
    }

    fn broadcast(&self, conn: &Connection) -> StoreResult<()> {
        let snapshot = load_snapshot(conn, &self.collection)?;
        self.subscribers.broadcast(&snapshot);
        Ok(())
    }

    /// Fans out after a committed write. The write already succeeded, so a
    /// snapshot failure is only logged.
    fn broadcast_committed(&self, conn: &Connection) {
        if let Err(err) = self.broadcast(conn) {
            tracing::warn!(?err, collection = %self.collection, "broadcasting snapshot after write failed");
        }
    }
}

impl NoteStore for SqliteStore {
    fn subscribe(&self) -> StoreResult<Subscription> {
        let snapshot = self.fetch_all()?;
        Ok(self.subscribers.register(snapshot))
    }

    fn create(&self, fields: NoteFields) -> StoreResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        let data = serde_json::to_string(&fields)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
            params![self.collection, id, data],
        )?;
        self.broadcast_committed(&conn);
        Ok(id)
    }

    fn merge_patch(&self, id: &str, patch: NotePatch) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let raw: String = tx
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![self.collection, id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut document: Map<String, Value> = serde_json::from_str(&raw)?;
        if let Value::Object(fields) = serde_json::to_value(&patch)? {
            document.extend(fields);
        }
        tx.execute(
            "UPDATE documents SET data = ?1 WHERE collection = ?2 AND id = ?3",
            params![serde_json::to_string(&document)?, self.collection, id],
        )?;
        tx.commit()?;
        self.broadcast_committed(&conn);
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![self.collection, id],
        )?;
        self.broadcast_committed(&conn);
        Ok(())
    }

    fn poll_changes(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        let current = read_data_version(&conn)?;
        let mut seen = self.data_version.lock();
        if *seen == current {
            return Ok(());
        }
        *seen = current;
        tracing::debug!(data_version = current, "external change detected");
        self.broadcast(&conn)
    }
}

fn load_snapshot(conn: &Connection, collection: &str) -> StoreResult<Vec<Note>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, data FROM documents WHERE collection = ?1 ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, raw)| decode_note(id, &raw))
        .collect()
}

fn decode_note(id: String, raw: &str) -> StoreResult<Note> {
    let mut note: Note = serde_json::from_str(raw)?;
    note.id = id;
    Ok(note)
}

fn read_data_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA data_version", [], |row| row.get(0))
}

fn prepare_connection(conn: &Connection, options: &StoreOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.busy_timeout(options.busy_timeout)
        .context("setting busy timeout")?;
    Ok(())
}
