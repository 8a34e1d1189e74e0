use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub mod memory;
mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A single markdown note as stored in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Note {
    /// First non-empty line of the body with heading markers stripped.
    pub fn title(&self) -> &str {
        note_title(&self.body)
    }
}

pub fn note_title(body: &str) -> &str {
    body.lines()
        .map(|line| line.trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .unwrap_or("Untitled")
}

/// Payload for creating a document; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteFields {
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl NoteFields {
    pub fn new(body: impl Into<String>, now_millis: i64) -> Self {
        Self {
            body: body.into(),
            created_at: now_millis,
            updated_at: now_millis,
        }
    }
}

/// Partial update; only the fields that are `Some` overwrite the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl NotePatch {
    pub fn body(body: impl Into<String>, now_millis: i64) -> Self {
        Self {
            body: Some(body.into()),
            updated_at: Some(now_millis),
        }
    }

    fn apply_to(&self, note: &mut Note) {
        if let Some(body) = &self.body {
            note.body.clone_from(body);
        }
        if let Some(updated_at) = self.updated_at {
            note.updated_at = updated_at;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("note {0} not found")]
    NotFound(String),
    #[error("store backend failure: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("malformed document: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Contract every note backend fulfils.
///
/// Writes never touch a caller's cached copy; callers observe their own
/// writes through the next snapshot on their subscription. After any
/// mutation each live [`Subscription`] receives the whole collection in
/// storage order, to be replaced wholesale rather than diffed.
pub trait NoteStore: Send + Sync {
    /// Registers a subscriber. The current collection is queued on the
    /// returned subscription immediately.
    fn subscribe(&self) -> StoreResult<Subscription>;

    fn create(&self, fields: NoteFields) -> StoreResult<String>;

    fn merge_patch(&self, id: &str, patch: NotePatch) -> StoreResult<()>;

    fn delete(&self, id: &str) -> StoreResult<()>;

    /// Looks for changes made outside this handle and broadcasts a snapshot
    /// if any were found. Backends that only see their own writes can keep
    /// the default.
    fn poll_changes(&self) -> StoreResult<()> {
        Ok(())
    }
}

type SubscriberList = Mutex<Vec<(u64, Sender<Vec<Note>>)>>;

/// Fan-out of snapshots to live subscriptions.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    next_id: Mutex<u64>,
    senders: Arc<SubscriberList>,
}

impl Subscribers {
    pub(crate) fn register(&self, initial: Vec<Note>) -> Subscription {
        let (tx, rx) = crossbeam_channel::unbounded();
        // the receiver is still alive here, so this cannot fail
        let _ = tx.send(initial);
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.senders.lock().push((id, tx));
        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.senders),
        }
    }

    pub(crate) fn broadcast(&self, snapshot: &[Note]) {
        let mut senders = self.senders.lock();
        senders.retain(|(_, tx)| tx.send(snapshot.to_vec()).is_ok());
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.lock().len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.senders.lock().is_empty()
    }
}

/// Live registration with a store. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: Receiver<Vec<Note>>,
    registry: Weak<SubscriberList>,
}

impl Subscription {
    /// Drains every queued snapshot and returns only the newest one.
    pub fn latest(&self) -> Option<Vec<Note>> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(snapshot) => latest = Some(snapshot),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        latest
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
