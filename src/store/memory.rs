use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Note, NoteFields, NotePatch, NoteStore, StoreError, StoreResult, Subscribers, Subscription};

/// In-process collection. Insertion order is storage order.
///
/// Besides the demo mode of the CLI it is the store the sync tests run
/// against, so it records every write it accepts and can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    subscribers: Subscribers,
}

#[derive(Debug, Default)]
struct Inner {
    notes: IndexMap<String, Note>,
    writes: Vec<WriteRecord>,
    next_ids: Vec<String>,
    fail_writes: bool,
}

/// One accepted mutation, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRecord {
    Create { id: String, body: String },
    Patch { id: String, patch: NotePatch },
    Delete { id: String },
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the collection without notifying subscribers or logging writes.
    pub fn with_notes(notes: impl IntoIterator<Item = Note>) -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.lock();
            for note in notes {
                inner.notes.insert(note.id.clone(), note);
            }
        }
        store
    }

    /// Ids handed out by the next `create` calls, oldest first.
    pub fn queue_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        inner.next_ids.extend(ids.into_iter().map(Into::into));
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.inner.lock().writes.clone()
    }

    pub fn snapshot(&self) -> Vec<Note> {
        self.inner.lock().notes.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Note> {
        self.inner.lock().notes.get(id).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Replaces a document as if another client had written it.
    pub fn put_external(&self, note: Note) {
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.notes.insert(note.id.clone(), note);
            inner.notes.values().cloned().collect::<Vec<_>>()
        };
        self.subscribers.broadcast(&snapshot);
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Inner) -> StoreResult<T>) -> StoreResult<T> {
        let (value, snapshot) = {
            let mut inner = self.inner.lock();
            if inner.fail_writes {
                return Err(StoreError::Unavailable("writes disabled".into()));
            }
            let value = f(&mut inner)?;
            (value, inner.notes.values().cloned().collect::<Vec<_>>())
        };
        self.subscribers.broadcast(&snapshot);
        Ok(value)
    }
}

impl NoteStore for MemoryStore {
    fn subscribe(&self) -> StoreResult<Subscription> {
        let snapshot = self.snapshot();
        Ok(self.subscribers.register(snapshot))
    }

    fn create(&self, fields: NoteFields) -> StoreResult<String> {
        self.mutate(|inner| {
            let id = if inner.next_ids.is_empty() {
                Uuid::new_v4().simple().to_string()
            } else {
                inner.next_ids.remove(0)
            };
            inner.writes.push(WriteRecord::Create {
                id: id.clone(),
                body: fields.body.clone(),
            });
            inner.notes.insert(
                id.clone(),
                Note {
                    id: id.clone(),
                    body: fields.body,
                    created_at: fields.created_at,
                    updated_at: fields.updated_at,
                },
            );
            Ok(id)
        })
    }

    fn merge_patch(&self, id: &str, patch: NotePatch) -> StoreResult<()> {
        self.mutate(|inner| {
            let note = inner
                .notes
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            patch.apply_to(note);
            inner.writes.push(WriteRecord::Patch {
                id: id.to_string(),
                patch,
            });
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.mutate(|inner| {
            // deleting a missing document is not an error
            inner.notes.shift_remove(id);
            inner.writes.push(WriteRecord::Delete { id: id.to_string() });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn subscribe_delivers_current_collection_first() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.queue_ids(["n1", "n2"]);
        store.create(NoteFields::new("first", 1))?;
        store.create(NoteFields::new("second", 2))?;

        let sub = store.subscribe()?;
        let snapshot = sub.latest().expect("initial snapshot");
        let ids: Vec<_> = snapshot.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["n1", "n2"]);
        Ok(())
    }

    #[test]
    fn every_mutation_broadcasts_full_collection() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.queue_ids(["a", "b"]);
        let sub = store.subscribe()?;
        assert_eq!(sub.latest().map(|s| s.len()), Some(0));

        store.create(NoteFields::new("one", 1))?;
        store.create(NoteFields::new("two", 1))?;
        assert_eq!(sub.latest().map(|s| s.len()), Some(2));

        store.merge_patch("a", NotePatch::body("edited", 5))?;
        let snapshot = sub.latest().expect("patched snapshot");
        assert_eq!(snapshot[0].body, "edited");
        assert_eq!(snapshot[0].created_at, 1);
        assert_eq!(snapshot[0].updated_at, 5);

        store.delete("a")?;
        let snapshot = sub.latest().expect("deleted snapshot");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "b");
        Ok(())
    }

    #[test]
    fn patch_of_missing_note_is_rejected() {
        let store = MemoryStore::new();
        let result = store.merge_patch("ghost", NotePatch::body("x", 1));
        assert_matches!(result, Err(StoreError::NotFound(id)) if id == "ghost");
        assert!(store.writes().is_empty());
    }

    #[test]
    fn failing_store_rejects_writes_without_broadcast() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let sub = store.subscribe()?;
        sub.latest();
        store.set_fail_writes(true);
        assert_matches!(
            store.create(NoteFields::new("x", 1)),
            Err(StoreError::Unavailable(_))
        );
        assert!(sub.latest().is_none());
        Ok(())
    }
}
