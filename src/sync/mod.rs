use std::sync::Arc;

use time::OffsetDateTime;

use crate::config::SyncConfig;
use crate::store::{Note, NoteFields, NotePatch, NoteStore, StoreError, StoreResult, Subscription};

pub mod clock;
pub mod debounce;

pub use clock::{datetime_from_millis, Clock, ManualClock, SystemClock};
pub use debounce::{Debouncer, PendingFlush};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushStatus {
    Idle {
        last_saved_at: Option<OffsetDateTime>,
    },
    Pending {
        note_id: String,
        since: OffsetDateTime,
    },
    Error {
        note_id: String,
        message: String,
        occurred_at: OffsetDateTime,
    },
}

/// Outcome of a debounced or forced flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushEvent {
    Saved {
        note_id: String,
        timestamp: OffsetDateTime,
    },
    /// The captured text already matched the cached body; nothing was written.
    Unchanged { note_id: String },
    Error { note_id: String, message: String },
}

#[derive(Debug, Clone)]
struct FlushFailure {
    note_id: String,
    message: String,
    occurred_at: OffsetDateTime,
}

/// Local mirror of the note collection, the selection and the edit buffer.
///
/// Driven from a single thread. Snapshots, the debounce deadline and user
/// intents arrive in whatever order the caller delivers them, and every
/// transition ends in [`SyncCore::reconcile`].
pub struct SyncCore {
    store: Arc<dyn NoteStore>,
    clock: Arc<dyn Clock>,
    subscription: Option<Subscription>,
    notes: Vec<Note>,
    current_note_id: Option<String>,
    temp_note_text: String,
    /// Identity of the note `temp_note_text` was last loaded from.
    buffer_note_id: Option<String>,
    debouncer: Debouncer,
    placeholder_body: String,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<FlushFailure>,
}

impl SyncCore {
    pub fn new(store: Arc<dyn NoteStore>, clock: Arc<dyn Clock>, config: &SyncConfig) -> Self {
        Self {
            store,
            clock,
            subscription: None,
            notes: Vec::new(),
            current_note_id: None,
            temp_note_text: String::new(),
            buffer_note_id: None,
            debouncer: Debouncer::new(config.debounce),
            placeholder_body: config.placeholder_body.clone(),
            last_saved_at: None,
            last_error: None,
        }
    }

    /// Subscribes to the store and applies the initial snapshot.
    pub fn connect(&mut self) -> StoreResult<()> {
        let subscription = self.store.subscribe()?;
        self.subscription = Some(subscription);
        self.drain_subscription();
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.subscription.is_some()
    }

    /// One turn of the event loop: pick up outside writes, apply the newest
    /// snapshot and fire the debounced flush if its deadline has passed.
    pub fn tick(&mut self) -> Option<FlushEvent> {
        if !self.is_connected() {
            return None;
        }
        if let Err(err) = self.store.poll_changes() {
            tracing::warn!(?err, "polling note store for changes failed");
        }
        self.drain_subscription();
        self.fire_due_flush()
    }

    fn drain_subscription(&mut self) -> bool {
        let Some(snapshot) = self.subscription.as_ref().and_then(Subscription::latest) else {
            return false;
        };
        self.apply_snapshot(snapshot);
        true
    }

    /// Replaces the cache wholesale and re-derives selection and buffer.
    pub fn apply_snapshot(&mut self, notes: Vec<Note>) {
        tracing::trace!(count = notes.len(), "applying snapshot");
        self.notes = notes;
        self.reconcile();
    }

    pub fn reconcile(&mut self) {
        self.ensure_selection();
        self.sync_edit_buffer_to_selection();
    }

    /// Defaults an unset selection to the first note in storage order.
    pub fn ensure_selection(&mut self) {
        if self.current_note_id.is_none() {
            self.current_note_id = self.notes.first().map(|note| note.id.clone());
        }
    }

    /// The note on display: the selected one, or the first cached note when
    /// the selection is unset or names a note that is not in the cache.
    pub fn derive_current_note(&self) -> Option<&Note> {
        self.current_note_id
            .as_deref()
            .and_then(|id| self.notes.iter().find(|note| note.id == id))
            .or_else(|| self.notes.first())
    }

    /// Reloads the buffer when the note on display is a different note from
    /// the one the buffer was loaded from. Unflushed text is discarded.
    pub fn sync_edit_buffer_to_selection(&mut self) {
        let Some(note) = self.derive_current_note() else {
            self.buffer_note_id = None;
            return;
        };
        if self.buffer_note_id.as_deref() == Some(note.id.as_str()) {
            return;
        }
        let (id, body) = (note.id.clone(), note.body.clone());
        tracing::debug!(note_id = %id, "edit buffer follows selection");
        self.buffer_note_id = Some(id);
        self.temp_note_text = body;
    }

    /// Sets the buffer and re-arms the debounce slot for the note on display.
    pub fn edit_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text == self.temp_note_text {
            return;
        }
        self.temp_note_text = text;
        let Some(target) = self.buffer_note_id.clone() else {
            tracing::debug!("edit without a note on display, nothing to flush");
            return;
        };
        let superseded = self.debouncer.arm(
            target,
            self.temp_note_text.clone(),
            self.clock.now(),
            self.clock.epoch_millis(),
        );
        if let Some(superseded) = superseded {
            tracing::trace!(note_id = %superseded.note_id, "superseded pending flush");
        }
        // a fresh edit supersedes the previous failure in the status
        self.last_error = None;
    }

    fn fire_due_flush(&mut self) -> Option<FlushEvent> {
        let pending = self.debouncer.take_due(self.clock.now())?;
        Some(self.flush(pending))
    }

    /// Writes the pending flush without waiting for its deadline.
    pub fn flush_now(&mut self) -> Option<FlushEvent> {
        let pending = self.debouncer.cancel()?;
        Some(self.flush(pending))
    }

    fn flush(&mut self, pending: PendingFlush) -> FlushEvent {
        let PendingFlush { note_id, text, .. } = pending;
        let unchanged = self
            .notes
            .iter()
            .find(|note| note.id == note_id)
            .is_some_and(|note| note.body == text);
        if unchanged {
            tracing::debug!(%note_id, "buffer matches stored body, skipping write");
            return FlushEvent::Unchanged { note_id };
        }

        let timestamp = datetime_from_millis(self.clock.epoch_millis());
        match self.write_body(&note_id, &text) {
            Ok(()) => {
                tracing::debug!(%note_id, "flushed note body");
                self.last_saved_at = Some(timestamp);
                self.last_error = None;
                FlushEvent::Saved { note_id, timestamp }
            }
            Err(err) => {
                tracing::error!(?err, %note_id, "flushing note failed");
                let message = err.to_string();
                self.last_error = Some(FlushFailure {
                    note_id: note_id.clone(),
                    message: message.clone(),
                    occurred_at: timestamp,
                });
                FlushEvent::Error { note_id, message }
            }
        }
    }

    fn write_body(&self, note_id: &str, text: &str) -> StoreResult<()> {
        self.store
            .merge_patch(note_id, NotePatch::body(text, self.clock.epoch_millis()))
    }

    /// Merge-patches `text` into the selected note, or the note on display
    /// when nothing is selected. The cache only changes with the next
    /// snapshot.
    pub fn update_note(&self, text: &str) -> StoreResult<()> {
        let target = self
            .current_note_id
            .clone()
            .or_else(|| self.derive_current_note().map(|note| note.id.clone()))
            .ok_or_else(|| StoreError::NotFound("no note selected".into()))?;
        self.write_body(&target, text)
    }

    /// Creates a note with the placeholder body and selects it before the
    /// store has echoed it back. A snapshot already queued on the
    /// subscription is applied right away so the buffer moves to the new note.
    pub fn create_new_note(&mut self) -> StoreResult<String> {
        let fields = NoteFields::new(self.placeholder_body.clone(), self.clock.epoch_millis());
        let id = self.store.create(fields)?;
        tracing::info!(note_id = %id, "created note");
        self.current_note_id = Some(id.clone());
        if !self.drain_subscription() {
            self.reconcile();
        }
        Ok(id)
    }

    /// Deletes `note_id` from the store. Cache and selection recover
    /// through the next snapshot.
    pub fn delete_note(&mut self, note_id: &str) -> StoreResult<()> {
        self.store.delete(note_id)?;
        tracing::info!(%note_id, "deleted note");
        if self.debouncer.cancel_for(note_id).is_some() {
            tracing::debug!(%note_id, "dropped pending flush of deleted note");
        }
        Ok(())
    }

    pub fn select_note(&mut self, note_id: impl Into<String>) {
        self.current_note_id = Some(note_id.into());
        self.reconcile();
    }

    /// Cancels the pending flush and drops the store subscription. Nothing
    /// fires after this returns.
    pub fn teardown(&mut self) {
        if let Some(dropped) = self.debouncer.cancel() {
            tracing::debug!(note_id = %dropped.note_id, "discarding pending flush on teardown");
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    /// Cached notes in storage order.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Cached notes in display order, most recently updated first.
    pub fn sorted_notes(&self) -> Vec<&Note> {
        display_order(&self.notes)
    }

    pub fn current_note_id(&self) -> Option<&str> {
        self.current_note_id.as_deref()
    }

    pub fn current_note(&self) -> Option<&Note> {
        self.derive_current_note()
    }

    pub fn text(&self) -> &str {
        &self.temp_note_text
    }

    pub fn buffer_note_id(&self) -> Option<&str> {
        self.buffer_note_id.as_deref()
    }

    pub fn pending_flush(&self) -> Option<&PendingFlush> {
        self.debouncer.pending()
    }

    pub fn status(&self) -> FlushStatus {
        if let Some(failure) = &self.last_error {
            return FlushStatus::Error {
                note_id: failure.note_id.clone(),
                message: failure.message.clone(),
                occurred_at: failure.occurred_at,
            };
        }
        if let Some(pending) = self.debouncer.pending() {
            return FlushStatus::Pending {
                note_id: pending.note_id.clone(),
                since: datetime_from_millis(pending.armed_at),
            };
        }
        FlushStatus::Idle {
            last_saved_at: self.last_saved_at,
        }
    }
}

/// Stable sort by `updated_at`, newest first.
pub fn display_order(notes: &[Note]) -> Vec<&Note> {
    let mut sorted: Vec<&Note> = notes.iter().collect();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sorted
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::config::DEFAULT_PLACEHOLDER_BODY;
    use crate::store::memory::WriteRecord;
    use crate::store::MemoryStore;

    const EPOCH: i64 = 1_700_000_000_000;

    fn note(id: &str, body: &str, updated_at: i64) -> Note {
        Note {
            id: id.into(),
            body: body.into(),
            created_at: 1,
            updated_at,
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        core: SyncCore,
    }

    impl Harness {
        fn connected(notes: Vec<Note>) -> anyhow::Result<Self> {
            let store = Arc::new(MemoryStore::with_notes(notes));
            let clock = Arc::new(ManualClock::new(EPOCH));
            let mut core = SyncCore::new(store.clone(), clock.clone(), &SyncConfig::default());
            core.connect()?;
            Ok(Self { store, clock, core })
        }

        fn advance_ms(&self, ms: u64) {
            self.clock.advance(Duration::from_millis(ms));
        }

        fn patches(&self) -> Vec<WriteRecord> {
            self.store
                .writes()
                .into_iter()
                .filter(|w| matches!(w, WriteRecord::Patch { .. }))
                .collect()
        }
    }

    #[test]
    fn unset_selection_defaults_to_storage_order_first() -> anyhow::Result<()> {
        let h = Harness::connected(vec![note("a", "older", 100), note("b", "newer", 200)])?;
        assert_eq!(h.core.current_note_id(), Some("a"));
        assert_eq!(h.core.text(), "older");
        assert_eq!(h.core.sorted_notes()[0].id, "b");
        Ok(())
    }

    #[test]
    fn empty_snapshot_leaves_selection_unset() -> anyhow::Result<()> {
        let h = Harness::connected(Vec::new())?;
        assert_eq!(h.core.current_note_id(), None);
        assert!(h.core.current_note().is_none());
        assert_eq!(h.core.text(), "");
        Ok(())
    }

    #[test]
    fn stale_selection_falls_back_to_cache_first() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(EPOCH));
        let mut core = SyncCore::new(store, clock, &SyncConfig::default());

        core.select_note("gone");
        core.apply_snapshot(vec![note("x", "first", 5), note("y", "second", 50)]);

        assert_eq!(core.current_note_id(), Some("gone"));
        assert_eq!(core.current_note().map(|n| n.id.as_str()), Some("x"));
        assert_eq!(core.text(), "first");
    }

    #[test]
    fn reapplying_a_snapshot_keeps_note_and_buffer() -> anyhow::Result<()> {
        let snapshot = vec![note("a", "body", 1), note("b", "other", 2)];
        let mut h = Harness::connected(snapshot.clone())?;
        h.core.edit_text("body, edited");

        h.core.apply_snapshot(snapshot.clone());
        h.core.apply_snapshot(snapshot);

        assert_eq!(h.core.current_note().map(|n| n.id.as_str()), Some("a"));
        assert_eq!(h.core.text(), "body, edited");
        Ok(())
    }

    #[test]
    fn rapid_edits_coalesce_into_one_trailing_write() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "", 1)])?;

        h.core.edit_text("E1");
        h.advance_ms(100);
        h.core.edit_text("E2");
        h.advance_ms(100);
        h.core.edit_text("E3");

        h.advance_ms(499);
        assert!(h.core.tick().is_none());
        assert!(h.patches().is_empty());

        h.advance_ms(1);
        assert_matches!(h.core.tick(), Some(FlushEvent::Saved { note_id, .. }) if note_id == "a");
        assert_eq!(
            h.patches(),
            vec![WriteRecord::Patch {
                id: "a".into(),
                patch: NotePatch::body("E3", EPOCH + 700),
            }]
        );

        h.advance_ms(1_000);
        assert!(h.core.tick().is_none());
        assert_eq!(h.patches().len(), 1);
        Ok(())
    }

    #[test]
    fn switching_notes_resets_buffer_to_stored_body() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1), note("b", "y", 2)])?;
        h.core.edit_text("x with unsaved typing");

        h.core.select_note("b");

        assert_eq!(h.core.text(), "y");
        assert_eq!(h.core.buffer_note_id(), Some("b"));
        Ok(())
    }

    #[test]
    fn pending_flush_keeps_its_target_across_a_switch() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1), note("b", "y", 2)])?;
        h.core.edit_text("x2");
        h.core.select_note("b");

        h.advance_ms(500);
        h.core.tick();

        assert_eq!(h.store.get("a").map(|n| n.body), Some("x2".to_string()));
        assert_eq!(h.store.get("b").map(|n| n.body), Some("y".to_string()));
        assert_eq!(h.core.text(), "y");
        Ok(())
    }

    #[test]
    fn create_selects_new_id_before_snapshot_arrives() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.queue_ids(["n1"]);
        let clock = Arc::new(ManualClock::new(EPOCH));
        let mut core = SyncCore::new(store.clone(), clock, &SyncConfig::default());

        let id = core.create_new_note()?;
        assert_eq!(id, "n1");
        assert_eq!(core.current_note_id(), Some("n1"));
        assert!(core.notes().is_empty());
        assert!(core.current_note().is_none());
        Ok(())
    }

    #[test]
    fn create_applies_queued_snapshot_and_moves_buffer() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "hi", 1)])?;
        h.store.queue_ids(["n1"]);

        h.core.create_new_note()?;
        let current = h.core.current_note().expect("created note in cache");
        assert_eq!(current.id, "n1");
        assert_eq!(current.body, DEFAULT_PLACEHOLDER_BODY);
        assert_eq!(current.created_at, EPOCH);
        assert_eq!(current.updated_at, EPOCH);
        assert_eq!(h.core.buffer_note_id(), Some("n1"));
        assert_eq!(h.core.text(), DEFAULT_PLACEHOLDER_BODY);

        h.core.edit_text(format!("{DEFAULT_PLACEHOLDER_BODY}x"));
        assert_matches!(h.core.pending_flush(), Some(p) if p.note_id == "n1");
        h.advance_ms(500);
        h.core.tick();
        assert_eq!(h.store.get("a").map(|n| n.body), Some("hi".to_string()));
        Ok(())
    }

    #[test]
    fn failed_create_leaves_selection_alone() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1)])?;
        h.store.set_fail_writes(true);
        assert_matches!(h.core.create_new_note(), Err(StoreError::Unavailable(_)));
        assert_eq!(h.core.current_note_id(), Some("a"));
        Ok(())
    }

    #[test]
    fn display_order_is_newest_first_and_stable() {
        let notes = vec![
            note("old", "", 100),
            note("new", "", 200),
            note("tie-1", "", 150),
            note("tie-2", "", 150),
        ];
        let ids: Vec<_> = display_order(&notes).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["new", "tie-1", "tie-2", "old"]);
        assert_eq!(notes[0].id, "old", "cache order untouched");
    }

    #[test]
    fn deleting_selected_note_recovers_via_next_snapshot() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![
            note("n0", "zero", 1),
            note("n1", "one", 2),
            note("n2", "two", 3),
        ])?;
        h.core.select_note("n1");
        assert_eq!(h.core.text(), "one");

        h.core.delete_note("n1")?;
        assert_eq!(h.core.current_note_id(), Some("n1"));
        assert_eq!(h.core.notes().len(), 3);

        h.core.tick();
        assert_eq!(h.core.current_note().map(|n| n.id.as_str()), Some("n0"));
        assert_eq!(h.core.text(), "zero");
        Ok(())
    }

    #[test]
    fn deleting_target_cancels_its_pending_flush() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1), note("b", "y", 2)])?;
        h.core.edit_text("doomed");
        h.core.delete_note("a")?;

        h.advance_ms(600);
        assert!(h.core.tick().is_none());
        assert_eq!(h.store.writes(), vec![WriteRecord::Delete { id: "a".into() }]);
        Ok(())
    }

    #[test]
    fn flush_skips_text_equal_to_stored_body() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "same", 1)])?;
        h.core.edit_text("sam");
        h.core.edit_text("same");

        h.advance_ms(500);
        assert_matches!(h.core.tick(), Some(FlushEvent::Unchanged { .. }));
        assert!(h.store.writes().is_empty());
        Ok(())
    }

    #[test]
    fn flush_now_writes_without_waiting() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1)])?;
        h.core.edit_text("typed fast");
        assert_matches!(h.core.status(), FlushStatus::Pending { note_id, .. } if note_id == "a");

        assert_matches!(h.core.flush_now(), Some(FlushEvent::Saved { .. }));
        assert!(h.core.pending_flush().is_none());
        assert_eq!(h.store.get("a").map(|n| n.body), Some("typed fast".to_string()));
        assert_matches!(h.core.status(), FlushStatus::Idle { last_saved_at: Some(_) });
        Ok(())
    }

    #[test]
    fn failed_flush_is_reported_and_not_retried() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1)])?;
        h.store.set_fail_writes(true);
        h.core.edit_text("lost");

        h.advance_ms(500);
        assert_matches!(h.core.tick(), Some(FlushEvent::Error { note_id, .. }) if note_id == "a");
        assert_matches!(h.core.status(), FlushStatus::Error { .. });

        h.store.set_fail_writes(false);
        h.advance_ms(500);
        assert!(h.core.tick().is_none());
        assert!(h.store.writes().is_empty());
        Ok(())
    }

    #[test]
    fn new_edit_after_failed_flush_reports_pending() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1)])?;
        h.store.set_fail_writes(true);
        h.core.edit_text("lost");
        h.advance_ms(500);
        h.core.tick();
        assert_matches!(h.core.status(), FlushStatus::Error { .. });

        h.core.edit_text("retyped");
        assert_matches!(h.core.status(), FlushStatus::Pending { note_id, .. } if note_id == "a");
        Ok(())
    }

    #[test]
    fn update_note_targets_selected_id() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1), note("b", "y", 2)])?;
        h.core.select_note("b");
        h.core.update_note("direct")?;
        assert_eq!(h.store.get("b").map(|n| n.body), Some("direct".to_string()));
        assert_eq!(h.core.notes()[1].body, "y", "cache waits for the snapshot");
        Ok(())
    }

    #[test]
    fn teardown_cancels_flush_and_unsubscribes() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1)])?;
        assert_eq!(h.store.subscriber_count(), 1);
        h.core.edit_text("never written");

        h.core.teardown();
        h.advance_ms(1_000);

        assert!(h.core.tick().is_none());
        assert!(h.store.writes().is_empty());
        assert_eq!(h.store.subscriber_count(), 0);
        Ok(())
    }

    #[test]
    fn external_write_to_displayed_note_keeps_local_buffer() -> anyhow::Result<()> {
        let mut h = Harness::connected(vec![note("a", "x", 1), note("b", "y", 2)])?;
        h.core.edit_text("local draft");
        h.store.put_external(note("b", "remote", 9));

        h.core.tick();
        assert_eq!(h.core.text(), "local draft");
        assert_eq!(h.core.sorted_notes()[0].body, "remote");
        Ok(())
    }
}
