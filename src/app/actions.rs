use crate::store::StoreResult;
use crate::sync::SyncCore;

/// What the presentation layer can ask of the sync core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Select(String),
    /// Moves the selection through the display order, clamped at the ends.
    MoveSelection(isize),
    Create,
    Delete(String),
    Edit(String),
}

pub struct IntentDispatcher<'a> {
    core: &'a mut SyncCore,
}

impl<'a> IntentDispatcher<'a> {
    pub fn new(core: &'a mut SyncCore) -> Self {
        Self { core }
    }

    /// Returns the id of a created note, if the intent created one.
    pub fn dispatch(&mut self, intent: Intent) -> StoreResult<Option<String>> {
        match intent {
            Intent::Select(note_id) => self.core.select_note(note_id),
            Intent::MoveSelection(delta) => {
                if let Some(note_id) = self.neighbour(delta) {
                    self.core.select_note(note_id);
                }
            }
            Intent::Create => return self.core.create_new_note().map(Some),
            Intent::Delete(note_id) => self.core.delete_note(&note_id)?,
            Intent::Edit(text) => self.core.edit_text(text),
        }
        Ok(None)
    }

    fn neighbour(&self, delta: isize) -> Option<String> {
        let sorted = self.core.sorted_notes();
        let current = self.core.current_note()?;
        let position = sorted.iter().position(|note| note.id == current.id)?;
        let last = sorted.len().saturating_sub(1) as isize;
        let target = (position as isize + delta).clamp(0, last) as usize;
        Some(sorted[target].id.clone())
    }
}
