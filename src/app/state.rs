use strum::{Display, EnumIter};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::LayoutConfig;
use crate::sync::FlushStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    List,
    Editor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum EditorTab {
    Write,
    Preview,
}

/// Cursor and text of the editor pane. The text mirrors the sync buffer;
/// every change is pushed back through `SyncCore::edit_text`.
#[derive(Debug, Clone, Default)]
pub struct EditorState {
    note_id: Option<String>,
    buffer: String,
    cursor: usize,
    preferred_column: Option<usize>,
}

impl EditorState {
    pub fn new(note_id: Option<String>, buffer: String) -> Self {
        let cursor = buffer.len();
        Self {
            note_id,
            buffer,
            cursor,
            preferred_column: None,
        }
    }

    pub fn note_id(&self) -> Option<&str> {
        self.note_id.as_deref()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Follows the sync buffer. A different note puts the cursor at the end;
    /// the same note keeps it, clamped to a character boundary.
    pub fn follow(&mut self, note_id: Option<&str>, text: &str) -> bool {
        if self.note_id.as_deref() != note_id {
            *self = Self::new(note_id.map(str::to_string), text.to_string());
            return true;
        }
        if self.buffer == text {
            return false;
        }
        self.buffer = text.to_string();
        let mut cursor = self.cursor.min(self.buffer.len());
        while !self.buffer.is_char_boundary(cursor) {
            cursor -= 1;
        }
        self.cursor = cursor;
        self.preferred_column = None;
        true
    }

    pub fn insert_char(&mut self, ch: char) -> bool {
        self.buffer.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
        self.preferred_column = if ch == '\n' { Some(0) } else { None };
        true
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(prev..self.cursor);
        self.cursor = prev;
        self.preferred_column = None;
        true
    }

    pub fn delete(&mut self) -> bool {
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.buffer.drain(self.cursor..next);
        self.preferred_column = None;
        true
    }

    pub fn move_left(&mut self) -> bool {
        let prev = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.jump_to(prev)
    }

    pub fn move_right(&mut self) -> bool {
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        self.jump_to(next)
    }

    pub fn move_home(&mut self) -> bool {
        let start = line_start(&self.buffer, self.cursor);
        self.jump_to(start)
    }

    pub fn move_end(&mut self) -> bool {
        let end = line_end(&self.buffer, self.cursor);
        self.jump_to(end)
    }

    pub fn move_up(&mut self) -> bool {
        let start = line_start(&self.buffer, self.cursor);
        let column = self.goal_column(start);
        let target = if start == 0 {
            0
        } else {
            let above = line_start(&self.buffer, start - 1);
            position_for_column(&self.buffer, above, column)
        };
        self.move_vertically(target, column)
    }

    pub fn move_down(&mut self) -> bool {
        let start = line_start(&self.buffer, self.cursor);
        let column = self.goal_column(start);
        let end = line_end(&self.buffer, self.cursor);
        let target = if end == self.buffer.len() {
            end
        } else {
            position_for_column(&self.buffer, end + 1, column)
        };
        self.move_vertically(target, column)
    }

    fn goal_column(&self, line_start: usize) -> usize {
        self.preferred_column
            .unwrap_or_else(|| column_at(&self.buffer, line_start, self.cursor))
    }

    fn move_vertically(&mut self, target: usize, column: usize) -> bool {
        if target == self.cursor {
            return false;
        }
        self.cursor = target;
        self.preferred_column = Some(column);
        true
    }

    fn jump_to(&mut self, target: usize) -> bool {
        if target == self.cursor {
            return false;
        }
        self.cursor = target;
        self.preferred_column = None;
        true
    }
}

pub struct AppState {
    pub focus: FocusPane,
    pub tab: EditorTab,
    editor: EditorState,
    status_message: Option<String>,
    flush_status: FlushStatus,
    list_percent: u16,
}

impl AppState {
    pub fn new(layout: &LayoutConfig) -> Self {
        Self {
            focus: FocusPane::List,
            tab: if layout.preview_on_open {
                EditorTab::Preview
            } else {
                EditorTab::Write
            },
            editor: EditorState::default(),
            status_message: None,
            flush_status: FlushStatus::Idle {
                last_saved_at: None,
            },
            list_percent: layout.list_percent,
        }
    }

    pub fn editor(&self) -> &EditorState {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut EditorState {
        &mut self.editor
    }

    pub fn sync_editor(&mut self, note_id: Option<&str>, text: &str) {
        self.editor.follow(note_id, text);
    }

    pub fn is_writing(&self) -> bool {
        self.focus == FocusPane::Editor && self.tab == EditorTab::Write
    }

    pub fn focus_editor(&mut self) {
        self.focus = FocusPane::Editor;
    }

    pub fn focus_list(&mut self) {
        self.focus = FocusPane::List;
    }

    pub fn toggle_tab(&mut self) -> EditorTab {
        self.tab = match self.tab {
            EditorTab::Write => EditorTab::Preview,
            EditorTab::Preview => EditorTab::Write,
        };
        self.tab
    }

    pub fn list_percent(&self) -> u16 {
        self.list_percent
    }

    pub fn flush_status(&self) -> &FlushStatus {
        &self.flush_status
    }

    pub fn set_flush_status(&mut self, status: FlushStatus) {
        self.flush_status = status;
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    text[..cursor]
        .grapheme_indices(true)
        .next_back()
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .graphemes(true)
        .next()
        .map(|grapheme| cursor + grapheme.len())
        .unwrap_or(text.len())
}

fn line_start(text: &str, cursor: usize) -> usize {
    text[..cursor].rfind('\n').map(|idx| idx + 1).unwrap_or(0)
}

fn line_end(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .find('\n')
        .map(|idx| cursor + idx)
        .unwrap_or(text.len())
}

fn column_at(text: &str, line_start: usize, cursor: usize) -> usize {
    text[line_start..cursor].graphemes(true).count()
}

fn position_for_column(text: &str, line_start: usize, column: usize) -> usize {
    let line_end = line_end(text, line_start);
    text[line_start..line_end]
        .grapheme_indices(true)
        .nth(column)
        .map(|(idx, _)| line_start + idx)
        .unwrap_or(line_end)
}
