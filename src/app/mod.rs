use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::config::AppConfig;
use crate::render::MarkdownRenderer;
use crate::store::NoteStore;
use crate::sync::{Clock, FlushEvent, SyncCore};
use crate::ui::{self, View};

mod actions;
pub mod state;

pub use actions::{Intent, IntentDispatcher};
pub use state::{AppState, EditorState, EditorTab, FocusPane};

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    FocusEditor,
    NewNote,
    DeleteNote,
    TogglePreview,
    FlushNow,
}

pub struct App {
    core: SyncCore,
    renderer: MarkdownRenderer,
    state: AppState,
    list_state: ListState,
    preview: PreviewCache,
    should_quit: bool,
    tick_rate: Duration,
}

/// Rendered HTML of the buffer, recomputed only when the text changes.
#[derive(Default)]
struct PreviewCache {
    source: String,
    html: String,
}

impl PreviewCache {
    fn refresh(&mut self, renderer: &MarkdownRenderer, text: &str) -> &str {
        if self.source != text {
            self.source = text.to_string();
            self.html = renderer.render(text);
        }
        &self.html
    }
}

impl App {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn NoteStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut core = SyncCore::new(store, clock, &config.sync);
        core.connect().context("subscribing to note store")?;
        let mut state = AppState::new(&config.layout);
        state.sync_editor(core.buffer_note_id(), core.text());
        state.set_flush_status(core.status());
        Ok(Self {
            renderer: MarkdownRenderer::new(config.renderer.flags()),
            tick_rate: config.sync.tick,
            core,
            state,
            list_state: ListState::default(),
            preview: PreviewCache::default(),
            should_quit: false,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        self.shutdown();
        restore_terminal(&mut terminal)?;
        result
    }

    /// Writes whatever is still pending, then detaches from the store.
    pub fn shutdown(&mut self) {
        if let Some(event) = self.core.flush_now() {
            self.handle_flush_event(event);
        }
        self.core.teardown();
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            let preview = if self.state.tab == EditorTab::Preview {
                Some(self.preview.refresh(&self.renderer, self.core.text()))
            } else {
                None
            };
            let view = View {
                notes: self.core.sorted_notes(),
                current: self.core.current_note(),
                text: self.core.text(),
                preview,
                state: &self.state,
            };
            self.list_state.select(view.selected_index());
            terminal
                .draw(|frame| ui::draw_app(frame, &view, &mut self.list_state))
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::ZERO);

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn on_tick(&mut self) {
        if let Some(event) = self.core.tick() {
            self.handle_flush_event(event);
        }
        self.refresh_state();
    }

    fn refresh_state(&mut self) {
        self.state
            .sync_editor(self.core.buffer_note_id(), self.core.text());
        self.state.set_flush_status(self.core.status());
    }

    fn handle_flush_event(&mut self, event: FlushEvent) {
        match event {
            FlushEvent::Saved { note_id, .. } => {
                tracing::debug!(%note_id, "note saved");
            }
            FlushEvent::Unchanged { .. } => {}
            FlushEvent::Error { note_id, message } => {
                tracing::warn!(%note_id, %message, "note could not be saved");
                self.state
                    .set_status_message(Some(format!("Save failed: {message}")));
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            let action = match key.code {
                KeyCode::Char('c') => Some(Action::Quit),
                KeyCode::Char('s') => Some(Action::FlushNow),
                _ => None,
            };
            if let Some(action) = action {
                self.handle_action(action);
                return;
            }
        }

        if self.state.is_writing() && self.handle_editor_key(key) {
            return;
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        let action = match key.code {
            KeyCode::Esc => {
                self.state.focus_list();
                None
            }
            KeyCode::Char('q') if plain => Some(Action::Quit),
            KeyCode::Char('j') | KeyCode::Down if plain => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up if plain => Some(Action::SelectPrevious),
            KeyCode::Enter | KeyCode::Tab => Some(Action::FocusEditor),
            KeyCode::Char('a') if plain => Some(Action::NewNote),
            KeyCode::Char('d') if plain => Some(Action::DeleteNote),
            KeyCode::Char('p') if plain => Some(Action::TogglePreview),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => self.dispatch(Intent::MoveSelection(1)),
            Action::SelectPrevious => self.dispatch(Intent::MoveSelection(-1)),
            Action::FocusEditor => {
                if self.core.current_note().is_some() {
                    self.state.focus_editor();
                } else {
                    self.state
                        .set_status_message(Some("No note to edit; press 'a' to create one"));
                }
            }
            Action::NewNote => {
                self.dispatch(Intent::Create);
                self.state.focus_editor();
            }
            Action::DeleteNote => match self.core.current_note().map(|note| note.id.clone()) {
                Some(note_id) => self.dispatch(Intent::Delete(note_id)),
                None => self.state.set_status_message(Some("Nothing to delete")),
            },
            Action::TogglePreview => {
                let tab = self.state.toggle_tab();
                self.state.set_status_message(Some(format!("{tab} tab")));
            }
            Action::FlushNow => match self.core.flush_now() {
                Some(FlushEvent::Saved { .. }) => self.state.set_status_message(Some("Saved")),
                Some(event) => self.handle_flush_event(event),
                None => self.state.set_status_message(Some("Nothing to save")),
            },
        }
        self.refresh_state();
    }

    fn dispatch(&mut self, intent: Intent) {
        let label = match &intent {
            Intent::Create => "create note",
            Intent::Delete(_) => "delete note",
            _ => "update selection",
        };
        match IntentDispatcher::new(&mut self.core).dispatch(intent) {
            Ok(Some(_)) => self.state.set_status_message(Some("Created a new note")),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(?err, "failed to {label}");
                self.state
                    .set_status_message(Some(format!("Failed to {label}: {err}")));
            }
        }
    }

    fn handle_editor_key(&mut self, key: KeyEvent) -> bool {
        if key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER)
        {
            return false;
        }
        match key.code {
            KeyCode::Esc => false,
            KeyCode::Enter => self.apply_editor_change(|editor| editor.insert_char('\n')),
            KeyCode::Tab => self.apply_editor_change(|editor| editor.insert_char('\t')),
            KeyCode::Backspace => self.apply_editor_change(EditorState::backspace),
            KeyCode::Delete => self.apply_editor_change(EditorState::delete),
            KeyCode::Char(ch) => self.apply_editor_change(|editor| editor.insert_char(ch)),
            KeyCode::Left => self.move_cursor(EditorState::move_left),
            KeyCode::Right => self.move_cursor(EditorState::move_right),
            KeyCode::Up => self.move_cursor(EditorState::move_up),
            KeyCode::Down => self.move_cursor(EditorState::move_down),
            KeyCode::Home => self.move_cursor(EditorState::move_home),
            KeyCode::End => self.move_cursor(EditorState::move_end),
            _ => false,
        }
    }

    fn move_cursor(&mut self, f: fn(&mut EditorState) -> bool) -> bool {
        f(self.state.editor_mut());
        true
    }

    fn apply_editor_change<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut EditorState) -> bool,
    {
        if self.state.editor().note_id().is_none() {
            return true;
        }
        if f(self.state.editor_mut()) {
            let text = self.state.editor().buffer().to_string();
            self.dispatch(Intent::Edit(text));
            self.state.set_flush_status(self.core.status());
        }
        true
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn core(&self) -> &SyncCore {
        &self.core
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("restoring screen state")?;
    Ok(())
}
