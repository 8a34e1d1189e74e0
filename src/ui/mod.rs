use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Tabs, Wrap};
use ratatui::Frame;
use strum::IntoEnumIterator;
use time::{macros::format_description, OffsetDateTime};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, EditorTab, FocusPane};
use crate::highlight::{html_spans, SpanKind};
use crate::store::Note;
use crate::sync::{datetime_from_millis, FlushStatus};

/// Everything a frame needs, borrowed from the app for one draw.
pub struct View<'a> {
    pub notes: Vec<&'a Note>,
    pub current: Option<&'a Note>,
    pub text: &'a str,
    /// Rendered HTML, present only while the preview tab is showing.
    pub preview: Option<&'a str>,
    pub state: &'a AppState,
}

impl View<'_> {
    /// Row of the current note in the display order.
    pub fn selected_index(&self) -> Option<usize> {
        let current = self.current?;
        self.notes.iter().position(|note| note.id == current.id)
    }
}

pub fn draw_app(frame: &mut Frame, view: &View, list_state: &mut ListState) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(2)])
        .split(frame.size());

    let list_percent = view.state.list_percent();
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(list_percent),
            Constraint::Percentage(100 - list_percent),
        ])
        .split(vertical[0]);

    draw_note_list(frame, view, columns[0], list_state);
    draw_editor(frame, view, columns[1]);

    let status = Paragraph::new(build_status_line(view)).style(Style::default().fg(Color::Gray));
    frame.render_widget(status, vertical[1]);
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn draw_note_list(frame: &mut Frame, view: &View, area: Rect, list_state: &mut ListState) {
    let mut items: Vec<ListItem> = view
        .notes
        .iter()
        .map(|note| {
            ListItem::new(vec![
                Line::from(Span::styled(
                    note.title().to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    format!("Updated {}", format_timestamp(datetime_from_millis(note.updated_at))),
                    Style::default().fg(Color::Gray),
                )),
            ])
        })
        .collect();
    if items.is_empty() {
        items.push(ListItem::new(vec![
            Line::from("You have no notes"),
            Line::from(Span::styled(
                "Press `a` to create one.",
                Style::default().fg(Color::DarkGray),
            )),
        ]));
    }

    let list = List::new(items)
        .block(
            Block::default()
                .title("Notes")
                .borders(Borders::ALL)
                .border_style(focus_style(view.state.focus == FocusPane::List)),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, area, list_state);
}

fn draw_editor(frame: &mut Frame, view: &View, area: Rect) {
    let block = Block::default()
        .title("Editor")
        .borders(Borders::ALL)
        .border_style(focus_style(view.state.focus == FocusPane::Editor));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);

    let selected_tab = EditorTab::iter()
        .position(|tab| tab == view.state.tab)
        .unwrap_or(0);
    let tabs = Tabs::new(EditorTab::iter().map(|tab| tab.to_string()))
        .select(selected_tab)
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, rows[0]);

    let body_area = rows[1];
    if view.current.is_none() {
        let empty = Paragraph::new("You have no notes").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, body_area);
        return;
    }

    match (view.state.tab, view.preview) {
        (EditorTab::Preview, Some(html)) => {
            let preview = Paragraph::new(preview_text(html)).wrap(Wrap { trim: false });
            frame.render_widget(preview, body_area);
        }
        _ => {
            let editor = view.state.editor();
            let (row, col) = cursor_offset(view.text, editor.cursor(), body_area.width);
            let scroll = row.saturating_sub(body_area.height.saturating_sub(1));
            let text = Paragraph::new(view.text)
                .wrap(Wrap { trim: false })
                .scroll((scroll, 0));
            frame.render_widget(text, body_area);
            if view.state.is_writing() && body_area.width > 0 && body_area.height > 0 {
                let col = col.min(body_area.width - 1);
                frame.set_cursor(body_area.x + col, body_area.y + (row - scroll));
            }
        }
    }
}

fn preview_text(html: &str) -> Text<'static> {
    let lines: Vec<Line> = html
        .lines()
        .map(|line| {
            Line::from(
                html_spans(line)
                    .into_iter()
                    .map(|(kind, text)| {
                        let style = match kind {
                            SpanKind::Tag => Style::default().fg(Color::DarkGray),
                            SpanKind::Entity => Style::default().fg(Color::Yellow),
                            SpanKind::Text => Style::default(),
                        };
                        Span::styled(text.to_string(), style)
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .collect();
    Text::from(lines)
}

/// Row and column of `cursor` inside a wrapped area `width` cells wide.
fn cursor_offset(text: &str, cursor: usize, width: u16) -> (u16, u16) {
    let width = usize::from(width.max(1));
    let mut row = 0usize;
    let mut col = 0usize;
    for grapheme in text[..cursor.min(text.len())].graphemes(true) {
        if grapheme == "\n" || grapheme == "\r\n" {
            row += 1;
            col = 0;
            continue;
        }
        let glyph_width = UnicodeWidthStr::width(grapheme);
        if glyph_width > 0 && col + glyph_width > width {
            row += 1;
            col = 0;
        }
        col += glyph_width;
    }
    (
        u16::try_from(row).unwrap_or(u16::MAX),
        u16::try_from(col).unwrap_or(u16::MAX),
    )
}

fn build_status_line(view: &View) -> Text<'static> {
    let total = view.notes.len();
    let position = view
        .selected_index()
        .map(|idx| format!("{}/{}", idx + 1, total))
        .unwrap_or_else(|| "0/0".to_string());

    let mut spans = vec![
        Span::raw("Note "),
        Span::styled(position, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!(" | {} ", view.state.tab)),
    ];

    match view.state.flush_status() {
        FlushStatus::Idle { last_saved_at } => {
            spans.push(Span::raw("| saved"));
            if let Some(ts) = last_saved_at {
                spans.push(Span::raw(" "));
                spans.push(Span::styled(
                    format_time_short(*ts),
                    Style::default().fg(Color::Gray),
                ));
            }
        }
        FlushStatus::Pending { since, .. } => {
            spans.push(Span::raw("| "));
            spans.push(Span::styled(
                "unsaved",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::raw(" since "));
            spans.push(Span::styled(
                format_time_short(*since),
                Style::default().fg(Color::Gray),
            ));
        }
        FlushStatus::Error { message, .. } => {
            spans.push(Span::raw("| "));
            spans.push(Span::styled(
                format!("save error ({message})"),
                Style::default().fg(Color::Red),
            ));
        }
    }

    if let Some(message) = view.state.status_message() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            message.to_string(),
            Style::default().fg(Color::Cyan),
        ));
    }

    let keys = if view.state.is_writing() {
        "Esc list • Ctrl-s save now • p preview (from list) • Ctrl-c quit"
    } else {
        "j/k move • Enter edit • a new • d delete • p preview • Ctrl-s save • q quit"
    };
    Text::from(vec![
        Line::from(spans),
        Line::from(Span::styled(keys, Style::default().fg(Color::DarkGray))),
    ])
}

fn format_timestamp(dt: OffsetDateTime) -> String {
    dt.format(&format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| dt.unix_timestamp().to_string())
}

fn format_time_short(dt: OffsetDateTime) -> String {
    dt.format(&format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| dt.unix_timestamp().to_string())
}
