use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use time::format_description::well_known::Rfc3339;

use crate::app::App;
use crate::config::AppConfig;
use crate::render::MarkdownRenderer;
use crate::store::{Note, NoteFields, NoteStore, SqliteStore};
use crate::sync::{datetime_from_millis, display_order, Clock, SystemClock};

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    /// Markdown body. If omitted, reads piped stdin, else uses the placeholder.
    #[arg(long)]
    pub body: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Limit the number of notes printed
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Note identifier
    pub id: String,
    /// Write the HTML to a file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Note identifier
    pub id: String,
}

pub fn run_tui(app: &mut App) -> Result<()> {
    app.run()
}

pub fn new_note(config: &AppConfig, store: &SqliteStore, args: NewArgs) -> Result<()> {
    let body = match args.body {
        Some(body) => body,
        None => read_stdin()?.unwrap_or_default(),
    };
    let id = create_note(store, body, &config.sync.placeholder_body, &SystemClock)?;
    println!("Created note {id}");
    Ok(())
}

fn create_note(
    store: &SqliteStore,
    body: String,
    placeholder: &str,
    clock: &dyn Clock,
) -> Result<String> {
    let body = if body.trim().is_empty() {
        placeholder.to_string()
    } else {
        body
    };
    store
        .create(NoteFields::new(body, clock.epoch_millis()))
        .context("creating note")
}

pub fn list_notes(store: &SqliteStore, args: ListArgs) -> Result<()> {
    let notes = store.fetch_all().context("loading notes")?;
    print!("{}", format_note_list(&notes, args.limit));
    Ok(())
}

fn format_note_list(notes: &[Note], limit: Option<usize>) -> String {
    if notes.is_empty() {
        return "You have no notes.\n".to_string();
    }
    let mut out = String::new();
    for note in display_order(notes)
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
    {
        let _ = writeln!(&mut out, "{}  {}", note.id, note.title());
        let _ = writeln!(&mut out, "    updated {}", format_timestamp(note.updated_at));
    }
    out
}

pub fn render_note(config: &AppConfig, store: &SqliteStore, args: RenderArgs) -> Result<()> {
    let html = render_html(config, store, &args.id)?;
    match args.output {
        Some(path) => {
            fs::write(&path, html).with_context(|| format!("writing {}", path.display()))?;
            println!("Rendered note {} to {}", args.id, path.display());
        }
        None => print!("{html}"),
    }
    Ok(())
}

fn render_html(config: &AppConfig, store: &SqliteStore, id: &str) -> Result<String> {
    let Some(note) = store.fetch_note(id).context("loading note")? else {
        bail!("note {id} not found");
    };
    Ok(MarkdownRenderer::new(config.renderer.flags()).render(&note.body))
}

pub fn delete_note(store: &SqliteStore, args: DeleteArgs) -> Result<()> {
    let title = remove_note(store, &args.id)?;
    println!("Deleted note {} ({title})", args.id);
    Ok(())
}

fn remove_note(store: &SqliteStore, id: &str) -> Result<String> {
    let Some(note) = store.fetch_note(id).context("loading note")? else {
        bail!("note {id} not found");
    };
    store
        .delete(id)
        .with_context(|| format!("deleting note {id}"))?;
    Ok(note.title().to_string())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn format_timestamp(millis: i64) -> String {
    datetime_from_millis(millis)
        .format(&Rfc3339)
        .unwrap_or_else(|_| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, DEFAULT_PLACEHOLDER_BODY};
    use crate::sync::ManualClock;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    #[test]
    fn cli_list_shows_newest_first_with_limit() -> TestResult {
        let (_temp, _config, store) = setup_store()?;
        let clock = ManualClock::new(1_700_000_000_000);
        create_note(&store, "# Older\nbody".into(), "", &clock)?;
        clock.advance(std::time::Duration::from_secs(60));
        let newer = create_note(&store, "# Newer".into(), "", &clock)?;

        let output = format_note_list(&store.fetch_all()?, None);
        let newer_at = output.find("Newer").expect("newer listed");
        let older_at = output.find("Older").expect("older listed");
        assert!(newer_at < older_at);
        assert!(output.contains("updated 2023-11-14T22:14:20Z"), "{output}");

        let limited = format_note_list(&store.fetch_all()?, Some(1));
        assert!(limited.starts_with(&newer));
        assert!(!limited.contains("Older"));
        Ok(())
    }

    #[test]
    fn cli_new_with_blank_body_uses_placeholder() -> TestResult {
        let (_temp, _config, store) = setup_store()?;
        let id = create_note(&store, "   \n".into(), DEFAULT_PLACEHOLDER_BODY, &SystemClock)?;
        let note = store.fetch_note(&id)?.expect("note present");
        assert_eq!(note.body, DEFAULT_PLACEHOLDER_BODY);
        assert_eq!(note.created_at, note.updated_at);
        Ok(())
    }

    #[test]
    fn cli_render_uses_configured_flags() -> TestResult {
        let (_temp, mut config, store) = setup_store()?;
        let id = create_note(&store, "~~old~~ new".into(), "", &SystemClock)?;

        let html = render_html(&config, &store, &id)?;
        assert!(html.contains("<del>old</del>"), "{html}");

        config.renderer.strikethrough = false;
        let html = render_html(&config, &store, &id)?;
        assert!(!html.contains("<del>"), "{html}");
        Ok(())
    }

    #[test]
    fn cli_render_and_delete_reject_unknown_ids() -> TestResult {
        let (_temp, config, store) = setup_store()?;
        let err = render_html(&config, &store, "missing").unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(remove_note(&store, "missing").is_err());
        Ok(())
    }

    #[test]
    fn cli_delete_removes_note() -> TestResult {
        let (_temp, _config, store) = setup_store()?;
        let id = create_note(&store, "## Shopping\n- milk".into(), "", &SystemClock)?;
        assert_eq!(remove_note(&store, &id)?, "Shopping");
        assert!(store.fetch_note(&id)?.is_none());
        Ok(())
    }

    fn setup_store() -> TestResult<(TempDir, AppConfig, SqliteStore)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let paths = ConfigPaths::under(temp.path());
        let mut config = AppConfig::default();
        config.store.database_path = paths.database_path.clone();
        let store = SqliteStore::open(&config.store)?;
        Ok((temp, config, store))
    }
}
