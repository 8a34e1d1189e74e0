use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::store::SqliteStore;
use crate::sync::SystemClock;

pub mod commands;

use self::commands::{DeleteArgs, ListArgs, NewArgs, RenderArgs};

const LOG_FILE: &str = "marknotes.log";

#[derive(Parser, Debug)]
#[command(
    name = "marknotes",
    version,
    about = "Markdown notes in the terminal with autosave and live preview"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over MARKNOTES_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over MARKNOTES_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error) or a filter directive
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Create a note from the command line
    New(NewArgs),
    /// Print notes, most recently updated first
    List(ListArgs),
    /// Render a note's markdown to HTML
    Render(RenderArgs),
    /// Delete a note without confirmation
    Delete(DeleteArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let command = cli.command.unwrap_or(Commands::Tui);

    // the TUI owns the terminal, so its logs go to a file
    let log_file = matches!(command, Commands::Tui).then(|| loader.paths().log_dir.join(LOG_FILE));
    init_tracing(&cli.log_level, log_file.as_deref())
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let config = Arc::new(loader.load_or_init()?);
    let store = Arc::new(SqliteStore::open(&config.store)?);

    match command {
        Commands::Tui => {
            let mut app = App::new(config.clone(), store, Arc::new(SystemClock))?;
            commands::run_tui(&mut app)
        }
        Commands::New(args) => commands::new_note(&config, &store, args),
        Commands::List(args) => commands::list_notes(&store, args),
        Commands::Render(args) => commands::render_note(&config, &store, args),
        Commands::Delete(args) => commands::delete_note(&store, args),
    }
}

fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            None => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok(())
    })
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bare_invocation_defaults_to_tui() {
        let cli = Cli::parse_from(["marknotes"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["marknotes", "render", "abc", "--data-dir", "/tmp/notes"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/notes")));
        assert_matches!(cli.command, Some(Commands::Render(args)) if args.id == "abc");
    }
}
