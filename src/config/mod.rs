use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::render::RenderFlags;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Marknotes";
const APP_NAME: &str = "marknotes";

pub const CONFIG_ENV: &str = "MARKNOTES_CONFIG";
pub const DATA_ENV: &str = "MARKNOTES_DATA";

pub const DEFAULT_PLACEHOLDER_BODY: &str = "# Type your markdown note's title here";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths);
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths);
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self::rooted(config_dir, config_file, data_root, state_dir))
    }

    /// Lays every directory out under a single root; used by tests and
    /// portable installs.
    pub fn under(root: &Path) -> Self {
        let config_dir = root.join("config");
        let config_file = config_dir.join("config.toml");
        Self::rooted(config_dir, config_file, root.join("data"), root.join("state"))
    }

    fn rooted(config_dir: PathBuf, config_file: PathBuf, data_dir: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            config_dir,
            config_file,
            database_path: data_dir.join("notes.db"),
            data_dir,
            log_dir: state_dir.join("logs"),
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.log_dir, &self.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub renderer: RendererConfig,
    pub layout: LayoutConfig,
    pub store: StoreOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) {
        self.store.resolve(paths);
        if self.layout.list_percent == 0 || self.layout.list_percent >= 100 {
            tracing::warn!(
                list_percent = self.layout.list_percent,
                "list_percent out of range, falling back to 30"
            );
            self.layout.list_percent = LayoutConfig::default().list_percent;
        }
        if self.sync.placeholder_body.trim().is_empty() {
            self.sync.placeholder_body = DEFAULT_PLACEHOLDER_BODY.to_string();
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last keystroke before the buffer is written.
    #[serde(rename = "debounce_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub debounce: Duration,
    /// How often the UI loop drains snapshots and checks the flush deadline.
    #[serde(rename = "tick_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick: Duration,
    /// Body given to freshly created notes.
    pub placeholder_body: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            tick: Duration::from_millis(50),
            placeholder_body: DEFAULT_PLACEHOLDER_BODY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub tables: bool,
    pub simplified_autolink: bool,
    pub strikethrough: bool,
    pub tasklists: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            tables: true,
            simplified_autolink: true,
            strikethrough: true,
            tasklists: true,
        }
    }
}

impl RendererConfig {
    pub fn flags(&self) -> RenderFlags {
        let mut flags = RenderFlags::empty();
        flags.set(RenderFlags::TABLES, self.tables);
        flags.set(RenderFlags::SIMPLIFIED_AUTOLINK, self.simplified_autolink);
        flags.set(RenderFlags::STRIKETHROUGH, self.strikethrough);
        flags.set(RenderFlags::TASKLISTS, self.tasklists);
        flags
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Width of the note list as a percentage of the terminal.
    pub list_percent: u16,
    /// Open the editor on the preview tab instead of the write tab.
    pub preview_on_open: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            list_percent: 30,
            preview_on_open: false,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    /// Document collection the notes live in.
    pub collection: String,
    #[serde(rename = "busy_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            collection: "notes".to_string(),
            busy_timeout: Duration::from_millis(2_000),
        }
    }
}

impl StoreOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
    }
}
