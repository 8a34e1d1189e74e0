pub mod app;
pub mod cli;
pub mod config;
pub mod highlight;
pub mod render;
pub mod store;
pub mod sync;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
