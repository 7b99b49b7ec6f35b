//! Configuration file location for the CLI

use anyhow::Result;
use monitor_lib::MonitorConfig;
use std::path::{Path, PathBuf};

/// Get the default configuration file path
pub fn default_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".config").join("fedmon").join("config.toml"))
}

/// Load the monitor configuration from `path`, or from the default location
pub fn load(path: Option<&Path>) -> Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::load(Some(path)),
        None => MonitorConfig::load(default_path().as_deref()),
    }
}
