//! Subcommands and the configuration lookup they share.

pub mod config;
pub mod parse;
pub mod templates;

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use invex_core::InvexConfig;

/// `<config dir>/invex/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invex")
        .join("config.json")
}

/// Load the explicit config file, else the default one if present, else defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<InvexConfig> {
    if let Some(path) = config_path {
        return InvexConfig::from_file(Path::new(path))
            .with_context(|| format!("Failed to load config from {path}"));
    }

    let default_path = default_config_path();
    if default_path.exists() {
        debug!("Using config file {}", default_path.display());
        return InvexConfig::from_file(&default_path)
            .with_context(|| format!("Failed to load config from {}", default_path.display()));
    }

    Ok(InvexConfig::default())
}
