//! Configuration module for MultiSearch-RS
//!
//! Handles loading and validating settings from YAML files and environment variables.
//! Settings are passed explicitly to whoever needs them; there is no global instance.

mod settings;

pub use settings::*;

use anyhow::Result;
use std::path::PathBuf;

/// Environment variable naming an explicit settings file
pub const SETTINGS_PATH_VAR: &str = "MULTISEARCH_SETTINGS_PATH";

/// Default locations searched for settings.yml, in order
pub fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("settings.yml"),
        PathBuf::from("config/settings.yml"),
        PathBuf::from("/etc/multisearch/settings.yml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("multisearch-rs/settings.yml"));
    }
    paths
}

/// Load settings from the first file found, or use defaults
///
/// Environment overrides are applied and the result is validated. The path
/// the settings came from is returned alongside them.
pub fn load() -> Result<(Settings, Option<PathBuf>)> {
    let explicit = std::env::var(SETTINGS_PATH_VAR).ok().map(PathBuf::from);

    let found = explicit
        .into_iter()
        .chain(default_paths())
        .find(|path| path.exists());

    let mut settings = match &found {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    settings.merge_env();
    settings.validate()?;
    Ok((settings, found))
}
