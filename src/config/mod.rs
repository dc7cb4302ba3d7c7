//! Configuration module
//!
//! Handles loading and validating settings from YAML files and environment variables.

mod settings;

pub use settings::*;

use std::path::PathBuf;
use tracing::info;

const SETTINGS_ENV: &str = "RAG_ORCH_SETTINGS_PATH";

/// Candidate settings locations, in lookup order
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var(SETTINGS_ENV) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from("settings.yml"));
    paths.push(PathBuf::from("config/settings.yml"));
    paths.push(PathBuf::from("/etc/rag-orchestrator/settings.yml"));
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("rag-orchestrator/settings.yml"));
    }
    paths
}

/// Load settings from the first existing candidate path, or defaults.
///
/// Environment overrides are applied last and the result is validated.
pub fn load() -> anyhow::Result<Settings> {
    let mut settings = match candidate_paths().into_iter().find(|p| p.exists()) {
        Some(path) => {
            info!("Loading settings from: {}", path.display());
            Settings::from_file(&path)?
        }
        None => {
            info!("No settings file found, using defaults");
            Settings::default()
        }
    };
    settings.merge_env();
    settings.validate()?;
    Ok(settings)
}
