//! Configuration loader for Switchboard.
//!
//! Reads a TOML file into [`AppConfig`], falling back to defaults when the
//! file is missing or malformed, then layers provider API keys from the
//! environment on top.

use std::path::Path;

use switchboard_types::config::AppConfig;

pub const DASHSCOPE_API_KEY_ENV: &str = "DASHSCOPE_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Load configuration from `path` and apply environment overrides.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: a warning, then defaults.
pub async fn load_config(path: &Path) -> AppConfig {
    let mut config = read_config_file(path).await;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

async fn read_config_file(path: &Path) -> AppConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return AppConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return AppConfig::default();
        }
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            AppConfig::default()
        }
    }
}

/// Provider API keys from the environment win over the file. Blank values
/// are ignored.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_blank = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_blank(DASHSCOPE_API_KEY_ENV) {
        config.ai.dashscope.api_key = Some(key);
    }
    if let Some(key) = non_blank(OPENAI_API_KEY_ENV) {
        config.ai.openai.api_key = Some(key);
    }
}
