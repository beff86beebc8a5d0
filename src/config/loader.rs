//! Configuration loading.
//!
//! Resolution chain: built-in defaults → `.scanr-ai.yaml` (current
//! directory, then `$HOME`) → `SCANR_AI_*` environment variables →
//! provider-specific key variables. Later sources win.

use std::env;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Format, Serialized, Yaml},
    Figment,
};
use tracing::debug;

use super::types::AiConfig;
use crate::types::{Result, ScanError};

/// Name of the reviewer configuration file.
pub const AI_CONFIG_FILE: &str = ".scanr-ai.yaml";

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with the full resolution chain.
    pub fn load() -> Result<AiConfig> {
        let mut figment = Figment::from(Serialized::defaults(AiConfig::default()));

        if let Some(path) = Self::find_config_file() {
            debug!(path = %path.display(), "loading reviewer config");
            figment = figment.merge(Yaml::file(&path));
        }

        let mut config: AiConfig = figment
            .extract()
            .map_err(|e| ScanError::Config(format!("configuration error: {}", e)))?;

        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Load configuration from a specific file only, without environment
    /// overrides.
    pub fn load_from_file(path: &Path) -> Result<AiConfig> {
        Figment::from(Serialized::defaults(AiConfig::default()))
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| ScanError::Config(format!("configuration error: {}", e)))
    }

    /// Locate the config file: current directory first, then `$HOME`.
    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from(AI_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(AI_CONFIG_FILE))
            .filter(|p| p.exists())
    }

    /// Apply environment overrides on top of the file-derived config.
    ///
    /// `SCANR_AI_API_KEY` is applied first; the provider-specific key
    /// variable (e.g. `GEMINI_API_KEY`) wins when the matching provider is
    /// selected.
    pub fn apply_env_overrides(config: &mut AiConfig) {
        if let Ok(provider) = env::var("SCANR_AI_PROVIDER") {
            if !provider.is_empty() {
                config.provider = provider;
            }
        }

        if let Ok(model) = env::var("SCANR_AI_MODEL") {
            if !model.is_empty() {
                config.model = model;
            }
        }

        if let Ok(key) = env::var("SCANR_AI_API_KEY") {
            if !key.is_empty() {
                config.api_key = key;
            }
        }

        let provider_key_var = match config.provider.as_str() {
            "gemini" => Some("GEMINI_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            _ => None,
        };
        if let Some(var) = provider_key_var {
            if let Ok(key) = env::var(var) {
                if !key.is_empty() {
                    config.api_key = key;
                }
            }
        }

        if let Ok(url) = env::var("SCANR_AI_BASE_URL") {
            if !url.is_empty() {
                config.base_url = Some(url);
            }
        }

        if let Ok(raw) = env::var("SCANR_AI_MAX_TOKENS") {
            if let Ok(v) = raw.parse::<u32>() {
                if v > 0 {
                    config.max_tokens = v;
                }
            }
        }

        if let Ok(raw) = env::var("SCANR_AI_TEMPERATURE") {
            if let Ok(v) = raw.parse::<f64>() {
                if (0.0..=1.0).contains(&v) {
                    config.temperature = v;
                }
            }
        }

        if let Ok(raw) = env::var("SCANR_AI_TIMEOUT") {
            if let Some(secs) = parse_duration_secs(&raw) {
                if secs > 0 {
                    config.timeout_secs = secs;
                }
            }
        }

        if let Ok(raw) = env::var("SCANR_AI_MAX_RETRIES") {
            if let Ok(v) = raw.parse::<u32>() {
                config.max_retries = v;
            }
        }

        if let Ok(raw) = env::var("SCANR_AI_RATE_LIMIT_RPM") {
            if let Ok(v) = raw.parse::<u32>() {
                if v > 0 {
                    config.rate_limit.requests_per_minute = v;
                }
            }
        }

        if let Ok(raw) = env::var("SCANR_AI_RATE_LIMIT_BURST") {
            if let Ok(v) = raw.parse::<u32>() {
                if v > 0 {
                    config.rate_limit.burst = v;
                }
            }
        }

        if let Ok(raw) = env::var("SCANR_AI_RATE_LIMIT_WAIT") {
            if let Some(secs) = parse_duration_secs(&raw) {
                if secs > 0 {
                    config.rate_limit.wait_time_secs = secs;
                }
            }
        }
    }
}

/// Parse a duration value from env: either a bare number of seconds or a
/// value with an `s`/`m` suffix ("30s", "2m").
fn parse_duration_secs(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    if let Some(v) = raw.strip_suffix('s') {
        return v.trim().parse::<u64>().ok();
    }
    if let Some(v) = raw.strip_suffix('m') {
        return v.trim().parse::<u64>().ok().map(|m| m * 60);
    }
    None
}
