//! Reviewer configuration types.
//!
//! API keys are handled carefully: the key is never serialized back out and
//! is redacted in debug output. Providers convert it to a `SecretString`
//! for runtime protection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{Result, ScanError};

/// Configuration for the AI reviewer backend.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Provider type: "gemini", "openai", "anthropic".
    pub provider: String,
    /// Model name (provider-specific).
    pub model: String,
    /// API key. Never serialized to output.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Override for the provider endpoint (self-hosted or proxy setups).
    pub base_url: Option<String>,
    /// Maximum tokens the model may generate per review.
    pub max_tokens: u32,
    /// Sampling temperature, 0.0..=1.0.
    pub temperature: f64,
    /// Per-request timeout in seconds.
    #[serde(rename = "timeout")]
    pub timeout_secs: u64,
    /// Transport-level retry budget per file.
    pub max_retries: u32,
    /// Provider rate limiting.
    pub rate_limit: RateLimitConfig,
}

impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.5-pro".to_string(),
            api_key: String::new(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.1,
            timeout_secs: 60,
            max_retries: 3,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AiConfig {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate values are within acceptable ranges. Called before any
    /// reviewer is constructed; a bad config is fatal at start.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ScanError::Config("API key is required".to_string()));
        }
        if self.model.is_empty() {
            return Err(ScanError::Config("model name is required".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(ScanError::Config("max_tokens must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ScanError::Config(format!(
                "temperature must be between 0.0 and 1.0, got {}",
                self.temperature
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ScanError::Config("timeout must be positive".to_string()));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(ScanError::Config(
                "rate_limit.requests_per_minute must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Token-bucket rate limit settings for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    /// Bucket capacity. Zero means "derive from rpm" (rpm / 10, min 1).
    pub burst: u32,
    /// Advisory wait used as the back-off unit, in seconds.
    #[serde(rename = "wait_time")]
    pub wait_time_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            burst: 2,
            wait_time_secs: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AiConfig {
        AiConfig {
            api_key: "test-key".to_string(),
            ..AiConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid_once_keyed() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_api_key_rejected() {
        let config = AiConfig::default();
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let config = AiConfig {
            temperature: 1.5,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = AiConfig {
            temperature: -0.1,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_numeric_parameters_rejected() {
        let config = AiConfig {
            max_tokens: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = AiConfig {
            timeout_secs: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = AiConfig {
            rate_limit: RateLimitConfig {
                requests_per_minute: 0,
                ..RateLimitConfig::default()
            },
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = valid_config();
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("test-key"));
    }
}
