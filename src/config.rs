use crate::progress::{ProgressEndpoint, ReconnectPolicy, MAX_RECONNECT_ATTEMPTS};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_JITTER: f64 = 0.2;

const ENV_API_URL: &str = "CONVERTER_API_URL";
const ENV_OUTPUT_DIR: &str = "CONVERTER_OUTPUT_DIR";
const ENV_REQUEST_TIMEOUT: &str = "CONVERTER_REQUEST_TIMEOUT_SECS";
const ENV_WS_MAX_ATTEMPTS: &str = "CONVERTER_WS_MAX_ATTEMPTS";
const ENV_WS_BASE_DELAY: &str = "CONVERTER_WS_BASE_DELAY_MS";
const ENV_WS_MAX_DELAY: &str = "CONVERTER_WS_MAX_DELAY_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid reconnect settings: {0}")]
    InvalidReconnect(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub output_dir: Option<PathBuf>,
    /// `None` keeps the transport's default behavior
    pub request_timeout_secs: Option<u64>,
    pub reconnect: ReconnectSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            output_dir: None,
            request_timeout_secs: None,
            reconnect: ReconnectSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_attempts)
            .with_delays(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_jitter(self.jitter)
    }
}

impl ClientConfig {
    /// Read `CONVERTER_*` variables; `.env` loading is left to the binary
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ReconnectSettings::default();

        let config = Self {
            api_base_url: lookup(ENV_API_URL)
                .map(|url| normalize_base_url(&url))
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            output_dir: lookup(ENV_OUTPUT_DIR)
                .map(|dir| dir.trim().to_string())
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            request_timeout_secs: parse_var::<u64, _>(&lookup, ENV_REQUEST_TIMEOUT)
                .filter(|secs| *secs > 0),
            reconnect: ReconnectSettings {
                max_attempts: parse_var(&lookup, ENV_WS_MAX_ATTEMPTS)
                    .unwrap_or(defaults.max_attempts),
                base_delay_ms: parse_var(&lookup, ENV_WS_BASE_DELAY)
                    .unwrap_or(defaults.base_delay_ms),
                max_delay_ms: parse_var(&lookup, ENV_WS_MAX_DELAY)
                    .unwrap_or(defaults.max_delay_ms),
                jitter: defaults.jitter,
            },
        };

        tracing::info!(
            "Client config loaded: api={}, reconnect_attempts={}",
            config.api_base_url,
            config.reconnect.max_attempts
        );
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.api_base_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.api_base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.api_base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if self.reconnect.max_delay_ms == 0 {
            return Err(ConfigError::InvalidReconnect(
                "max_delay_ms must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::InvalidReconnect(format!(
                "jitter {} outside [0, 1)",
                self.reconnect.jitter
            )));
        }

        Ok(())
    }

    pub fn progress_endpoint(&self) -> Result<ProgressEndpoint, ConfigError> {
        ProgressEndpoint::from_api_base(&self.api_base_url)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Resolve a server-relative download path against the API base
    pub fn absolute_url(&self, url: &str) -> String {
        let trimmed = url.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return trimmed.to_string();
        }
        format!("{}/{}", self.api_base_url, trimmed.trim_start_matches('/'))
    }
}

pub fn normalize_base_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_API_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}='{}', using default", key, raw);
            None
        }
    }
}
