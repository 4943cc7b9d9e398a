use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{DEFAULT_TOPICS, FEED_WS_URL, SESSION_PAGE_URL};

/// Default config file path.
pub const CONFIG_PATH: &str = "feed.toml";

/// Environment variable that overrides [`CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "INPLAY_FEED_CONFIG";

/// A config that parsed but cannot drive a session.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} is not configured")]
    Missing { field: &'static str },

    #[error("{field} is not a valid URL: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("feed.topics must name at least one topic")]
    NoTopics,

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Top-level application config deserialized from `feed.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub diary: DiaryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Browser-like header set sent with the token fetch and the socket upgrade.
    /// Entries with an empty value are skipped.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Order in which frames of a single inbound payload are decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrder {
    #[default]
    Arrival,
    /// Last frame first.
    Reverse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_session_url")]
    pub session_url: String,
    #[serde(default = "default_connection_url")]
    pub connection_url: String,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub frame_order: FrameOrder,
}

fn default_session_url() -> String {
    SESSION_PAGE_URL.to_string()
}

fn default_connection_url() -> String {
    FEED_WS_URL.to_string()
}

fn default_topics() -> Vec<String> {
    DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            session_url: default_session_url(),
            connection_url: default_connection_url(),
            topics: default_topics(),
            frame_order: FrameOrder::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiaryConfig {
    /// In-play diary API endpoint.
    pub url: Option<String>,
}

/// Timeouts and retry policy of the outbound HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Total retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry `n` sleeps `backoff_factor_secs * 2^(n-1)`.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor_secs: f64,
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_factor_secs: default_backoff_factor(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Sleep before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let secs = self.backoff_factor_secs.max(0.0) * f64::from(1u32 << exp);
        Duration::from_secs_f64(secs)
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Check everything a session needs before any network traffic happens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url("feed.session_url", &self.feed.session_url)?;
        parse_url("feed.connection_url", &self.feed.connection_url)?;
        if let Some(url) = &self.diary.url {
            parse_url("diary.url", url)?;
        }
        if self.feed.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::NoTopics);
        }
        self.header_map()?;
        Ok(())
    }

    /// Configured headers as a typed map, skipping blank values.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if value.trim().is_empty() {
                continue;
            }
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::Missing { field });
    }
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })
}
