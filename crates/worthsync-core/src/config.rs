//! Client configuration.
//!
//! Settings are read from `~/.config/worthsync/config.json` (any missing
//! field falls back to its default) and then overridden from the
//! environment, so a `.env` file loaded by the binary can point the client at
//! another backend without editing the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SyncError;
use crate::fetch::options::{
    FetchOptions, DEFAULT_DEDUPING_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_RETRY_BACKOFF_MS, DEFAULT_RETRY_COUNT,
};
use crate::realtime::machine::DEFAULT_RECONNECT_DELAY_MS;
use crate::realtime::transport;

/// Application name used for the config directory
const APP_NAME: &str = "worthsync";

const CONFIG_FILE: &str = "config.json";

const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000";

/// Port the backend listens on during local development.
const DEFAULT_DEV_BACKEND_PORT: u16 = 8000;

pub const ENV_ORIGIN: &str = "WORTHSYNC_ORIGIN";
pub const ENV_RECONNECT_DELAY_MS: &str = "WORTHSYNC_RECONNECT_DELAY_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "WORTHSYNC_REQUEST_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Page origin. REST calls go to `<origin>/api/...`.
    pub origin: String,
    pub dev_backend_port: Option<u16>,
    pub deduping_interval_ms: u64,
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            dev_backend_port: Some(DEFAULT_DEV_BACKEND_PORT),
            deduping_interval_ms: DEFAULT_DEDUPING_INTERVAL_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl SyncConfig {
    /// Load the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Override fields from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(value) = lookup(ENV_RECONNECT_DELAY_MS) {
            self.reconnect_delay_ms = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be milliseconds, got {:?}", ENV_RECONNECT_DELAY_MS, value))?;
        }
        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be milliseconds, got {:?}", ENV_REQUEST_TIMEOUT_MS, value))?;
        }
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Url, SyncError> {
        Url::parse(&self.origin)
            .map_err(|e| SyncError::Config(format!("invalid origin {:?}: {}", self.origin, e)))
    }

    /// WebSocket endpoint derived from the origin.
    pub fn push_url(&self) -> Result<Url, SyncError> {
        transport::push_url(&self.origin_url()?, self.dev_backend_port)
    }

    /// Default fetch policy for every resource.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::default()
            .with_deduping_interval(Duration::from_millis(self.deduping_interval_ms))
            .with_retry_count(self.retry_count)
            .with_retry_backoff(Duration::from_millis(self.retry_backoff_ms))
            .with_timeout(self.request_timeout())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(5_000));
        assert_eq!(config.fetch_options(), FetchOptions::default());
        assert_eq!(config.push_url().unwrap().as_str(), "ws://127.0.0.1:8000/api/ws");
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"origin": "https://money.example.com", "retry_count": 0}"#)
                .unwrap();
        assert_eq!(config.origin, "https://money.example.com");
        assert_eq!(config.retry_count, 0);
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(config.push_url().unwrap().as_str(), "wss://money.example.com/api/ws");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SyncConfig::default();
        config
            .apply_env(env(&[
                (ENV_ORIGIN, "http://localhost:3001"),
                (ENV_RECONNECT_DELAY_MS, "250"),
                (ENV_REQUEST_TIMEOUT_MS, " 1000 "),
            ]))
            .unwrap();

        assert_eq!(config.origin, "http://localhost:3001");
        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(config.fetch_options().timeout, Duration::from_millis(1_000));
        // Dev front-end port is swapped for the backend port
        assert_eq!(config.push_url().unwrap().as_str(), "ws://localhost:8000/api/ws");
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let mut config = SyncConfig::default();
        let result = config.apply_env(env(&[(ENV_RECONNECT_DELAY_MS, "soon")]));
        assert!(result.is_err());
        assert_eq!(config.reconnect_delay_ms, DEFAULT_RECONNECT_DELAY_MS);
    }

    #[test]
    fn test_invalid_origin_is_config_error() {
        let config = SyncConfig {
            origin: "not a url".into(),
            ..SyncConfig::default()
        };
        assert!(matches!(config.origin_url(), Err(SyncError::Config(_))));
        assert!(matches!(config.push_url(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("worthsync-config-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE);

        assert_eq!(SyncConfig::load_from(&path).unwrap(), SyncConfig::default());

        let config = SyncConfig {
            origin: "https://money.example.com".into(),
            dev_backend_port: None,
            ..SyncConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(SyncConfig::load_from(&path).unwrap(), config);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
