//! Run configuration loaded from a JSON file

use crate::proxy::probe::{
    ProbeConfig, DEFAULT_HOST_CHECK_URL, DEFAULT_IP_CHECK_URL, DEFAULT_MAX_MS,
    DEFAULT_PING_TIMEOUT_MS, DEFAULT_SPEED_MIN_GOOD_KBPS, DEFAULT_SPEED_TEST_URL,
    DEFAULT_TIMEOUT_SECS,
};
use crate::Result;
use anyhow::{anyhow, Context};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default configuration file name
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Default number of workers
pub const DEFAULT_THREADS: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`thread` must be at least 1")]
    NoThreads,
    #[error("`timeout` must be at least 1 second")]
    ZeroTimeout,
    #[error("`import` must list at least one file")]
    NoImports,
    #[error("`export` must not be empty")]
    EmptyExport,
    #[error("`{key}` is not a valid http(s) URL: {url}")]
    InvalidUrl { key: &'static str, url: String },
}

/// Settings as stored in `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Number of concurrent workers
    #[serde(rename = "thread")]
    pub threads: usize,
    /// HTTP timeout in seconds
    pub timeout: u64,
    /// Host latency threshold in milliseconds
    pub max_ms: u64,
    /// Files to read proxies from
    pub import: Vec<PathBuf>,
    /// File passing proxies are written to
    pub export: PathBuf,
    pub host_check_url: String,
    pub ip_check_url: String,
    pub enable_ping: bool,
    pub ping_timeout_ms: u64,
    pub enable_speed_test: bool,
    pub speed_test_url: String,
    /// Throughput shown as good at or above this (display only)
    pub speed_min_good_kbps: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            timeout: DEFAULT_TIMEOUT_SECS,
            max_ms: DEFAULT_MAX_MS,
            import: vec![PathBuf::from("proxies.txt")],
            export: PathBuf::from("good_proxies.txt"),
            host_check_url: DEFAULT_HOST_CHECK_URL.to_string(),
            ip_check_url: DEFAULT_IP_CHECK_URL.to_string(),
            enable_ping: true,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            enable_speed_test: false,
            speed_test_url: DEFAULT_SPEED_TEST_URL.to_string(),
            speed_min_good_kbps: DEFAULT_SPEED_MIN_GOOD_KBPS,
        }
    }
}

impl Settings {
    /// Write the default configuration to `path` unless a file exists.
    ///
    /// Returns `true` if a new file was created.
    pub fn ensure_file<P: AsRef<Path>>(path: P) -> Result<bool> {
        let path = path.as_ref();
        if path.exists() {
            return Ok(false);
        }

        let content = serde_json::to_string_pretty(&Self::default())?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;
        Ok(true)
    }

    /// Load and validate settings from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Parse settings, filling every missing key from the defaults
    pub fn from_json(content: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(content)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| anyhow!("config root must be a JSON object"))?;

        if let Value::Object(defaults) = serde_json::to_value(Self::default())? {
            for (key, default) in defaults {
                if !object.contains_key(&key) {
                    warn!(%key, %default, "config key missing, using default");
                    object.insert(key, default);
                }
            }
        }

        let settings: Self = serde_json::from_value(value)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.import.is_empty() {
            return Err(ConfigError::NoImports);
        }
        if self.export.as_os_str().is_empty() {
            return Err(ConfigError::EmptyExport);
        }

        check_url("host_check_url", &self.host_check_url)?;
        check_url("ip_check_url", &self.ip_check_url)?;
        if self.enable_speed_test {
            check_url("speed_test_url", &self.speed_test_url)?;
        }
        Ok(())
    }

    /// Immutable probe configuration for a run
    pub fn probe_config(&self) -> ProbeConfig {
        let config = ProbeConfig::new()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_max_ms(self.max_ms)
            .with_host_check_url(self.host_check_url.clone())
            .with_ip_check_url(self.ip_check_url.clone())
            .with_ping(self.enable_ping, Duration::from_millis(self.ping_timeout_ms));

        if self.enable_speed_test {
            config.with_speed_test(self.speed_test_url.clone(), self.speed_min_good_kbps)
        } else {
            ProbeConfig {
                speed_min_good_kbps: self.speed_min_good_kbps,
                ..config
            }
        }
    }
}

fn check_url(key: &'static str, url: &str) -> std::result::Result<(), ConfigError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            key,
            url: url.to_string(),
        }),
    }
}
