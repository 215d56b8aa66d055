// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Snapsort

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, SnapsortError};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Directories watched (non-recursively) for new screenshots
    #[serde(default = "default_monitored_dirs")]
    pub monitored_dirs: Vec<PathBuf>,

    /// Base directory of the organized `<year>/<month>/<category>` tree
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub duplicates: DuplicateConfig,

    /// Web UI settings
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OcrConfig {
    /// Confidence (0-100) below which the next preprocessing step is tried
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    /// Explicit tesseract binary, otherwise looked up on `PATH`
    #[serde(default)]
    pub tesseract_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Requests per minute; the classifier spaces calls `60 / rpm` seconds apart
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DuplicateConfig {
    /// Maximum Hamming distance (bits) still reported as a duplicate
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

// Default value functions
fn default_monitored_dirs() -> Vec<PathBuf> {
    let home = home_dir();
    vec![home.join("Desktop"), home.join("Screenshots"), home.join("Downloads")]
}
fn default_screenshots_dir() -> PathBuf { home_dir().join("Screenshots") }
fn default_db_path() -> PathBuf { home_dir().join(".snapsort").join("screenshots.db") }
fn default_min_confidence() -> f32 { 60.0 }
fn default_max_width() -> u32 { 1920 }
fn default_max_height() -> u32 { 1080 }
fn default_model() -> String { "gemini-1.5-flash".to_string() }
fn default_endpoint() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_rate_limit_rpm() -> u32 { 15 }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_debounce_ms() -> u64 { 500 }
fn default_max_queue() -> usize { 100 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_stop_timeout_ms() -> u64 { 2000 }
fn default_threshold() -> u32 { 5 }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 5000 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitored_dirs: default_monitored_dirs(),
            screenshots_dir: default_screenshots_dir(),
            database: DatabaseConfig::default(),
            ocr: OcrConfig::default(),
            ai: AiConfig::default(),
            watcher: WatcherConfig::default(),
            duplicates: DuplicateConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_width: default_max_width(),
            max_height: default_max_height(),
            tesseract_path: None,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            endpoint: default_endpoint(),
            rate_limit_rpm: default_rate_limit_rpm(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_queue: default_max_queue(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self { threshold: default_threshold() }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl AiConfig {
    /// Minimum spacing between two remote requests
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / f64::from(self.rate_limit_rpm.max(1)))
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| SnapsortError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ai.rate_limit_rpm == 0 {
            return Err(SnapsortError::Config("ai.rate_limit_rpm must be at least 1".to_string()));
        }
        if self.watcher.max_queue == 0 {
            return Err(SnapsortError::Config("watcher.max_queue must be at least 1".to_string()));
        }
        if self.ocr.max_width == 0 || self.ocr.max_height == 0 {
            return Err(SnapsortError::Config("ocr bounds must be non-zero".to_string()));
        }
        Ok(())
    }

    /// API credential for the remote classifier, read from the environment
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.ai.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(SnapsortError::Config(format!(
                "{} environment variable not set; it must hold the Gemini API key",
                self.ai.api_key_env
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval_is_four_seconds() {
        let config = AppConfig::default();
        assert_eq!(config.ai.min_interval(), Duration::from_secs(4));
        assert_eq!(config.watcher.debounce(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "monitored_dirs": ["/tmp/shots"], "duplicates": { "threshold": 3 } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.monitored_dirs, vec![PathBuf::from("/tmp/shots")]);
        assert_eq!(config.duplicates.threshold, 3);
        assert_eq!(config.watcher.max_queue, 100);
        assert_eq!(config.ocr.max_width, 1920);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.web.port = 9000;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.web.port, 9000);
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = AppConfig::default();
        config.ai.rate_limit_rpm = 0;
        assert!(matches!(config.validate(), Err(SnapsortError::Config(_))));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let mut config = AppConfig::default();
        config.ai.api_key_env = "SNAPSORT_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(matches!(config.api_key(), Err(SnapsortError::Config(_))));
    }
}
