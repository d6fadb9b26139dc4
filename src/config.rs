/// Runtime configuration for the image pipeline and the offline cache
///
/// Stored as JSON. Every field has a default so a partial file (or no file
/// at all) is a valid configuration.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Application directory name under the platform config/data dirs
const APP_DIR: &str = "studio-delivery";

/// Full configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub loader: LoaderConfig,
    pub cache: CacheConfig,
}

/// Image Delivery Pipeline options
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    /// CSS-style margin around the viewport (1 to 4 lengths, px or %)
    pub root_margin: String,
    /// Minimum visible fraction before an element counts as intersecting
    pub threshold: f64,
    /// Background color shown while an image is pending
    pub placeholder_color: String,
    /// Retries after the first failed attempt
    pub retry_limit: u32,
    /// Fixed delay between attempts
    pub retry_delay_ms: u64,
    /// Emit a warning when an image falls back to the placeholder
    pub log_errors: bool,
    /// Placeholder service base; `?text=<alt>` is appended
    pub placeholder_service: String,
    /// Upper bound on the format check
    pub detect_timeout_ms: u64,
    /// Delay between a pair settling and its readiness event
    pub pair_ready_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root_margin: "0px 0px 200px 0px".to_string(),
            threshold: 0.01,
            placeholder_color: "#f5f5f5".to_string(),
            retry_limit: 2,
            retry_delay_ms: 3000,
            log_errors: true,
            placeholder_service: "https://placehold.co/600x400/f178b6/ffffff".to_string(),
            detect_timeout_ms: 1000,
            pair_ready_delay_ms: 100,
        }
    }
}

impl LoaderConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn pair_ready_delay(&self) -> Duration {
        Duration::from_millis(self.pair_ready_delay_ms)
    }
}

/// Offline Asset Cache options
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Generation tag baked into every partition name
    pub generation: String,
    /// Path prefix that classifies a request as API traffic
    pub api_prefix: String,
    /// Root-relative paths pre-cached at install time
    pub static_assets: Vec<String>,
    /// Background sync tag that triggers a replay of queued requests
    pub sync_tag: String,
    pub notification: NotificationConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generation: "v1".to_string(),
            api_prefix: "/api/ai/".to_string(),
            static_assets: [
                "/",
                "/index.html",
                "/css/ai-features.css",
                "/css/ai-enhancements.css",
                "/js/ai-features-loader.js",
                "/js/ai-enhancements.js",
                "/images/ai-avatar.jpg",
                "/images/ai-icons.svg",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sync_tag: "sync-api-requests".to_string(),
            notification: NotificationConfig::default(),
        }
    }
}

impl CacheConfig {
    /// The three partition names of the current generation
    pub fn partitions(&self) -> PartitionNames {
        PartitionNames::for_generation(&self.generation)
    }
}

/// Names of the static, dynamic and api partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    pub static_name: String,
    pub dynamic_name: String,
    pub api_name: String,
}

impl PartitionNames {
    pub fn for_generation(generation: &str) -> Self {
        Self {
            static_name: format!("static-cache-{generation}"),
            dynamic_name: format!("dynamic-cache-{generation}"),
            api_name: format!("api-cache-{generation}"),
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.static_name, &self.dynamic_name, &self.api_name]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all().contains(&name)
    }
}

/// Push notification presentation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// SVG sprite holding the `#view` and `#close` action icons
    pub action_icons: String,
    /// In-page anchor opened by the view-details action
    pub click_target: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "AI Assistant Update".to_string(),
            icon: "/images/ai-avatar.jpg".to_string(),
            badge: "/images/ai-badge.png".to_string(),
            vibrate: vec![100, 50, 100],
            action_icons: "/images/ai-icons.svg".to_string(),
            click_target: "/#ai-consultant".to_string(),
        }
    }
}

impl Config {
    /// Parse from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Convert to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a config file; a missing or malformed file is an error
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("⚙️  Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Write the config, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = self.to_json().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(write_err)
    }

    /// Default config location
    /// - Linux: ~/.config/studio-delivery/config.json
    /// - macOS: ~/Library/Application Support/studio-delivery/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or(ConfigError::NoDirectory("config"))?;
        path.push(APP_DIR);
        path.push("config.json");
        Ok(path)
    }
}

/// Default location of the persistent cache database
pub fn default_cache_db_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .ok_or(ConfigError::NoDirectory("data"))?;
    path.push(APP_DIR);
    path.push("offline-cache.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_site_behaviour() {
        let config = Config::default();
        assert_eq!(config.loader.retry_limit, 2);
        assert_eq!(config.loader.retry_delay(), Duration::from_secs(3));
        assert_eq!(config.cache.api_prefix, "/api/ai/");
        assert_eq!(config.cache.static_assets.len(), 8);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = Config::from_json(r#"{"loader": {"retry_limit": 5}}"#).unwrap();
        assert_eq!(config.loader.retry_limit, 5);
        assert_eq!(config.loader.threshold, 0.01);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_partition_names_follow_generation() {
        let names = PartitionNames::for_generation("v2");
        assert_eq!(names.static_name, "static-cache-v2");
        assert_eq!(names.dynamic_name, "dynamic-cache-v2");
        assert_eq!(names.api_name, "api-cache-v2");
        assert!(names.contains("api-cache-v2"));
        assert!(!names.contains("api-cache-v1"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.cache.generation = "v7".to_string();
        config.save(&path).unwrap();

        let restored = Config::load(&path).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
        assert!(Config::load(&dir.path().join("absent.json")).is_err());
    }
}
