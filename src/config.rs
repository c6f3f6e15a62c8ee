//! Configuration management with YAML support

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub feeds: HashMap<String, FeedConfig>,

    #[serde(default)]
    pub replay: ReplayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Snapshot database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Individual feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub status: Option<String>, // 'active', 'frozen', 'deprecated'

    #[serde(default)]
    pub base_path: Option<String>,
}

/// Log catch-up configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Entries per log catch-up batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/threadline/threadline.db".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_batch_size() -> usize {
    50
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./threadline.yaml (current directory)
    /// 3. ~/.config/threadline/threadline.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "threadline.yaml".to_string(),
            shellexpand::tilde("~/.config/threadline/threadline.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)
                    .with_context(|| format!("Failed to read config {}", search_path))?;
                let config: Config = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config {}", search_path))?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    /// Check if a feed is enabled
    /// Returns false if:
    /// - Feed is explicitly disabled
    /// - Feed status is 'frozen' or 'deprecated'
    pub fn is_feed_enabled(&self, feed_id: &str) -> bool {
        self.feeds.get(feed_id).map_or(true, |f| {
            if !f.enabled {
                return false;
            }
            !matches!(f.status.as_deref(), Some("frozen") | Some("deprecated"))
        })
    }

    /// Get the base path for a feed, if configured
    pub fn feed_path(&self, feed_id: &str) -> Option<PathBuf> {
        self.feeds
            .get(feed_id)
            .and_then(|f| f.base_path.as_ref())
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }

    /// Get feed status
    pub fn feed_status(&self, feed_id: &str) -> Option<&str> {
        self.feeds.get(feed_id).and_then(|f| f.status.as_deref())
    }
}
