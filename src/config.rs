//! Persistent settings model and file-backed manager.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const URL_ENV: &str = "REDMINE_URL";
pub const API_KEY_ENV: &str = "REDMINE_API_KEY";

/// Default rounding step in minutes.
fn default_rounding_interval() -> u32 {
    15
}

/// Default issue cache stale time in seconds.
fn default_cache_stale_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Settings persisted on disk: Redmine connection plus the timer policy flags.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub redmine_url: String,
    /// Never written back; the key lives in the keyring (see `secrets`).
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_true")]
    pub auto_pause_on_switch: bool,
    pub round_to_nearest_interval: bool,
    #[serde(default = "default_rounding_interval")]
    pub rounding_interval: u32,
    #[serde(default = "default_cache_stale_secs")]
    pub cache_stale_secs: u64,
    pub default_activity_id: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redmine_url: String::new(),
            api_key: String::new(),
            auto_pause_on_switch: true,
            round_to_nearest_interval: false,
            rounding_interval: default_rounding_interval(),
            cache_stale_secs: default_cache_stale_secs(),
            default_activity_id: None,
        }
    }
}

impl Config {
    /// Clamps values a hand-edited file may have broken.
    pub fn normalized(mut self) -> Self {
        self.redmine_url = self.redmine_url.trim().trim_end_matches('/').to_string();
        self.api_key = self.api_key.trim().to_string();
        self.rounding_interval = self.rounding_interval.clamp(1, 60);
        self
    }

    /// Lets `REDMINE_URL` / `REDMINE_API_KEY` override the stored connection.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = non_empty_env(URL_ENV) {
            self.redmine_url = url;
        }
        if let Some(key) = non_empty_env(API_KEY_ENV) {
            self.api_key = key;
        }
        self.normalized()
    }

    pub fn has_remote(&self) -> bool {
        !self.redmine_url.is_empty() && !self.api_key.is_empty()
    }

    pub fn timer_settings(&self) -> TimerSettings {
        TimerSettings {
            auto_pause_on_switch: self.auto_pause_on_switch,
            round_to_nearest_interval: self.round_to_nearest_interval,
            rounding_interval: self.rounding_interval,
        }
    }
}

/// Read-only policy injected into the timer registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerSettings {
    pub auto_pause_on_switch: bool,
    pub round_to_nearest_interval: bool,
    pub rounding_interval: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Config::default().timer_settings()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "redmine-timer", "redmine-timer")
}

/// Platform data directory holding the durable store files.
pub fn default_data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Loads and saves [`Config`] as JSON.
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Manager bound to the platform config path, `None` when no home directory is known.
    pub fn new() -> Option<Self> {
        project_dirs().map(|dirs| Self {
            path: dirs.config_dir().join("config.json"),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads config from disk, falling back to defaults on read/parse errors.
    pub fn load(&self) -> Config {
        if !self.path.exists() {
            return Config::default();
        }
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                log::warn!("Failed to read {}: {}", self.path.display(), err);
                return Config::default();
            }
        };
        match serde_json::from_str::<Config>(&content) {
            Ok(config) => config.normalized(),
            Err(err) => {
                log::warn!("Ignoring invalid config {}: {}", self.path.display(), err);
                Config::default()
            }
        }
    }

    /// Persists config to disk, creating parent directories when needed.
    pub fn save(&self, config: &Config) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}
