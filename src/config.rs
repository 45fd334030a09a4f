use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::projector::WeekStart;

pub const CONFIG_VERSION: u64 = 1;
pub const APP_DIR: &str = "second-brain";
pub const URL_ENV: &str = "SECOND_BRAIN_URL";
pub const API_KEY_ENV: &str = "SECOND_BRAIN_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory available on this system")]
    NoConfigDir,
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("could not write config: {0}")]
    Write(#[from] std::io::Error),
    #[error("could not serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("backend URL is not set (config file or SECOND_BRAIN_URL)")]
    MissingBackend,
}

fn default_version() -> u64 {
    CONFIG_VERSION
}

fn default_bucket() -> String {
    "note-images".to_string()
}

fn default_export_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default)]
    pub backend_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_bucket")]
    pub image_bucket: String,
    #[serde(default)]
    pub week_start: WeekStart,
    #[serde(default = "default_export_dir")]
    pub export_directory: PathBuf,
    #[serde(default)]
    pub debug_logging: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            backend_url: String::new(),
            api_key: String::new(),
            image_bucket: default_bucket(),
            week_start: WeekStart::default(),
            export_directory: default_export_dir(),
            debug_logging: false,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join("config.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Non-empty environment values replace the backend URL and API key.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.backend_url = url.trim().to_string();
        }
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_key = key.trim().to_string();
        }
    }

    pub fn require_backend(&self) -> Result<&str, ConfigError> {
        let url = self.backend_url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingBackend);
        }
        Ok(url)
    }
}
