//! Reader configuration
//!
//! Layers, lowest precedence first: built-in defaults, the TOML file, then
//! `DUALREAD_*` environment variables. Every table is optional, so a file
//! containing only
//!
//! ```toml
//! [cache]
//! ram_cache_mb = 512
//! ```
//!
//! is valid.

use directories::ProjectDirs;
use dualread_cache::{CacheConfig, CacheConfigError};
use dualread_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding [`SchedulerConfig::workers`]
pub const ENV_WORKERS: &str = "DUALREAD_WORKERS";
/// Environment variable overriding [`AnnotationConfig::debounce_ms`]
pub const ENV_DEBOUNCE_MS: &str = "DUALREAD_DEBOUNCE_MS";
/// Environment variable overriding [`ReaderConfig::data_dir`]
pub const ENV_DATA_DIR: &str = "DUALREAD_DATA_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheConfigError),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("unable to resolve local data directory")]
    NoDataDirectory,
}

/// Annotation persistence timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Quiet period after the last stroke before records are written
    pub debounce_ms: u64,
    /// Longest a change may wait while strokes keep coming
    pub max_debounce_ms: u64,
    /// Consecutive failed writes before the session warns
    pub warn_after_failures: u32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self { debounce_ms: 750, max_debounce_ms: 5_000, warn_after_failures: 3 }
    }
}

/// Everything a [`ReaderSession`](crate::ReaderSession) is configured by
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub annotations: AnnotationConfig,
    /// Root of the per-document records; platform data dir when unset
    pub data_dir: Option<PathBuf>,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "Dualread", "dualread")
}

impl ReaderConfig {
    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config = Self::from_toml_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// `<config_dir>/config.toml` for the current platform
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Defaults, then `path` (or the default file if it exists), then the
    /// environment
    ///
    /// An explicitly given file must exist; the default one may not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `DUALREAD_*` environment overrides
    ///
    /// # Errors
    /// An error naming the variable when a number does not parse.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.cache.apply_env()?;
        if let Some(workers) = parse_env(ENV_WORKERS)? {
            self.scheduler.workers = workers;
        }
        if let Some(debounce) = parse_env(ENV_DEBOUNCE_MS)? {
            self.annotations.debounce_ms = debounce;
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Where per-document records live
    pub fn resolved_data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_local_dir().join("documents"))
            .ok_or(ConfigError::NoDataDirectory)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::InvalidValue { key: key.to_string(), value }),
        },
        Err(_) => Ok(None),
    }
}
