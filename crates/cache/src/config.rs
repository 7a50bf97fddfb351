//! Cache configuration
//!
//! Sizes are expressed in megabytes so the struct maps directly onto the
//! `[cache]` table of the reader's TOML configuration file. Environment
//! variables override whatever was loaded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`CacheConfig::ram_cache_mb`]
pub const ENV_RAM_CACHE_MB: &str = "DUALREAD_RAM_CACHE_MB";
/// Environment variable overriding [`CacheConfig::disk_cache_mb`]
pub const ENV_DISK_CACHE_MB: &str = "DUALREAD_DISK_CACHE_MB";
/// Environment variable enabling the disk tier at the given directory
pub const ENV_CACHE_DIR: &str = "DUALREAD_CACHE_DIR";

/// Configuration for the render caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// RAM cache budget in megabytes
    pub ram_cache_mb: usize,
    /// Disk tier budget in megabytes
    pub disk_cache_mb: usize,
    /// Disk tier location; the tier is disabled when unset
    pub disk_cache_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ram_cache_mb: 256, disk_cache_mb: 1024, disk_cache_dir: None }
    }
}

impl CacheConfig {
    pub fn with_ram_mb(mut self, mb: usize) -> Self {
        self.ram_cache_mb = mb;
        self
    }

    pub fn with_disk_mb(mut self, mb: usize) -> Self {
        self.disk_cache_mb = mb;
        self
    }

    /// Enable the disk tier at `path`.
    pub fn with_disk_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.disk_cache_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enable the disk tier at the platform cache directory.
    pub fn with_default_disk_dir(self) -> Self {
        self.with_disk_dir(Self::default_cache_dir())
    }

    /// Returns the default disk tier directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/dualread/pages
    /// - Linux: ~/.cache/dualread/pages
    /// - Windows: %LOCALAPPDATA%\dualread\pages
    pub fn default_cache_dir() -> PathBuf {
        match dirs::cache_dir() {
            Some(cache_dir) => cache_dir.join("dualread").join("pages"),
            None => PathBuf::from("cache/pages"),
        }
    }

    pub fn ram_cache_bytes(&self) -> usize {
        self.ram_cache_mb * 1024 * 1024
    }

    pub fn disk_cache_bytes(&self) -> usize {
        self.disk_cache_mb * 1024 * 1024
    }

    /// Apply `DUALREAD_*` environment overrides.
    ///
    /// # Errors
    /// Returns an error naming the variable if a size is not a number.
    pub fn apply_env(&mut self) -> Result<(), CacheConfigError> {
        if let Some(mb) = parse_env_mb(ENV_RAM_CACHE_MB)? {
            self.ram_cache_mb = mb;
        }
        if let Some(mb) = parse_env_mb(ENV_DISK_CACHE_MB)? {
            self.disk_cache_mb = mb;
        }
        if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
            self.disk_cache_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, CacheConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }
}

fn parse_env_mb(key: &str) -> Result<Option<usize>, CacheConfigError> {
    match std::env::var(key) {
        Ok(value) => {
            let parsed = value.trim().parse::<usize>();
            match parsed {
                Ok(mb) => Ok(Some(mb)),
                Err(_) => Err(CacheConfigError::InvalidValue { key: key.to_string(), value }),
            }
        }
        Err(_) => Ok(None),
    }
}

/// Errors raised while reading cache configuration.
#[derive(Debug, thiserror::Error)]
pub enum CacheConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.ram_cache_bytes(), 256 * 1024 * 1024);
        assert_eq!(config.disk_cache_bytes(), 1024 * 1024 * 1024);
        assert!(config.disk_cache_dir.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_ram_mb(512)
            .with_disk_mb(2048)
            .with_disk_dir("/custom/path");

        assert_eq!(config.ram_cache_mb, 512);
        assert_eq!(config.disk_cache_mb, 2048);
        assert_eq!(config.disk_cache_dir, Some(PathBuf::from("/custom/path")));
    }

    #[test]
    fn test_default_disk_dir_is_namespaced() {
        let config = CacheConfig::default().with_default_disk_dir();
        let dir = config.disk_cache_dir.unwrap();
        assert!(dir.ends_with("dualread/pages") || dir.ends_with("cache/pages"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&[ENV_RAM_CACHE_MB, ENV_DISK_CACHE_MB, ENV_CACHE_DIR]);

        env::set_var(ENV_RAM_CACHE_MB, "128");
        env::set_var(ENV_DISK_CACHE_MB, "512");
        env::set_var(ENV_CACHE_DIR, "/tmp/test-cache");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.ram_cache_mb, 128);
        assert_eq!(config.disk_cache_mb, 512);
        assert_eq!(config.disk_cache_dir, Some(PathBuf::from("/tmp/test-cache")));
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&[ENV_RAM_CACHE_MB, ENV_DISK_CACHE_MB, ENV_CACHE_DIR]);

        env::remove_var(ENV_DISK_CACHE_MB);
        env::remove_var(ENV_CACHE_DIR);
        env::set_var(ENV_RAM_CACHE_MB, "64");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.ram_cache_mb, 64);
        assert_eq!(config.disk_cache_mb, 1024);
        assert!(config.disk_cache_dir.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&[ENV_RAM_CACHE_MB]);

        env::set_var(ENV_RAM_CACHE_MB, "not_a_number");
        let err = CacheConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(ENV_RAM_CACHE_MB));
    }

    // Saves and restores environment variables around a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars =
                var_names.iter().map(|name| (name.to_string(), env::var(name).ok())).collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }
}
