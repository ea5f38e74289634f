//! Test configuration service with fully controlled behavior.
//!
//! No file I/O and no environment reads: tests construct the exact
//! configuration they need and inject it anywhere a
//! [`ConfigService`] is accepted.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::service::{ConfigService, get_value, set_value};
use crate::Result;
use crate::config::Config;
use crate::error::LoadtraceError;

/// In-memory [`ConfigService`] implementation for tests.
pub struct TestConfigService {
    config: RwLock<Config>,
}

impl TestConfigService {
    /// Service wrapping the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Service with default settings.
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Service with a specific broker URL.
    pub fn with_broker_url(url: &str) -> Self {
        let mut config = Config::default();
        config.broker.url = url.to_string();
        Self::new(config)
    }

    /// Mutate the wrapped configuration in place.
    pub fn update<F: FnOnce(&mut Config)>(&self, f: F) {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        f(&mut config);
    }
}

impl ConfigService for TestConfigService {
    fn get_config(&self) -> Result<Config> {
        Ok(self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn reload(&self) -> Result<()> {
        Ok(())
    }

    fn save_config_to_file(&self, path: &Path) -> Result<()> {
        let rendered = toml::to_string_pretty(&self.get_config()?)
            .map_err(|e| LoadtraceError::config(e.to_string()))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    fn get_config_file_path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("test-config.toml"))
    }

    fn get_config_value(&self, key: &str) -> Result<String> {
        get_value(&self.get_config()?, key)
    }

    fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        let updated = set_value(&self.get_config()?, key, value)?;
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        *config = updated;
        Ok(())
    }
}
