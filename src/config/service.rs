//! Configuration service system for dependency injection and test
//! isolation.
//!
//! This module provides a clean abstraction for configuration
//! management that enables dependency injection and complete test
//! isolation without global state resets.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use config::{Config as ConfigCrate, Environment, File};
use log::debug;

use crate::config::{Config, validator};
use crate::error::LoadtraceError;
use crate::Result;

/// Configuration service trait for dependency injection.
///
/// Abstracts configuration loading and persistence so commands accept
/// either the production implementation or a test double.
pub trait ConfigService: Send + Sync {
    /// Get the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if loading or validation fails.
    fn get_config(&self) -> Result<Config>;

    /// Force a reload from all sources, discarding cached values.
    fn reload(&self) -> Result<()>;

    /// Save the current configuration to a specific file path.
    fn save_config_to_file(&self, path: &Path) -> Result<()>;

    /// Path of the user configuration file.
    fn get_config_file_path(&self) -> Result<PathBuf>;

    /// Read one value by dot-separated key path (e.g. `broker.url`).
    fn get_config_value(&self, key: &str) -> Result<String>;

    /// Set one value by dot-separated key path and persist it.
    fn set_config_value(&self, key: &str, value: &str) -> Result<()>;
}

/// Navigate a dot-separated path inside a TOML value.
fn lookup<'a>(value: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    let mut current = value;
    for segment in key.split('.') {
        current = current.as_table()?.get(segment)?;
    }
    Some(current)
}

fn render_scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Shared get/set implementation over the serialized form.
pub(crate) fn get_value(config: &Config, key: &str) -> Result<String> {
    let value = toml::Value::try_from(config)
        .map_err(|e| LoadtraceError::config(e.to_string()))?;
    lookup(&value, key)
        .map(render_scalar)
        .ok_or_else(|| LoadtraceError::config(format!("unknown configuration key: {key}")))
}

pub(crate) fn set_value(config: &Config, key: &str, raw: &str) -> Result<Config> {
    let mut value = toml::Value::try_from(config)
        .map_err(|e| LoadtraceError::config(e.to_string()))?;
    let (parent_path, leaf) = match key.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, key),
    };
    let target = match parent_path {
        Some(parent) => {
            let mut current = &mut value;
            for segment in parent.split('.') {
                current = current
                    .as_table_mut()
                    .and_then(|t| t.get_mut(segment))
                    .ok_or_else(|| {
                        LoadtraceError::config(format!("unknown configuration key: {key}"))
                    })?;
            }
            current
        }
        None => &mut value,
    };
    let table = target
        .as_table_mut()
        .ok_or_else(|| LoadtraceError::config(format!("unknown configuration key: {key}")))?;
    let existing = table
        .get(leaf)
        .ok_or_else(|| LoadtraceError::config(format!("unknown configuration key: {key}")))?;
    // Parse the new value with the existing value's type.
    let parsed = match existing {
        toml::Value::String(_) => toml::Value::String(raw.to_string()),
        toml::Value::Integer(_) => toml::Value::Integer(
            raw.parse()
                .map_err(|_| LoadtraceError::config(format!("expected integer for {key}")))?,
        ),
        toml::Value::Float(_) => toml::Value::Float(
            raw.parse()
                .map_err(|_| LoadtraceError::config(format!("expected float for {key}")))?,
        ),
        toml::Value::Boolean(_) => toml::Value::Boolean(
            raw.parse()
                .map_err(|_| LoadtraceError::config(format!("expected boolean for {key}")))?,
        ),
        _ => {
            return Err(LoadtraceError::config(format!(
                "configuration key {key} is not a scalar"
            )));
        }
    };
    table.insert(leaf.to_string(), parsed);
    let updated: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| LoadtraceError::config(e.to_string()))?;
    validator::validate(&updated)?;
    Ok(updated)
}

/// Production configuration service implementation.
///
/// Sources in priority order: environment variables (`LOADTRACE_*`),
/// the user configuration file, then the optional repository default
/// file. Configuration is cached after the first load.
pub struct ProductionConfigService {
    config_file_path: PathBuf,
    cached_config: Arc<RwLock<Option<Config>>>,
}

impl ProductionConfigService {
    /// Create a new production configuration service.
    pub fn new() -> Result<Self> {
        let config_file_path = match std::env::var("LOADTRACE_CONFIG_PATH") {
            Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => Self::user_config_path(),
        };
        Ok(Self {
            config_file_path,
            cached_config: Arc::new(RwLock::new(None)),
        })
    }

    /// Service reading an explicit configuration file.
    pub fn with_config_file(path: PathBuf) -> Self {
        Self {
            config_file_path: path,
            cached_config: Arc::new(RwLock::new(None)),
        }
    }

    fn user_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loadtrace")
            .join("config.toml")
    }

    fn load(&self) -> Result<Config> {
        let builder = ConfigCrate::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::from(self.config_file_path.clone()).required(false))
            .add_source(Environment::with_prefix("LOADTRACE").separator("_"));
        let raw = builder.build()?;
        let config: Config = raw.try_deserialize()?;
        validator::validate(&config)?;
        debug!("configuration loaded from {}", self.config_file_path.display());
        Ok(config)
    }
}

impl ConfigService for ProductionConfigService {
    fn get_config(&self) -> Result<Config> {
        {
            let cached = self.cached_config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(config) = cached.as_ref() {
                return Ok(config.clone());
            }
        }
        let config = self.load()?;
        let mut cached = self.cached_config.write().unwrap_or_else(|e| e.into_inner());
        *cached = Some(config.clone());
        Ok(config)
    }

    fn reload(&self) -> Result<()> {
        let config = self.load()?;
        let mut cached = self.cached_config.write().unwrap_or_else(|e| e.into_inner());
        *cached = Some(config);
        Ok(())
    }

    fn save_config_to_file(&self, path: &Path) -> Result<()> {
        let config = self.get_config()?;
        let rendered =
            toml::to_string_pretty(&config).map_err(|e| LoadtraceError::config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, rendered)?;
        Ok(())
    }

    fn get_config_file_path(&self) -> Result<PathBuf> {
        Ok(self.config_file_path.clone())
    }

    fn get_config_value(&self, key: &str) -> Result<String> {
        get_value(&self.get_config()?, key)
    }

    fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        let updated = set_value(&self.get_config()?, key, value)?;
        {
            let mut cached = self.cached_config.write().unwrap_or_else(|e| e.into_inner());
            *cached = Some(updated);
        }
        let path = self.get_config_file_path()?;
        self.save_config_to_file(&path)
    }
}
