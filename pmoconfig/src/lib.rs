//! # PMOPresence Configuration Module
//!
//! This module provides configuration management for PMOPresence, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - A typed [`PresenceConfig`] published live through a `watch` channel
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::ConfigStore;
//!
//! let store = ConfigStore::load("")?;
//! let timeout = store.get().display.pause_timeout;
//!
//! // Every holder of a receiver sees the new value
//! let mut rx = store.subscribe();
//! store.update(|c| c.display.pause_timeout = 60)?;
//! assert_eq!(rx.borrow_and_update().display.pause_timeout, 60);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod schema;

pub use schema::{
    ButtonConfig, CacheConfig, DiscordConfig, DisplayConfig, LoggingConfig, PresenceConfig,
    SourceConfig,
};

use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tokio::sync::watch;
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmopresence.yaml");

const ENV_CONFIG_DIR: &str = "PMOPRESENCE_CONFIG";
const ENV_PREFIX: &str = "PMOPRESENCE_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmopresence";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Owner of the process configuration.
///
/// The store keeps the current [`PresenceConfig`] inside a `watch` channel:
/// readers call [`ConfigStore::get`] or hold a receiver from
/// [`ConfigStore::subscribe`] and always observe the latest validated value.
#[derive(Debug)]
pub struct ConfigStore {
    config_dir: PathBuf,
    path: PathBuf,
    tx: watch::Sender<PresenceConfig>,
}

impl ConfigStore {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        // 1. Try provided directory
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        // Default fallback
        PathBuf::from(CONFIG_DIR_NAME)
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Loads the configuration from `directory`
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOPRESENCE_CONFIG` environment variable
    /// 3. `.pmopresence` in the current directory
    /// 4. `.pmopresence` in the user's home directory
    ///
    /// The embedded defaults are merged with `config.yaml` if present, then
    /// `PMOPRESENCE_CONFIG__SECTION__KEY` environment variables are applied.
    /// The result is validated and written back so the file always lists
    /// every known key.
    pub fn load(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(&config_dir)?;
        info!(config_dir=%config_dir.display(), "Using config directory");

        let path = config_dir.join(CONFIG_FILE_NAME);
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file=%path.display(), "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                // Un fichier vide se lit comme Null : on garde les défauts
                if !external.is_null() {
                    merge_yaml(&mut value, &lower_keys_value(external));
                }
            }
            Err(_) => {
                info!(config_file=%path.display(), "Config file not found, using default embedded config");
            }
        }

        apply_env_overrides(&mut value, env::vars());

        let config: PresenceConfig = serde_yaml::from_value(value)?;
        config.validate()?;

        let store = Self::with_config(config_dir, config);
        store.save()?;
        Ok(store)
    }

    /// Store holding the embedded defaults, persisted under `config_dir`.
    ///
    /// Used as a fallback when the user file cannot be loaded.
    pub fn defaults(config_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(config_dir.into(), PresenceConfig::default())
    }

    fn with_config(config_dir: PathBuf, config: PresenceConfig) -> Self {
        let path = config_dir.join(CONFIG_FILE_NAME);
        let (tx, _rx) = watch::channel(config);
        Self {
            config_dir,
            path,
            tx,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the current configuration
    pub fn get(&self) -> PresenceConfig {
        self.tx.borrow().clone()
    }

    /// Receiver that always observes the latest configuration
    pub fn subscribe(&self) -> watch::Receiver<PresenceConfig> {
        self.tx.subscribe()
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.tx.borrow())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Applies `change`, validates, persists, then publishes the result.
    ///
    /// On validation error the current configuration is left untouched.
    pub fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut PresenceConfig),
    {
        let mut next = self.get();
        change(&mut next);
        next.validate()?;
        self.commit(next)
    }

    /// Sets a raw value at `path` (e.g. `&["display", "pause_timeout"]`)
    ///
    /// The value goes through the same deserialization and validation as a
    /// value read from the config file.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut tree = serde_yaml::to_value(self.get())?;
        set_value_internal(&mut tree, path, value)?;
        let next: PresenceConfig = serde_yaml::from_value(tree)?;
        next.validate()?;
        self.commit(next)
    }

    /// Gets a raw value at `path`
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let tree = serde_yaml::to_value(self.get())?;
        get_value_internal(&tree, path)
    }

    fn commit(&self, next: PresenceConfig) -> Result<()> {
        let yaml = serde_yaml::to_string(&next)?;
        fs::write(&self.path, yaml)?;
        self.tx.send_replace(next);
        Ok(())
    }
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key_value = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key_value, value);
        } else {
            let entry = map
                .entry(key_value)
                .or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        if let Value::Mapping(map) = current {
            match map.get(&Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            }
        } else {
            return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
        }
    }
    Ok(current.clone())
}

/// Applies `PMOPRESENCE_CONFIG__A__B=value` pairs onto the tree
fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let key_path = stripped.split("__").collect::<Vec<_>>();
            let yaml_value = convert_env_value(&value);
            if let Err(e) = set_value_internal(config, &key_path, yaml_value) {
                tracing::warn!("Ignoring env override {}: {}", key, e);
            }
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let k = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(k, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}
