//! Typed application configuration: JSON file persistence plus explicit
//! change notification for components that need to react (backup scheduler).

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub app_url: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub automated_backup: bool,
    /// Interval between automated snapshots when `automated_backup` is on.
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,
    #[serde(default = "default_db_max_open_connections")]
    pub db_max_open_connections: u32,
    #[serde(default = "default_db_max_idle_connections")]
    pub db_max_idle_connections: u32,
    /// Maximum lifetime of one pooled connection, in minutes.
    #[serde(default = "default_db_max_lifetime_mins")]
    pub db_max_lifetime_mins: u64,
    /// Days request logs are kept by the logging collaborator.
    #[serde(default = "default_log_lifetime_days")]
    pub log_lifetime_days: u32,
}

fn default_app_name() -> String {
    "Plinth".into()
}

fn default_api_key() -> String {
    "default-api-key".into()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:8080".into(), "http://localhost:3000".into()]
}

fn default_backup_interval_secs() -> u64 {
    86_400
}

fn default_db_max_open_connections() -> u32 {
    10
}

fn default_db_max_idle_connections() -> u32 {
    5
}

fn default_db_max_lifetime_mins() -> u64 {
    2
}

fn default_log_lifetime_days() -> u32 {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap_or_else(|_| unreachable!("all fields have defaults"))
    }
}

/// Receives the full new configuration whenever an admin saves settings.
pub trait ConfigListener: Send + Sync {
    fn on_config_changed(&self, config: &AppConfig);
}

/// Owns the persisted configuration and fans out updates to listeners.
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<AppConfig>,
    listeners: Mutex<Vec<Box<dyn ConfigListener>>>,
}

impl ConfigStore {
    /// Load from `path`, writing defaults out when the file is missing or empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let config = match std::fs::read_to_string(&path) {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|e| AppError::Config(format!("parse {}: {}", path.display(), e)))?,
            _ => {
                let config = AppConfig::default();
                persist(&path, &config)?;
                config
            }
        };
        Ok(Self {
            path,
            inner: RwLock::new(config),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// In-memory store for tests; nothing is written to disk until `update`.
    pub fn ephemeral(config: AppConfig) -> Self {
        Self {
            path: PathBuf::new(),
            inner: RwLock::new(config),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> AppConfig {
        self.inner
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Replace the configuration, persist it, and notify every listener.
    pub fn update(&self, new: AppConfig) -> Result<(), AppError> {
        if !self.path.as_os_str().is_empty() {
            persist(&self.path, &new)?;
        }
        match self.inner.write() {
            Ok(mut guard) => *guard = new.clone(),
            Err(e) => *e.into_inner() = new.clone(),
        }
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener.on_config_changed(&new);
        }
        Ok(())
    }

    pub fn subscribe(&self, listener: Box<dyn ConfigListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }
}

fn persist(path: &Path, config: &AppConfig) -> Result<(), AppError> {
    let raw = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::Config(format!("encode config: {}", e)))?;
    std::fs::write(path, raw)
        .map_err(|e| AppError::Config(format!("write {}: {}", path.display(), e)))
}
