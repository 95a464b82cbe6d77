//! Project registry persistence.
//!
//! Layout under the base directory:
//! `config/projects.json` holds `{"projects": {name: path}, "default": name}`
//! and `.active_project` holds the active project name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

pub const BASE_DIR_ENV: &str = "PTYMUX_BASE_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode project config: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to parse {path}: {message}")]
    EnvFile { path: PathBuf, message: String },

    #[error("Project '{name}' not found. Available: {available}")]
    UnknownProject { name: String, available: String },

    #[error("Project path does not exist: {0}")]
    MissingPath(PathBuf),

    #[error("Project store unavailable: {0}")]
    Store(String),
}

impl ConfigError {
    fn io(path: &Path, source: io::Error) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Registered projects plus the persisted active selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub projects: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub default: Option<String>,
    /// Stored separately from the JSON document
    #[serde(skip)]
    pub active: Option<String>,
}

/// Where project configuration lives
#[cfg_attr(test, mockall::automock)]
pub trait ProjectStore: Send {
    fn load(&self) -> Result<ProjectConfig, ConfigError>;
    fn save(&self, config: &ProjectConfig) -> Result<(), ConfigError>;
}

/// `$PTYMUX_BASE_DIR`, else `<data dir>/ptymux`
pub fn default_base_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(BASE_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("ptymux"))
        .unwrap_or_else(|| PathBuf::from(".ptymux"))
}

/// File-backed store
#[derive(Debug, Clone)]
pub struct JsonProjectStore {
    config_path: PathBuf,
    state_path: PathBuf,
}

impl JsonProjectStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base = base_dir.as_ref();
        Self {
            config_path: base.join("config").join("projects.json"),
            state_path: base.join(".active_project"),
        }
    }

    pub fn from_environment() -> Self {
        Self::new(default_base_dir())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl ProjectStore for JsonProjectStore {
    fn load(&self) -> Result<ProjectConfig, ConfigError> {
        let mut config = match fs::read_to_string(&self.config_path) {
            Ok(raw) => serde_json::from_str::<ProjectConfig>(&raw).unwrap_or_else(|e| {
                warn!(path = %self.config_path.display(), error = %e, "corrupt project config, starting fresh");
                ProjectConfig::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => ProjectConfig::default(),
            Err(e) => return Err(ConfigError::io(&self.config_path, e)),
        };

        config.active = match fs::read_to_string(&self.state_path) {
            Ok(raw) => Some(raw.trim().to_string()).filter(|name| !name.is_empty()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(ConfigError::io(&self.state_path, e)),
        };
        Ok(config)
    }

    fn save(&self, config: &ProjectConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, json).map_err(|e| ConfigError::io(&self.config_path, e))?;

        if let Some(active) = &config.active {
            fs::write(&self.state_path, active).map_err(|e| ConfigError::io(&self.state_path, e))?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    config: Mutex<ProjectConfig>,
}

impl MemoryProjectStore {
    pub fn new(config: ProjectConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl ProjectStore for MemoryProjectStore {
    fn load(&self) -> Result<ProjectConfig, ConfigError> {
        self.config
            .lock()
            .map(|c| c.clone())
            .map_err(|e| ConfigError::Store(e.to_string()))
    }

    fn save(&self, config: &ProjectConfig) -> Result<(), ConfigError> {
        let mut guard = self
            .config
            .lock()
            .map_err(|e| ConfigError::Store(e.to_string()))?;
        *guard = config.clone();
        Ok(())
    }
}
