use crate::config::ConfigError;
use ptymux_channels::EnvOverlay;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of loading a project's `.env`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvLoadReport {
    pub project: String,
    pub env_file_found: bool,
    pub env_file: Option<PathBuf>,
    pub env_count: usize,
}

/// Per-project variables read from `<project>/.env`
#[derive(Debug, Default)]
pub struct ProjectEnvironments {
    envs: HashMap<String, EnvOverlay>,
}

impl ProjectEnvironments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `<path>/.env` (if present) and cache it together with
    /// `PROJECT_NAME` and `PROJECT_PATH`.
    pub fn load(&mut self, name: &str, path: &Path) -> Result<EnvLoadReport, ConfigError> {
        let env_path = path.join(".env");
        let mut overlay = EnvOverlay::new();

        let found = env_path.is_file();
        if found {
            let entries = dotenvy::from_path_iter(&env_path).map_err(|e| ConfigError::EnvFile {
                path: env_path.clone(),
                message: e.to_string(),
            })?;
            for entry in entries {
                let (key, value) = entry.map_err(|e| ConfigError::EnvFile {
                    path: env_path.clone(),
                    message: e.to_string(),
                })?;
                overlay.set(key, value);
            }
        }

        overlay.set("PROJECT_NAME", name);
        overlay.set("PROJECT_PATH", path.to_string_lossy());

        let report = EnvLoadReport {
            project: name.to_string(),
            env_file_found: found,
            env_file: found.then(|| env_path.clone()),
            env_count: overlay.len(),
        };
        debug!(project = name, count = report.env_count, "project environment loaded");
        self.envs.insert(name.to_string(), overlay);
        Ok(report)
    }

    pub fn get(&self, name: &str) -> Option<&EnvOverlay> {
        self.envs.get(name)
    }

    pub fn forget(&mut self, name: &str) {
        self.envs.remove(name);
    }

    pub fn loaded(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.envs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
