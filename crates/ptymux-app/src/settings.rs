use anyhow::{Context, Result};
use ptymux_types::ReadTimeouts;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file looked up in the base directory
pub const SETTINGS_FILE: &str = "ptymux.toml";

/// Server settings, read from `ptymux.toml`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub multiplexer_binary: String,
    /// tmux `-L` server name; `None` uses the user's default server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplexer_socket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Write one JSON line per tool call
    pub call_log: bool,
    pub timeouts: ReadTimeouts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            multiplexer_binary: "tmux".to_string(),
            multiplexer_socket: None,
            log_dir: None,
            call_log: false,
            timeouts: ReadTimeouts::default(),
        }
    }
}

impl Settings {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        Ok(settings)
    }

    /// An explicit path must exist; the default file in `base_dir` may not.
    pub fn load(base_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        let path = base_dir.join(SETTINGS_FILE);
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Configured log directory, else `<base>/logs`. Created if missing.
    pub fn log_dir(&self, base_dir: &Path) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
                Ok(dir.clone())
            }
            None => ptymux_logging::logs_dir(base_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_default_file_gives_defaults() {
        let base = tempfile::tempdir().unwrap();
        let settings = Settings::load(base.path(), None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.multiplexer_binary, "tmux");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let base = tempfile::tempdir().unwrap();
        std::fs::write(
            base.path().join(SETTINGS_FILE),
            "call_log = true\nmultiplexer_socket = \"work\"\n\n[timeouts]\nsocket = 5.0\n",
        )
        .unwrap();

        let settings = Settings::load(base.path(), None).unwrap();
        assert!(settings.call_log);
        assert_eq!(settings.multiplexer_socket.as_deref(), Some("work"));
        assert_eq!(settings.timeouts.socket, 5.0);
        assert_eq!(settings.timeouts.serial, ReadTimeouts::default().serial);
        assert_eq!(settings.multiplexer_binary, "tmux");
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let base = tempfile::tempdir().unwrap();
        let missing = base.path().join("nope.toml");
        assert!(Settings::load(base.path(), Some(&missing)).is_err());
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("bad.toml");
        std::fs::write(&path, "call_log = \"maybe\"").unwrap();
        let err = Settings::load_from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse settings"));
    }

    #[test]
    fn test_save_then_load() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join(SETTINGS_FILE);
        let mut settings = Settings::default();
        settings.log_dir = Some(base.path().join("elsewhere"));
        settings.timeouts.terminal_send = 3.5;
        settings.save_to_file(&path).unwrap();

        assert_eq!(Settings::load(base.path(), None).unwrap(), settings);
    }

    #[test]
    fn test_log_dir_defaults_under_base() {
        let base = tempfile::tempdir().unwrap();
        let dir = Settings::default().log_dir(base.path()).unwrap();
        assert_eq!(dir, base.path().join("logs"));
        assert!(dir.is_dir());
    }
}
