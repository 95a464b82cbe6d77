// Logging module - diagnostics setup and the per-call transcript
pub mod call_logger;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

pub use call_logger::{CallLogger, CallRecord};

/// Filter used when `RUST_LOG` is unset or unparsable
pub const DEFAULT_FILTER: &str = "info";

/// Install the global tracing subscriber.
///
/// Output always goes to stderr: stdout carries the protocol stream.
/// Calling this twice is harmless, the second call reports an error that
/// callers may ignore.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))?;

    tracing::debug!("logging initialised");
    Ok(())
}

/// Safely truncate a string to a maximum number of characters
pub fn safe_truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        // Reserve space for "..." suffix
        let trunc_chars = max_chars.saturating_sub(3);
        format!("{}...", s.chars().take(trunc_chars).collect::<String>())
    }
}

/// Get or create the log directory under `base_dir`
pub fn logs_dir(base_dir: &Path) -> Result<PathBuf> {
    let dir = base_dir.join("logs");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_safe_truncate() {
        assert_eq!(safe_truncate("hello", 10), "hello");
        assert_eq!(safe_truncate("hello world", 8), "hello...");
        assert_eq!(safe_truncate("ééééé", 4), "é...");
        assert_eq!(safe_truncate("abcdef", 2), "...");
    }

    #[test]
    fn test_logs_dir_is_created() {
        let base = tempfile::tempdir().unwrap();
        let dir = logs_dir(base.path()).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, base.path().join("logs"));
    }
}
