use crate::safe_truncate;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest content or error text kept per line
const MAX_LOGGED_CHARS: usize = 2000;

/// One line of the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub call_id: String,
    pub tool: String,
    pub arguments: Value,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallRecord {
    pub fn new(call_id: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            call_id: call_id.into(),
            tool: tool.into(),
            arguments,
            success: false,
            duration_ms: 0,
            content: None,
            error: None,
        }
    }

    pub fn finished(mut self, success: bool, text: &str, elapsed: Duration) -> Self {
        self.success = success;
        self.duration_ms = elapsed.as_millis() as u64;
        let text = safe_truncate(text, MAX_LOGGED_CHARS);
        if success {
            self.content = Some(text);
        } else {
            self.error = Some(text);
        }
        self
    }
}

/// Appends one JSON object per tool call to `calls-<date>.jsonl`
pub struct CallLogger {
    path: PathBuf,
    file: File,
}

impl std::fmt::Debug for CallLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLogger").field("path", &self.path).finish()
    }
}

impl CallLogger {
    pub fn new(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir).context("Failed to create log directory")?;

        let path = log_dir.join(format!("calls-{}.jsonl", Utc::now().format("%Y%m%d")));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open call log {}", path.display()))?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&mut self, record: &CallRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to encode call record")?;
        writeln!(self.file, "{}", line).context("Failed to write to call log")?;
        self.file.flush()?;
        Ok(())
    }
}
