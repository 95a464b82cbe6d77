//! Named tmux sessions.
//!
//! The tmux server owns session state. The table kept here only remembers
//! what this process started, and is never consulted for existence.

use crate::channel::EnvOverlay;
use crate::error::{ChannelError, ChannelResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::process::{Command, Output};
use tracing::{debug, info};

pub const DEFAULT_MULTIPLEXER: &str = "tmux";
pub const DETACH_INSTRUCTIONS: &str = "Press Ctrl+B, then D to detach";

/// What this process remembers about a session it started
#[derive(Debug, Clone, Serialize)]
pub struct TrackedSession {
    pub command: String,
    pub created_at: DateTime<Utc>,
}

/// A session as reported by the tmux server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiplexedSession {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub attached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachInfo {
    pub session_name: String,
    pub command: String,
    pub instructions: String,
}

#[derive(Debug)]
pub struct MultiplexerManager {
    binary: String,
    /// Optional `-L` server socket, used to isolate servers
    socket_name: Option<String>,
    sessions: HashMap<String, TrackedSession>,
}

impl Default for MultiplexerManager {
    fn default() -> Self {
        Self::new(DEFAULT_MULTIPLEXER)
    }
}

impl MultiplexerManager {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            socket_name: None,
            sessions: HashMap::new(),
        }
    }

    pub fn with_socket_name(mut self, socket_name: Option<String>) -> Self {
        self.socket_name = socket_name;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Sessions started through this manager and not yet killed through it
    pub fn tracked(&self) -> &HashMap<String, TrackedSession> {
        &self.sessions
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(socket) = &self.socket_name {
            cmd.args(["-L", socket]);
        }
        cmd
    }

    /// Run tmux, mapping a missing binary to `ExternalToolMissing`
    fn run(&self, args: &[&str]) -> ChannelResult<Output> {
        debug!(binary = %self.binary, ?args, "running multiplexer command");
        self.base_command().args(args).output().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ChannelError::ExternalToolMissing(self.binary.clone())
            } else {
                ChannelError::os(format!("Failed to run {}", self.binary), e)
            }
        })
    }

    /// Run tmux and return stdout, failing on a non-zero exit
    fn run_checked(&self, args: &[&str]) -> ChannelResult<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(ChannelError::CommandFailed {
                command: format!("{} {}", self.binary, args.first().copied().unwrap_or_default()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Returns the tmux version string
    pub fn check_installed(&self) -> ChannelResult<String> {
        Ok(self.run_checked(&["-V"])?.trim().to_string())
    }

    pub fn session_exists(&self, name: &str) -> ChannelResult<bool> {
        let output = self.run(&["has-session", "-t", &session_target(name)])?;
        Ok(output.status.success())
    }

    fn require_session(&self, name: &str) -> ChannelResult<()> {
        validate_session_name(name)?;
        if self.session_exists(name)? {
            Ok(())
        } else {
            Err(ChannelError::NotFound(name.to_string()))
        }
    }

    /// Start a detached session running `command` (the default shell when empty)
    pub fn start(
        &mut self,
        name: &str,
        command: &str,
        working_dir: Option<&Path>,
        env: &EnvOverlay,
    ) -> ChannelResult<()> {
        validate_session_name(name)?;
        if self.session_exists(name)? {
            return Err(ChannelError::AlreadyExists(name.to_string()));
        }

        let mut args: Vec<String> = vec!["new-session".into(), "-d".into(), "-s".into(), name.into()];
        if let Some(dir) = working_dir {
            args.push("-c".into());
            args.push(dir.to_string_lossy().into_owned());
        }
        for (key, value) in env.iter() {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        if !command.trim().is_empty() {
            args.push(command.to_string());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&arg_refs)?;

        info!(session = name, command, "multiplexer session started");
        self.sessions.insert(
            name.to_string(),
            TrackedSession {
                command: command.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Every session on the server. No server means no sessions.
    pub fn list(&self) -> ChannelResult<Vec<MultiplexedSession>> {
        let output = self.run(&["list-sessions", "-F", "#{session_name}:#{session_created}"])?;
        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut sessions = Vec::new();
        for line in stdout.lines().filter(|l| !l.is_empty()) {
            let Some((name, created)) = line.rsplit_once(':') else {
                continue;
            };
            let created_at = created
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0));
            sessions.push(MultiplexedSession {
                name: name.to_string(),
                created_at,
                attached: self.has_clients(name)?,
            });
        }
        Ok(sessions)
    }

    fn has_clients(&self, name: &str) -> ChannelResult<bool> {
        let output = self.run(&["list-clients", "-t", &session_target(name)])?;
        Ok(output.status.success() && !output.stdout.iter().all(u8::is_ascii_whitespace))
    }

    /// Type `keys` into the session followed by Enter
    pub fn send_keys(&self, name: &str, keys: &str) -> ChannelResult<()> {
        self.require_session(name)?;
        self.run_checked(&["send-keys", "-t", &pane_target(name), keys, "Enter"])?;
        Ok(())
    }

    /// Visible pane content, or the last `lines` lines including scrollback
    pub fn capture(&self, name: &str, lines: Option<usize>) -> ChannelResult<String> {
        self.require_session(name)?;
        let target = pane_target(name);
        let start;
        let mut args = vec!["capture-pane", "-p", "-t", target.as_str()];
        if let Some(count) = lines.filter(|n| *n > 0) {
            start = format!("-{}", count);
            args.extend(["-S", start.as_str()]);
        }
        let output = self.run_checked(&args)?;
        Ok(match lines.filter(|n| *n > 0) {
            Some(count) => last_lines(&output, count),
            None => output,
        })
    }

    pub fn kill(&mut self, name: &str) -> ChannelResult<()> {
        self.require_session(name)?;
        self.run_checked(&["kill-session", "-t", &session_target(name)])?;
        self.sessions.remove(name);
        info!(session = name, "multiplexer session killed");
        Ok(())
    }

    /// The shell command a human would run to attach
    pub fn attach_command(&self, name: &str) -> ChannelResult<AttachInfo> {
        self.require_session(name)?;
        let command = match &self.socket_name {
            Some(socket) => format!("{} -L {} attach -t {}", self.binary, socket, name),
            None => format!("{} attach -t {}", self.binary, name),
        };
        Ok(AttachInfo {
            session_name: name.to_string(),
            command,
            instructions: DETACH_INSTRUCTIONS.to_string(),
        })
    }

    /// Forget tracked sessions. The sessions themselves keep running.
    pub fn cleanup_all(&mut self) {
        if !self.sessions.is_empty() {
            debug!(count = self.sessions.len(), "forgetting tracked multiplexer sessions");
        }
        self.sessions.clear();
    }
}

/// tmux treats `:` and `.` as target separators
pub fn validate_session_name(name: &str) -> ChannelResult<()> {
    if name.trim().is_empty() {
        return Err(ChannelError::invalid("session name must not be empty"));
    }
    if name.contains([':', '.']) {
        return Err(ChannelError::invalid(format!(
            "session name '{}' must not contain ':' or '.'",
            name
        )));
    }
    Ok(())
}

/// Exact-match session target, so `dev` never resolves to `dev2`
fn session_target(name: &str) -> String {
    format!("={}", name)
}

fn pane_target(name: &str) -> String {
    format!("={}:", name)
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim_end_matches('\n').lines().collect();
    let start = lines.len().saturating_sub(count);
    let mut tail = lines[start..].join("\n");
    tail.push('\n');
    tail
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_validate_session_name() {
        assert!(validate_session_name("build-1").is_ok());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("a:b").is_err());
        assert!(validate_session_name("a.b").is_err());
    }

    #[test]
    fn test_last_lines() {
        assert_eq!(last_lines("a\nb\nc\n", 2), "b\nc\n");
        assert_eq!(last_lines("a\n", 5), "a\n");
    }

    #[test]
    fn test_missing_binary_is_reported_distinctly() {
        let mut manager = MultiplexerManager::new("ptymux-no-such-multiplexer");
        let err = manager
            .start("x", "sh", None, &EnvOverlay::default())
            .unwrap_err();
        assert!(matches!(err, ChannelError::ExternalToolMissing(ref bin) if bin == "ptymux-no-such-multiplexer"));
        assert_eq!(
            manager.list().unwrap_err().kind_name(),
            "external_tool_missing"
        );
    }

    #[test]
    fn test_cleanup_only_clears_cache() {
        let mut manager = MultiplexerManager::default();
        manager.sessions.insert(
            "kept".into(),
            TrackedSession {
                command: "sh".into(),
                created_at: Utc::now(),
            },
        );
        manager.cleanup_all();
        assert!(manager.tracked().is_empty());
    }
}
