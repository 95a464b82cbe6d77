//! Pipe-backed child process channel. Stderr is merged into stdout.

use crate::channel::{ensure_line_terminated, Channel, EnvOverlay};
use crate::error::{ChannelError, ChannelResult, OsContext};
use crate::pump::OutputPump;
use crate::signal::signal_process;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use ptymux_types::{ChannelKind, ReadOutput, TERMINATE_GRACE_PERIOD};
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ProcessSpawn {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: EnvOverlay,
}

impl ProcessSpawn {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn env(mut self, env: EnvOverlay) -> Self {
        self.env = env;
        self
    }
}

struct ProcessHandles {
    child: Child,
    stdin: ChildStdin,
    output: OutputPump,
    command: String,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ProcessChannel {
    handles: Option<ProcessHandles>,
}

impl ProcessChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&mut self, spawn: ProcessSpawn) -> ChannelResult<()> {
        if self.is_active() {
            return Err(ChannelError::AlreadyOpen(ChannelKind::Process));
        }
        self.close().await?;

        let mut cmd = Command::new(&spawn.command);
        cmd.args(&spawn.args)
            .envs(spawn.env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spawn.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .os_context(&format!("Failed to spawn '{}'", spawn.command))?;

        let (stdin, stdout, stderr) = take_stdio(&mut child)?;

        let readers: Vec<Box<dyn AsyncRead + Send + Unpin>> = vec![Box::new(stdout), Box::new(stderr)];
        info!(command = %spawn.command, pid = ?child.id(), "process started");

        self.handles = Some(ProcessHandles {
            child,
            stdin,
            output: OutputPump::from_async_readers(readers),
            command: spawn.command,
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Exit code of the child if it has already terminated.
    /// `Some(-1)` when it was ended by a signal.
    pub fn exit_code(&mut self) -> Option<i32> {
        let handles = self.handles.as_mut()?;
        match handles.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    fn handles_mut(&mut self) -> ChannelResult<&mut ProcessHandles> {
        self.handles
            .as_mut()
            .ok_or(ChannelError::NotOpen(ChannelKind::Process))
    }
}

#[async_trait]
impl Channel for ProcessChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Process
    }

    async fn send(&mut self, data: &str) -> ChannelResult<usize> {
        let handles = self.handles_mut()?;
        let line = ensure_line_terminated(data);
        handles
            .stdin
            .write_all(line.as_bytes())
            .await
            .os_context("Failed to write to process")?;
        handles
            .stdin
            .flush()
            .await
            .os_context("Failed to flush process stdin")?;
        Ok(line.len())
    }

    async fn read(&mut self, timeout: Duration) -> ChannelResult<ReadOutput> {
        let handles = self.handles_mut()?;
        let collected = handles.output.collect(timeout).await;

        if collected.bytes.is_empty() {
            return Ok(if collected.eof {
                ReadOutput::Closed
            } else {
                ReadOutput::NoData
            });
        }
        Ok(ReadOutput::Data(
            String::from_utf8_lossy(&collected.bytes).into_owned(),
        ))
    }

    async fn close(&mut self) -> ChannelResult<()> {
        let Some(mut handles) = self.handles.take() else {
            return Ok(());
        };

        if let Ok(None) = handles.child.try_wait() {
            if let Some(pid) = handles.child.id() {
                signal_process(pid, Signal::SIGTERM);
            }
            if tokio::time::timeout(TERMINATE_GRACE_PERIOD, handles.child.wait())
                .await
                .is_err()
            {
                warn!(command = %handles.command, "process ignored SIGTERM, killing");
                if let Err(e) = handles.child.kill().await {
                    warn!(command = %handles.command, error = %e, "failed to kill process");
                }
            }
        }

        info!(command = %handles.command, "process closed");
        Ok(())
    }

    fn is_active(&mut self) -> bool {
        match self.handles.as_mut() {
            Some(handles) => matches!(handles.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn describe(&self) -> Value {
        match &self.handles {
            Some(h) => json!({
                "command": h.command,
                "pid": h.child.id(),
                "started_at": h.started_at.to_rfc3339(),
            }),
            None => Value::Null,
        }
    }
}

/// Detach the child's pipes, killing it when any of them is missing
fn take_stdio(child: &mut Child) -> ChannelResult<(ChildStdin, ChildStdout, ChildStderr)> {
    match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
        (Some(stdin), Some(stdout), Some(stderr)) => Ok((stdin, stdout, stderr)),
        _ => {
            let _ = child.start_kill();
            Err(ChannelError::os(
                "Child pipes unavailable",
                io::Error::new(io::ErrorKind::BrokenPipe, "stdio was not captured"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cat_echoes_input() {
        let mut child = ProcessChannel::new();
        child.open(ProcessSpawn::new("cat")).await.unwrap();

        let written = child.send("ping").await.unwrap();
        assert_eq!(written, 5);
        let output = child.read(Duration::from_millis(500)).await.unwrap();
        assert_eq!(output, ReadOutput::Data("ping\n".to_string()));

        child.close().await.unwrap();
        assert!(!child.is_active());
    }

    #[tokio::test]
    async fn test_missing_pipes_are_an_os_failure() {
        let mut child = Command::new("sleep")
            .arg("5")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let err = take_stdio(&mut child).unwrap_err();
        assert_eq!(err.kind_name(), "os_failure");
        let status = tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_stderr_is_merged() {
        let mut child = ProcessChannel::new();
        child.open(ProcessSpawn::new("sh").args(["-c", "echo out; echo err >&2"]))
            .await
            .unwrap();

        let output = child.read(Duration::from_secs(1)).await.unwrap();
        assert!(output.text().contains("out"));
        assert!(output.text().contains("err"));
    }

    #[tokio::test]
    async fn test_silent_read_is_bounded() {
        let mut child = ProcessChannel::new();
        child.open(ProcessSpawn::new("sleep").args(["5"])).await.unwrap();

        let started = std::time::Instant::now();
        let output = child.read(Duration::from_millis(500)).await.unwrap();
        assert_eq!(output, ReadOutput::NoData);
        assert!(started.elapsed() < Duration::from_millis(900));

        child.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_completed_process_reports_exit_code() {
        let mut child = ProcessChannel::new();
        child.open(ProcessSpawn::new("sh").args(["-c", "exit 7"]))
            .await
            .unwrap();

        let output = child.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(output, ReadOutput::Closed);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!child.is_active());
        assert_eq!(child.exit_code(), Some(7));

        // A finished child does not block a new open
        child.open(ProcessSpawn::new("cat")).await.unwrap();
        assert!(child.is_active());
        child.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_working_dir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = EnvOverlay::new();
        env.set("PTYMUX_PROC_VAR", "from-overlay");

        let mut child = ProcessChannel::new();
        child.open(
            ProcessSpawn::new("sh")
                .args(["-c", "pwd; echo $PTYMUX_PROC_VAR"])
                .working_dir(Some(dir.path().to_path_buf()))
                .env(env),
        )
        .await
        .unwrap();

        let output = child.read(Duration::from_secs(1)).await.unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(output.text().contains(canonical.to_str().unwrap()));
        assert!(output.text().contains("from-overlay"));
    }

    #[tokio::test]
    async fn test_close_twice_and_send_after_close() {
        let mut child = ProcessChannel::new();
        child.open(ProcessSpawn::new("cat")).await.unwrap();
        child.close().await.unwrap();
        child.close().await.unwrap();
        assert!(matches!(
            child.send("x").await.unwrap_err(),
            ChannelError::NotOpen(ChannelKind::Process)
        ));
    }
}
