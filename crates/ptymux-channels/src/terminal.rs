//! Pseudo-terminal backed channel.

use crate::ansi::clean_output;
use crate::channel::{ensure_line_terminated, Channel, EnvOverlay};
use crate::error::{ChannelError, ChannelResult};
use crate::pump::OutputPump;
use crate::signal::{signal_group, wait_for_exit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use ptymux_types::{ChannelKind, ReadOutput};
use serde_json::{json, Value};
use std::fmt::Display;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

fn pty_error(context: &str, err: impl Display) -> ChannelError {
    ChannelError::os(context, io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// What to run inside the terminal
#[derive(Debug, Clone)]
pub struct TerminalSpawn {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: EnvOverlay,
    pub rows: u16,
    pub cols: u16,
}

impl TerminalSpawn {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: EnvOverlay::default(),
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
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

    fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

struct TerminalHandles {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    output: OutputPump,
    command_line: String,
    size: PtySize,
    started_at: DateTime<Utc>,
}

/// A child process attached to a PTY, in its own session and process group
#[derive(Default)]
pub struct TerminalChannel {
    handles: Option<TerminalHandles>,
}

impl TerminalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&mut self, spawn: TerminalSpawn) -> ChannelResult<()> {
        if self.is_active() {
            return Err(ChannelError::AlreadyOpen(ChannelKind::Terminal));
        }
        // Drop whatever an exited child left behind
        self.close().await?;

        let size = pty_size(spawn.rows, spawn.cols);
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| pty_error("Failed to open PTY", e))?;

        // Every fallible master-side step happens before the child exists
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| pty_error("Failed to clone PTY reader", e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| pty_error("Failed to take PTY writer", e))?;
        let output = OutputPump::from_blocking_reader(reader, "ptymux-terminal-reader")
            .map_err(|e| ChannelError::os("Failed to start PTY reader", e))?;

        let mut cmd = CommandBuilder::new(&spawn.command);
        cmd.args(&spawn.args);
        if let Some(dir) = &spawn.working_dir {
            cmd.cwd(dir);
        }
        for (key, value) in spawn.env.iter() {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| pty_error(&format!("Failed to spawn '{}'", spawn.command), e))?;
        // Only the child keeps the slave side open, so EOF follows its exit
        drop(pair.slave);

        let command_line = spawn.command_line();
        info!(command = %command_line, pid = ?child.process_id(), "terminal session started");

        self.handles = Some(TerminalHandles {
            master: pair.master,
            writer,
            child,
            output,
            command_line,
            size,
            started_at: Utc::now(),
        });
        Ok(())
    }

    pub fn resize(&mut self, rows: u16, cols: u16) -> ChannelResult<()> {
        let handles = self
            .handles
            .as_mut()
            .ok_or(ChannelError::NotOpen(ChannelKind::Terminal))?;
        let size = pty_size(rows, cols);
        handles
            .master
            .resize(size)
            .map_err(|e| pty_error("Failed to resize PTY", e))?;
        handles.size = size;
        debug!(rows, cols, "terminal resized");
        Ok(())
    }

    /// Write bytes as-is, without line termination
    pub fn write_raw(&mut self, data: &[u8]) -> ChannelResult<usize> {
        let handles = self.handles_mut()?;
        handles
            .writer
            .write_all(data)
            .and_then(|_| handles.writer.flush())
            .map_err(|e| ChannelError::os("Failed to write to terminal", e))?;
        Ok(data.len())
    }

    /// Exit code of the child if it has already terminated
    pub fn exit_code(&mut self) -> Option<u32> {
        let handles = self.handles.as_mut()?;
        match handles.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    fn handles_mut(&mut self) -> ChannelResult<&mut TerminalHandles> {
        self.handles
            .as_mut()
            .ok_or(ChannelError::NotOpen(ChannelKind::Terminal))
    }
}

#[async_trait]
impl Channel for TerminalChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Terminal
    }

    async fn send(&mut self, data: &str) -> ChannelResult<usize> {
        let handles = self.handles_mut()?;
        let line = ensure_line_terminated(data);
        handles
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| handles.writer.flush())
            .map_err(|e| ChannelError::os("Failed to write to terminal", e))?;
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
        let text = String::from_utf8_lossy(&collected.bytes);
        Ok(ReadOutput::Data(clean_output(&text)))
    }

    async fn close(&mut self) -> ChannelResult<()> {
        let Some(mut handles) = self.handles.take() else {
            return Ok(());
        };

        if let Ok(None) = handles.child.try_wait() {
            if let Some(pid) = handles.child.process_id() {
                signal_group(pid, Signal::SIGHUP);
            }
            let child = &mut handles.child;
            let exited = wait_for_exit(|| matches!(child.try_wait(), Ok(Some(_)))).await;
            if !exited {
                warn!(command = %handles.command_line, "terminal child ignored SIGHUP, killing");
                if let Some(pid) = handles.child.process_id() {
                    signal_group(pid, Signal::SIGKILL);
                }
                let _ = handles.child.kill();
                let _ = handles.child.try_wait();
            }
        }

        info!(command = %handles.command_line, "terminal session closed");
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
                "command": h.command_line,
                "pid": h.child.process_id(),
                "rows": h.size.rows,
                "cols": h.size.cols,
                "started_at": h.started_at.to_rfc3339(),
            }),
            None => Value::Null,
        }
    }
}

impl Drop for TerminalChannel {
    fn drop(&mut self) {
        if let Some(handles) = self.handles.as_mut() {
            if let Ok(None) = handles.child.try_wait() {
                let _ = handles.child.kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> TerminalSpawn {
        TerminalSpawn::new("sh")
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let mut term = TerminalChannel::new();
        term.open(shell()).await.unwrap();
        assert!(term.is_active());

        term.send("echo hello").await.unwrap();
        let output = term.read(Duration::from_secs(2)).await.unwrap();
        assert!(output.text().contains("hello"), "got {:?}", output);

        term.close().await.unwrap();
        assert!(!term.is_active());
    }

    #[tokio::test]
    async fn test_failed_spawn_leaves_channel_closed() {
        let mut term = TerminalChannel::new();
        let err = term
            .open(TerminalSpawn::new("/nonexistent/ptymux-missing-shell"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"), "{}", err);
        assert!(!term.is_active());

        term.open(shell()).await.unwrap();
        assert!(term.is_active());
        term.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_open_is_rejected() {
        let mut term = TerminalChannel::new();
        term.open(shell()).await.unwrap();
        let err = term.open(shell()).await.unwrap_err();
        assert!(matches!(err, ChannelError::AlreadyOpen(ChannelKind::Terminal)));
        term.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_io() {
        let mut term = TerminalChannel::new();
        assert!(matches!(
            term.send("x").await.unwrap_err(),
            ChannelError::NotOpen(ChannelKind::Terminal)
        ));
        assert!(matches!(
            term.read(Duration::from_millis(10)).await.unwrap_err(),
            ChannelError::NotOpen(_)
        ));
        assert!(term.resize(30, 100).is_err());
        term.close().await.unwrap();
        term.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exited_child_is_inactive_and_reopenable() {
        let mut term = TerminalChannel::new();
        term.open(TerminalSpawn::new("sh").args(["-c", "exit 3"]))
            .await
            .unwrap();

        let mut waited = 0;
        while term.is_active() && waited < 40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += 1;
        }
        assert!(!term.is_active());
        assert_eq!(term.exit_code(), Some(3));

        term.open(shell()).await.unwrap();
        assert!(term.is_active());
        term.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_env_overlay_reaches_child() {
        let mut env = EnvOverlay::new();
        env.set("PTYMUX_TEST_VALUE", "overlay-ok");
        let mut term = TerminalChannel::new();
        term.open(
            TerminalSpawn::new("sh")
                .args(["-c", "echo $PTYMUX_TEST_VALUE; sleep 1"])
                .env(env),
        )
        .await
        .unwrap();

        let output = term.read(Duration::from_millis(800)).await.unwrap();
        assert!(output.text().contains("overlay-ok"));
        term.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_resize_updates_description() {
        let mut term = TerminalChannel::new();
        term.open(shell()).await.unwrap();
        term.resize(40, 120).unwrap();
        let info = term.describe();
        assert_eq!(info["rows"], 40);
        assert_eq!(info["cols"], 120);
        term.close().await.unwrap();
    }
}
