// Handlers for the piped (non-PTY) child process and one-shot ssh

use crate::helpers::{already_open, command_line, invalid_params, not_open, port_number, render_output};
use anyhow::Result;
use async_trait::async_trait;
use ptymux_channels::{Channel, ProcessSpawn};
use ptymux_toolcore::{param, ParameterDefinition, Tool, ToolCategory, ToolContext, ToolParameters, ToolResult};
use ptymux_types::{secs, ChannelKind};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const PROCESS_ENDED: &str = "(process exited)";
const EXIT_POLLS: usize = 5;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Start a child with piped stdio
#[derive(Debug, Default)]
pub struct SpawnTool;

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a process with piped stdin/stdout (no PTY)"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("command", "string", "Program to run", required),
            param!("args", "array", "Arguments for the program", optional),
            param!("working_dir", "string", "Working directory (default: active project)", optional),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let command: String = params.get_required("command")?;
        let args: Vec<String> = params.get_or("args", Vec::new())?;
        let working_dir: Option<String> = params.get_optional("working_dir")?;
        let display = command_line(&command, &args);

        let mut sessions = context.sessions.lock().await;

        // A process that already finished does not block a new one
        if sessions.has_channel(ChannelKind::Process) && !sessions.process().is_active() {
            debug!("reaping finished process before spawn");
            sessions.close_channel(ChannelKind::Process).await?;
        }
        if sessions.process().is_active() {
            return Ok(already_open("Process already active. Kill it first."));
        }

        let spawn = ProcessSpawn::new(command)
            .args(args)
            .working_dir(Some(sessions.working_dir_for(working_dir.as_deref())))
            .env(sessions.spawn_env());
        let window = secs(sessions.timeouts().process_start);

        let process = sessions.process();
        if let Err(e) = process.open(spawn).await {
            return Ok(ToolResult::from_channel_error(&e));
        }
        let output = process.read(window).await?;

        // EOF can be seen a moment before the exit status is available
        let mut exit_code = process.exit_code();
        if matches!(output, ptymux_types::ReadOutput::Closed) {
            for _ in 0..EXIT_POLLS {
                if exit_code.is_some() {
                    break;
                }
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                exit_code = process.exit_code();
            }
        }

        match exit_code {
            Some(code) => {
                sessions.close_channel(ChannelKind::Process).await?;
                Ok(ToolResult::success(format!(
                    "Process completed: {} (exit code: {})\n{}",
                    display,
                    code,
                    output.text()
                ))
                .with_metadata(json!({ "exit_code": code })))
            }
            None => Ok(ToolResult::success(format!(
                "Process started: {}\n{}",
                display,
                output.text()
            ))),
        }
    }
}

/// Write a line to the child's stdin and return its output
#[derive(Debug, Default)]
pub struct SendProcTool;

#[async_trait]
impl Tool for SendProcTool {
    fn name(&self) -> &str {
        "send-proc"
    }

    fn description(&self) -> &str {
        "Send a line of input to the spawned process and return its output"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!("message", "string", "Text to send; a newline is appended", required)])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let message: String = params.get_required("message")?;

        let mut sessions = context.sessions.lock().await;
        let window = secs(sessions.timeouts().process_send);
        let process = sessions.process();
        if !process.is_active() {
            return Ok(not_open("No active process. Use 'spawn' first."));
        }

        if let Err(e) = process.send(&message).await {
            return Ok(ToolResult::from_channel_error(&e));
        }
        let output = process.read(window).await?;
        Ok(ToolResult::success(render_output(&output, PROCESS_ENDED)))
    }
}

/// Terminate the spawned process
#[derive(Debug, Default)]
pub struct KillProcTool;

#[async_trait]
impl Tool for KillProcTool {
    fn name(&self) -> &str {
        "kill-proc"
    }

    fn description(&self) -> &str {
        "Terminate the spawned process"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::new()
    }

    async fn execute(&self, _params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut sessions = context.sessions.lock().await;
        if !sessions.process().is_active() {
            sessions.close_channel(ChannelKind::Process).await?;
            return Ok(not_open("No active process to kill"));
        }
        match sessions.close_channel(ChannelKind::Process).await {
            Ok(_) => Ok(ToolResult::success("Process terminated".to_string())),
            Err(e) => Ok(ToolResult::from_channel_error(&e)),
        }
    }
}

/// Run one command over ssh in batch mode and collect its output
#[derive(Debug, Default)]
pub struct SshProcTool;

impl SshProcTool {
    fn ssh_args(host: &str, command: &str, port: u16, key_file: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if port != 22 {
            args.extend(["-p".to_string(), port.to_string()]);
        }
        if let Some(key) = key_file {
            args.extend(["-i".to_string(), key.to_string()]);
        }
        for option in [
            "StrictHostKeyChecking=no",
            "UserKnownHostsFile=/dev/null",
            "BatchMode=yes",
            "ConnectTimeout=10",
        ] {
            args.extend(["-o".to_string(), option.to_string()]);
        }
        args.push(host.to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl Tool for SshProcTool {
    fn name(&self) -> &str {
        "ssh-proc"
    }

    fn description(&self) -> &str {
        "Run a single command on a remote host over non-interactive SSH"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("host", "string", "Host, optionally user@host", required),
            param!("command", "string", "Command to run remotely", required),
            param!("port", "integer", "SSH port", optional, 22),
            param!("key_file", "string", "Private key file", optional),
            param!("timeout", "number", "Seconds before giving up", optional, 30),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let host: String = params.get_required("host")?;
        let command: String = params.get_required("command")?;
        let key_file: Option<String> = params.get_optional("key_file")?;
        let timeout: f64 = params.get_or("timeout", 30.0)?;
        let Some(port) = port_number(params.get_or("port", 22)?) else {
            return Ok(invalid_params("port must be between 1 and 65535"));
        };

        let env = context.sessions.lock().await.spawn_env();
        let mut ssh = Command::new("ssh");
        ssh.args(Self::ssh_args(&host, &command, port, key_file.as_deref()))
            .envs(env.iter())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(secs(timeout), ssh.output()).await {
            Err(_) => {
                return Ok(ToolResult::error_kind(
                    format!("SSH command timed out after {} seconds", timeout),
                    "timeout",
                ))
            }
            Ok(Err(e)) => return Ok(ToolResult::error(format!("SSH execution failed: {}", e))),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Ok(ToolResult::error_kind(
                format!("SSH command failed: {}", stderr),
                "command_failed",
            ));
        }
        Ok(ToolResult::success(stdout).with_metadata(json!({
            "stderr": stderr,
            "returncode": code,
            "host": host,
        })))
    }
}
