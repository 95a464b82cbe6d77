// Handlers for the interactive PTY terminal

use crate::helpers::{already_open, channel_failure, invalid_params, not_open, port_number, render_output};
use anyhow::Result;
use async_trait::async_trait;
use ptymux_channels::{Channel, TerminalSpawn};
use ptymux_toolcore::{param, ParameterDefinition, Tool, ToolCategory, ToolContext, ToolParameters, ToolResult};
use ptymux_types::{secs, ChannelKind};
use std::collections::HashMap;

const ALREADY_ACTIVE: &str = "PTY session already active. Disconnect first.";
const NOT_ACTIVE: &str = "No active PTY session. Use 'connect' or 'bash' first.";
const CLEAR_SCREEN: &[u8] = b"\x1b[2J\x1b[H";
const SESSION_ENDED: &str = "(terminal session ended)";

/// Open the terminal slot with `spawn` and return `header` plus the first output
async fn start_terminal(
    context: &ToolContext,
    spawn: TerminalSpawn,
    working_dir: Option<String>,
    header: String,
) -> Result<ToolResult> {
    let mut sessions = context.sessions.lock().await;
    if sessions.terminal().is_active() {
        return Ok(already_open(ALREADY_ACTIVE));
    }

    let spawn = spawn
        .working_dir(Some(sessions.working_dir_for(working_dir.as_deref())))
        .env(sessions.spawn_env());
    let window = secs(sessions.timeouts().terminal_start);

    let terminal = sessions.terminal();
    if let Err(e) = terminal.open(spawn).await {
        return Ok(ToolResult::from_channel_error(&e));
    }
    let output = terminal.read(window).await?;
    Ok(ToolResult::success(format!("{}\n{}", header, output.text())))
}

/// Start an arbitrary command in the PTY
#[derive(Debug, Default)]
pub struct ConnectTool;

#[async_trait]
impl Tool for ConnectTool {
    fn name(&self) -> &str {
        "connect"
    }

    fn description(&self) -> &str {
        "Start an interactive PTY session running the given command (default: bash)"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("command", "string", "Command to run in the terminal", optional, "bash"),
            param!("args", "array", "Arguments for the command", optional),
            param!("working_dir", "string", "Working directory (default: active project)", optional),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let command: String = params.get_or("command", "bash".to_string())?;
        let args: Vec<String> = params.get_or("args", Vec::new())?;
        let working_dir: Option<String> = params.get_optional("working_dir")?;

        let header = format!("PTY session started with command: {}", command);
        let spawn = TerminalSpawn::new(command).args(args);
        start_terminal(context, spawn, working_dir, header).await
    }
}

/// Start bash in the PTY
#[derive(Debug, Default)]
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Start an interactive bash shell in a PTY"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!(
            "working_dir",
            "string",
            "Working directory (default: active project)",
            optional
        )])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let working_dir: Option<String> = params.get_optional("working_dir")?;
        start_terminal(
            context,
            TerminalSpawn::new("bash"),
            working_dir,
            "Bash PTY session started".to_string(),
        )
        .await
    }
}

/// Interactive ssh client in the PTY
#[derive(Debug, Default)]
pub struct SshTool;

impl SshTool {
    fn ssh_args(host: &str, user: Option<&str>, port: u16, key_file: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-p".to_string(),
            port.to_string(),
        ];
        if let Some(key) = key_file {
            args.push("-i".to_string());
            args.push(key.to_string());
        }
        args.push(match user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        });
        args
    }
}

#[async_trait]
impl Tool for SshTool {
    fn name(&self) -> &str {
        "ssh"
    }

    fn description(&self) -> &str {
        "Open an interactive SSH session in a PTY"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("host", "string", "Host to connect to", required),
            param!("user", "string", "Remote user name", optional),
            param!("port", "integer", "SSH port", optional, 22),
            param!("key_file", "string", "Private key file", optional),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let host: String = params.get_required("host")?;
        let user: Option<String> = params
            .get_optional::<String>("user")?
            .filter(|u| !u.is_empty());
        let key_file: Option<String> = params.get_optional("key_file")?;
        let Some(port) = port_number(params.get_or("port", 22)?) else {
            return Ok(invalid_params("port must be between 1 and 65535"));
        };

        let target = match &user {
            Some(user) => format!("{}@{}", user, host),
            None => host.clone(),
        };
        let args = Self::ssh_args(&host, user.as_deref(), port, key_file.as_deref());
        let header = format!("SSH session started to {}:{}", target, port);
        start_terminal(context, TerminalSpawn::new("ssh").args(args), None, header).await
    }
}

/// Interactive telnet client in the PTY
#[derive(Debug, Default)]
pub struct TelnetTool;

#[async_trait]
impl Tool for TelnetTool {
    fn name(&self) -> &str {
        "telnet"
    }

    fn description(&self) -> &str {
        "Open an interactive telnet session in a PTY"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("host", "string", "Host to connect to", required),
            param!("port", "integer", "Telnet port", optional, 23),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let host: String = params.get_required("host")?;
        let Some(port) = port_number(params.get_or("port", 23)?) else {
            return Ok(invalid_params("port must be between 1 and 65535"));
        };

        let header = format!("Telnet session started to {}:{}", host, port);
        let spawn = TerminalSpawn::new("telnet").args([host, port.to_string()]);
        start_terminal(context, spawn, None, header).await
    }
}

/// Type a line into the PTY and return what comes back
#[derive(Debug, Default)]
pub struct SendTool;

#[async_trait]
impl Tool for SendTool {
    fn name(&self) -> &str {
        "send"
    }

    fn description(&self) -> &str {
        "Send a line of input to the PTY session and return its output"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!("message", "string", "Text to send; a newline is appended", required)])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let message: String = params.get_required("message")?;

        let mut sessions = context.sessions.lock().await;
        let window = secs(sessions.timeouts().terminal_send);
        let terminal = sessions.terminal();
        if !terminal.is_active() {
            return Ok(not_open(NOT_ACTIVE));
        }

        if let Err(e) = terminal.send(&message).await {
            return Ok(ToolResult::from_channel_error(&e));
        }
        let output = terminal.read(window).await?;
        Ok(ToolResult::success(render_output(&output, SESSION_ENDED)))
    }
}

/// Change the PTY window size
#[derive(Debug, Default)]
pub struct ResizeTool;

#[async_trait]
impl Tool for ResizeTool {
    fn name(&self) -> &str {
        "resize"
    }

    fn description(&self) -> &str {
        "Resize the PTY window"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("width", "integer", "Columns", optional, 80),
            param!("height", "integer", "Rows", optional, 24),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let width: i64 = params.get_or("width", 80)?;
        let height: i64 = params.get_or("height", 24)?;
        let (Some(cols), Some(rows)) = (port_number(width), port_number(height)) else {
            return Ok(invalid_params("width and height must be between 1 and 65535"));
        };

        let mut sessions = context.sessions.lock().await;
        let terminal = sessions.terminal();
        if !terminal.is_active() {
            return Ok(not_open("No active PTY session to resize"));
        }
        match terminal.resize(rows, cols) {
            Ok(()) => Ok(ToolResult::success(format!(
                "Terminal resized to {}x{} (width x height)",
                cols, rows
            ))),
            Err(e) => Ok(ToolResult::from_channel_error(&e)),
        }
    }
}

/// Clear the PTY screen
#[derive(Debug, Default)]
pub struct ClearTool;

#[async_trait]
impl Tool for ClearTool {
    fn name(&self) -> &str {
        "clear"
    }

    fn description(&self) -> &str {
        "Clear the PTY screen"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::new()
    }

    async fn execute(&self, _params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut sessions = context.sessions.lock().await;
        let terminal = sessions.terminal();
        if !terminal.is_active() {
            return Ok(not_open("No active PTY session"));
        }
        match terminal.write_raw(CLEAR_SCREEN) {
            Ok(_) => Ok(ToolResult::success("PTY terminal cleared".to_string())),
            Err(e) => Ok(channel_failure("Failed to clear terminal", &e)),
        }
    }
}

/// Terminate the PTY session
#[derive(Debug, Default)]
pub struct DisconnectTool;

#[async_trait]
impl Tool for DisconnectTool {
    fn name(&self) -> &str {
        "disconnect"
    }

    fn description(&self) -> &str {
        "Terminate the PTY session"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::new()
    }

    async fn execute(&self, _params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut sessions = context.sessions.lock().await;
        if !sessions.terminal().is_active() {
            // Release whatever an exited child left in the slot
            sessions.close_channel(ChannelKind::Terminal).await?;
            return Ok(not_open("No active PTY session"));
        }
        match sessions.close_channel(ChannelKind::Terminal).await {
            Ok(_) => Ok(ToolResult::success("PTY session terminated".to_string())),
            Err(e) => Ok(ToolResult::from_channel_error(&e)),
        }
    }
}
