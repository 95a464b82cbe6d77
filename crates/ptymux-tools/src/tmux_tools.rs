// Handlers for detached tmux sessions

use anyhow::Result;
use async_trait::async_trait;
use ptymux_channels::tmux::DETACH_INSTRUCTIONS;
use ptymux_channels::ChannelError;
use ptymux_toolcore::{param, ParameterDefinition, Tool, ToolCategory, ToolContext, ToolParameters, ToolResult};
use std::collections::HashMap;

fn session_name_param() -> (String, ParameterDefinition) {
    param!("session_name", "string", "Name of the tmux session", required)
}

fn multiplexer_failure(err: &ChannelError) -> ToolResult {
    match err {
        ChannelError::ExternalToolMissing(binary) => ToolResult::error_kind(
            format!("{} is not installed. Install with: sudo apt install tmux", binary),
            err.kind_name(),
        ),
        _ => ToolResult::from_channel_error(err),
    }
}

/// Start a detached session
#[derive(Debug, Default)]
pub struct TmuxStartTool;

#[async_trait]
impl Tool for TmuxStartTool {
    fn name(&self) -> &str {
        "tmux-start"
    }

    fn description(&self) -> &str {
        "Start a command in a new detached tmux session that keeps running in the background"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tmux
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            session_name_param(),
            param!("command", "string", "Command to run (default: the user's shell)", optional),
            param!("working_dir", "string", "Working directory (default: active project)", optional),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let name: String = params.get_required("session_name")?;
        let command: String = params.get_or("command", String::new())?;
        let working_dir: Option<String> = params.get_optional("working_dir")?;

        let mut sessions = context.sessions.lock().await;
        let dir = sessions.working_dir_for(working_dir.as_deref());
        let env = sessions.spawn_env();
        let multiplexer = sessions.multiplexer();

        if let Err(e) = multiplexer.check_installed() {
            return Ok(multiplexer_failure(&e));
        }
        if let Err(e) = multiplexer.start(&name, &command, Some(&dir), &env) {
            return Ok(multiplexer_failure(&e));
        }
        let attach = match multiplexer.attach_command(&name) {
            Ok(info) => info.command,
            Err(e) => return Ok(multiplexer_failure(&e)),
        };

        let shown = if command.trim().is_empty() { "(default shell)" } else { command.as_str() };
        Ok(ToolResult::success(format!(
            "Started tmux session '{name}'\n\n\
             Session: {name}\n\
             Command: {shown}\n\n\
             The process is running in background.\n\
             • To attach: {attach}\n\
             • To detach: {DETACH_INSTRUCTIONS}\n\
             • To capture output: Use tmux-capture tool\n\
             • To send commands: Use tmux-send tool"
        )))
    }
}

/// List sessions on the tmux server
#[derive(Debug, Default)]
pub struct TmuxListTool;

#[async_trait]
impl Tool for TmuxListTool {
    fn name(&self) -> &str {
        "tmux-list"
    }

    fn description(&self) -> &str {
        "List tmux sessions and whether a client is attached"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tmux
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::new()
    }

    async fn execute(&self, _params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut sessions = context.sessions.lock().await;
        let listed = match sessions.multiplexer().list() {
            Ok(listed) => listed,
            Err(e) => return Ok(multiplexer_failure(&e)),
        };
        if listed.is_empty() {
            return Ok(ToolResult::success("No active tmux sessions found.".to_string()));
        }

        let mut output = String::from("Active tmux sessions:\n");
        for session in &listed {
            let state = if session.attached { "Attached" } else { "Detached" };
            let created = session
                .created_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            output.push_str(&format!(
                "\n• {} - {}\n  Created: {}\n",
                session.name, state, created
            ));
        }
        Ok(ToolResult::success(output.trim_end().to_string())
            .with_metadata(serde_json::to_value(&listed)?))
    }
}

/// Type a command into a session
#[derive(Debug, Default)]
pub struct TmuxSendTool;

#[async_trait]
impl Tool for TmuxSendTool {
    fn name(&self) -> &str {
        "tmux-send"
    }

    fn description(&self) -> &str {
        "Type a command into a tmux session and press Enter"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tmux
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            session_name_param(),
            param!("command", "string", "Keys to send", required),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let name: String = params.get_required("session_name")?;
        let command: String = params.get_required("command")?;

        let mut sessions = context.sessions.lock().await;
        match sessions.multiplexer().send_keys(&name, &command) {
            Ok(()) => Ok(ToolResult::success(format!(
                "Sent keys to session '{}'\nSent: {}",
                name, command
            ))),
            Err(e) => Ok(multiplexer_failure(&e)),
        }
    }
}

/// Capture pane text
#[derive(Debug, Default)]
pub struct TmuxCaptureTool;

#[async_trait]
impl Tool for TmuxCaptureTool {
    fn name(&self) -> &str {
        "tmux-capture"
    }

    fn description(&self) -> &str {
        "Capture the visible pane of a tmux session, or its last N lines"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tmux
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            session_name_param(),
            param!("lines", "integer", "Number of lines from the end, including scrollback", optional),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let name: String = params.get_required("session_name")?;
        let lines: Option<i64> = params.get_optional("lines")?;
        let lines = lines.and_then(|n| usize::try_from(n).ok());

        let mut sessions = context.sessions.lock().await;
        match sessions.multiplexer().capture(&name, lines) {
            Ok(output) => Ok(ToolResult::success(format!(
                "Output from session '{}':\n\n{}",
                name, output
            ))),
            Err(e) => Ok(multiplexer_failure(&e)),
        }
    }
}

/// Kill a session
#[derive(Debug, Default)]
pub struct TmuxKillTool;

#[async_trait]
impl Tool for TmuxKillTool {
    fn name(&self) -> &str {
        "tmux-kill"
    }

    fn description(&self) -> &str {
        "Kill a tmux session and everything running in it"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tmux
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([session_name_param()])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let name: String = params.get_required("session_name")?;

        let mut sessions = context.sessions.lock().await;
        match sessions.multiplexer().kill(&name) {
            Ok(()) => Ok(ToolResult::success(format!("Killed session '{}'", name))),
            Err(e) => Ok(multiplexer_failure(&e)),
        }
    }
}

/// How a human attaches to a session
#[derive(Debug, Default)]
pub struct TmuxAttachTool;

#[async_trait]
impl Tool for TmuxAttachTool {
    fn name(&self) -> &str {
        "tmux-attach"
    }

    fn description(&self) -> &str {
        "Show the command a user runs to attach to a tmux session"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Tmux
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([session_name_param()])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let name: String = params.get_required("session_name")?;

        let mut sessions = context.sessions.lock().await;
        let info = match sessions.multiplexer().attach_command(&name) {
            Ok(info) => info,
            Err(e) => return Ok(multiplexer_failure(&e)),
        };

        Ok(ToolResult::success(format!(
            "To attach to session '{}', run:\n  {}\n\n\
             Once attached:\n\
             • Interact normally with the process\n\
             • {} (process keeps running)\n\
             • You can re-attach anytime with the same command",
            info.session_name, info.command, info.instructions
        ))
        .with_metadata(serde_json::to_value(&info)?))
    }
}
