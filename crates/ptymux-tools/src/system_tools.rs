// Status, project, environment and one-shot command handlers

use crate::helpers::invalid_params;
use anyhow::Result;
use async_trait::async_trait;
use ptymux_logging::safe_truncate;
use ptymux_session::{ChannelStatus, ConfigError};
use ptymux_toolcore::{param, ParameterDefinition, Tool, ToolCategory, ToolContext, ToolParameters, ToolResult};
use ptymux_types::{secs, ChannelKind};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

const LISTED_VALUE_CHARS: usize = 100;
const DEFAULT_EXEC_TIMEOUT: f64 = 30.0;

fn channel_label(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Terminal => "PTY",
        ChannelKind::Process => "Process",
        ChannelKind::Socket => "Socket",
        ChannelKind::Serial => "Serial",
    }
}

/// Flatten a channel status into `{type, active, ..details}`
fn session_entry(status: &ChannelStatus) -> Map<String, Value> {
    let mut entry = Map::new();
    if let Value::Object(details) = &status.details {
        entry.extend(details.clone());
    }
    entry.insert("type".to_string(), json!(channel_label(status.kind)));
    entry.insert("active".to_string(), json!(status.active));
    entry
}

/// Overview of every slot; stale channels are released first
#[derive(Debug, Default)]
pub struct StatusTool;

#[async_trait]
impl Tool for StatusTool {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Show which sessions are active and which project is selected"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::System
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!("verbose", "boolean", "Include channel details", optional, false)])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let verbose: bool = params.get_or("verbose", false)?;

        let mut sessions = context.sessions.lock().await;
        sessions.prune_inactive().await;
        let status = sessions.status();

        let state = |kind: ChannelKind| {
            if status.channels.iter().any(|c| c.kind == kind && c.active) {
                "Active"
            } else {
                "None"
            }
        };

        let mut lines = vec!["=== ptymux Status ===".to_string()];
        for kind in ChannelKind::ALL {
            lines.push(format!("{} Session: {}", channel_label(kind), state(kind)));
        }
        lines.push(format!(
            "Tmux Sessions: {} tracked",
            status.tracked_multiplexer_sessions.len()
        ));
        lines.push(match &status.active_project {
            Some(project) => format!("Active Project: {} ({})", project.name, project.path.display()),
            None => "Active Project: None".to_string(),
        });

        let details = serde_json::to_value(&status)?;
        if verbose {
            lines.push(String::new());
            lines.push(serde_json::to_string_pretty(&details)?);
        }
        Ok(ToolResult::success(lines.join("\n")).with_metadata(details))
    }
}

/// List open channels as json, a table or a one-line summary
#[derive(Debug, Default)]
pub struct SessionsTool;

#[async_trait]
impl Tool for SessionsTool {
    fn name(&self) -> &str {
        "sessions"
    }

    fn description(&self) -> &str {
        "List open sessions"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::System
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!("format", "string", "json, table or summary", optional, "summary")])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let format: String = params.get_or("format", "summary".to_string())?;

        let entries: Vec<Map<String, Value>> = {
            let mut sessions = context.sessions.lock().await;
            sessions.status().channels.iter().map(session_entry).collect()
        };

        let content = match format.as_str() {
            "json" => serde_json::to_string_pretty(&entries)?,
            "table" if entries.is_empty() => "No active sessions".to_string(),
            "table" => {
                let mut lines = vec!["Active Sessions:".to_string(), "=".repeat(40)];
                for (i, entry) in entries.iter().enumerate() {
                    let kind = entry.get("type").and_then(Value::as_str).unwrap_or("Unknown");
                    lines.push(format!("{}. {} Session", i + 1, kind));
                    for (key, value) in entry.iter().filter(|(k, _)| k.as_str() != "type") {
                        let shown = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        lines.push(format!("   {}: {}", key, shown));
                    }
                }
                lines.join("\n")
            }
            "summary" => {
                let active: Vec<&str> = entries
                    .iter()
                    .filter(|e| e.get("active") == Some(&Value::Bool(true)))
                    .filter_map(|e| e.get("type").and_then(Value::as_str))
                    .collect();
                if active.is_empty() {
                    "No active sessions".to_string()
                } else {
                    format!("{} active session(s): {}", active.len(), active.join(", "))
                }
            }
            other => {
                return Ok(invalid_params(format!(
                    "Unknown format '{}'. Use json, table or summary",
                    other
                )))
            }
        };
        Ok(ToolResult::success(content))
    }
}

/// Registered projects and the active one
#[derive(Debug, Default)]
pub struct ProjectsTool;

#[async_trait]
impl Tool for ProjectsTool {
    fn name(&self) -> &str {
        "projects"
    }

    fn description(&self) -> &str {
        "List registered projects"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::System
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::new()
    }

    async fn execute(&self, _params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let sessions = context.sessions.lock().await;
        let config = sessions.project_config();
        let listing = json!({
            "projects": config.projects,
            "default": config.default,
            "active": sessions.active_project().map(|p| p.name.clone()),
        });
        Ok(ToolResult::success(serde_json::to_string_pretty(&listing)?).with_metadata(listing))
    }
}

/// Select the project whose path and `.env` apply to new spawns
#[derive(Debug, Default)]
pub struct ActivateTool;

#[async_trait]
impl Tool for ActivateTool {
    fn name(&self) -> &str {
        "activate"
    }

    fn description(&self) -> &str {
        "Activate a registered project: new sessions start in its directory with its .env loaded"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::System
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!("project_name", "string", "Registered project name", required)])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let name: String = params.get_required("project_name")?;

        let mut sessions = context.sessions.lock().await;
        let report = match sessions.set_active_project(&name) {
            Ok(report) => report,
            Err(e @ (ConfigError::UnknownProject { .. } | ConfigError::MissingPath(_))) => {
                return Ok(ToolResult::error_kind(e.to_string(), "not_found"))
            }
            Err(e) => return Ok(ToolResult::error_kind(e.to_string(), "config_error")),
        };
        let path = sessions
            .active_project()
            .map(|p| p.path.clone())
            .unwrap_or_default();

        info!(project = %name, "activated via tool call");
        let result = json!({
            "status": "success",
            "project": name,
            "path": path,
            "environment": {
                "loaded": report.env_file_found,
                "env_count": report.env_count,
                "env_file": report.env_file,
                "note": "Environment applies to sessions started after activation",
            },
        });
        Ok(ToolResult::success(serde_json::to_string_pretty(&result)?).with_metadata(result))
    }
}

/// Read and edit the environment handed to new spawns
#[derive(Debug, Default)]
pub struct EnvTool;

#[async_trait]
impl Tool for EnvTool {
    fn name(&self) -> &str {
        "env"
    }

    fn description(&self) -> &str {
        "Get, set, unset or list environment variables applied to new sessions"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::System
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("action", "string", "get, set, unset or list", required),
            param!("name", "string", "Variable name", optional),
            param!("value", "string", "Value for set", optional),
            param!("filter", "string", "Case-insensitive substring for list", optional),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let action: String = params.get_required("action")?;
        let name: String = params.get_or("name", String::new())?;

        let needs_name = matches!(action.as_str(), "get" | "set" | "unset");
        if needs_name && name.is_empty() {
            return Ok(invalid_params(format!(
                "Variable name required for {} action",
                action
            )));
        }

        let mut sessions = context.sessions.lock().await;
        match action.as_str() {
            "get" => Ok(match sessions.env_value(&name) {
                Some(value) => ToolResult::success(value),
                None => ToolResult::error_kind(
                    format!("Environment variable '{}' not found", name),
                    "not_found",
                ),
            }),
            "set" => {
                let value: String = params.get_or("value", String::new())?;
                sessions.set_env_var(&name, &value);
                Ok(ToolResult::success(format!("Set {}={}", name, value)))
            }
            "unset" => Ok(match sessions.unset_env_var(&name) {
                Some(_) => ToolResult::success(format!("Unset {}", name)),
                None => ToolResult::error_kind(format!("Variable '{}' not found", name), "not_found"),
            }),
            "list" => {
                let filter = params.get_or("filter", String::new())?.to_lowercase();
                let vars: Map<String, Value> = sessions
                    .effective_env()
                    .into_iter()
                    .filter(|(key, _)| filter.is_empty() || key.to_lowercase().contains(&filter))
                    .map(|(key, value)| (key, json!(safe_truncate(&value, LISTED_VALUE_CHARS))))
                    .collect();
                if vars.is_empty() {
                    return Ok(ToolResult::success(
                        "No matching environment variables found".to_string(),
                    ));
                }
                Ok(ToolResult::success(serde_json::to_string_pretty(&vars)?))
            }
            other => Ok(invalid_params(format!("Unknown action: {}", other))),
        }
    }
}

/// Run a shell command to completion
#[derive(Debug, Default)]
pub struct ExecTool;

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command to completion and return stdout, stderr and the exit code"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::System
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("command", "string", "Shell command line", required),
            param!("working_dir", "string", "Working directory (default: active project)", optional),
            param!("timeout", "number", "Seconds before the command is killed", optional, DEFAULT_EXEC_TIMEOUT),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let command: String = params.get_required("command")?;
        let working_dir: Option<String> = params.get_optional("working_dir")?;
        let timeout: f64 = params.get_or("timeout", DEFAULT_EXEC_TIMEOUT)?;

        let (cwd, env) = {
            let sessions = context.sessions.lock().await;
            (sessions.working_dir_for(working_dir.as_deref()), sessions.spawn_env())
        };

        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .envs(env.iter())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(secs(timeout), shell.output()).await {
            Err(_) => {
                return Ok(ToolResult::error_kind(
                    format!("Command timed out after {} seconds", timeout),
                    "timeout",
                ))
            }
            Ok(Err(e)) => {
                return Ok(ToolResult::error_kind(
                    format!("Failed to run command in {}: {}", cwd.display(), e),
                    "os_failure",
                ))
            }
            Ok(Ok(output)) => output,
        };

        let result = json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "return_code": output.status.code().unwrap_or(-1),
            "cwd": cwd,
        });
        Ok(ToolResult::success(serde_json::to_string_pretty(&result)?).with_metadata(result))
    }
}
