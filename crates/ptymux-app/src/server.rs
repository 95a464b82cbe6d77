//! Line-delimited JSON-RPC 2.0 over stdio.
//!
//! One request per line, one response per line. Requests are handled one at
//! a time, so tool calls never interleave.

use anyhow::{Context, Result};
use ptymux_logging::{CallLogger, CallRecord};
use ptymux_session::CleanupReport;
use ptymux_toolcore::{ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "ptymux";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn response(id: Value, outcome: Result<Value, RpcError>) -> Value {
    match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": e.code, "message": e.message },
        }),
    }
}

pub struct Server {
    registry: ToolRegistry,
    context: ToolContext,
    call_log: Option<CallLogger>,
}

impl Server {
    pub fn new(registry: ToolRegistry, context: ToolContext) -> Self {
        Self {
            registry,
            context,
            call_log: None,
        }
    }

    pub fn with_call_log(mut self, logger: CallLogger) -> Self {
        info!(path = %logger.path().display(), "call log enabled");
        self.call_log = Some(logger);
        self
    }

    /// Handle one raw line. Notifications produce no response.
    pub async fn handle_line(&mut self, line: &str) -> Option<Value> {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparsable request");
                return Some(response(
                    Value::Null,
                    Err(RpcError::new(PARSE_ERROR, format!("Parse error: {}", e))),
                ));
            }
        };

        let id = message.get("id").cloned();
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return Some(response(
                id.unwrap_or(Value::Null),
                Err(RpcError::new(INVALID_REQUEST, "Invalid request: missing method")),
            ));
        };

        let Some(id) = id else {
            debug!(method, "notification ignored");
            return None;
        };

        let params = message.get("params").cloned().unwrap_or(Value::Null);
        Some(response(id, self.dispatch(method, params).await))
    }

    async fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.mcp_definitions() })),
            "tools/call" => self.call_tool(params).await,
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        json!({
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    async fn call_tool(&mut self, params: Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "tools/call requires a tool name"))?
            .to_string();
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments.clone(),
        };

        let context = self.context.for_call();
        info!(tool = %name, call_id = %context.call_id, "tool call");

        let started = Instant::now();
        let result = self.registry.execute(&name, arguments.clone(), &context).await;

        if let Some(logger) = self.call_log.as_mut() {
            let record = CallRecord::new(&context.call_id, &name, arguments).finished(
                result.success,
                result.text(),
                started.elapsed(),
            );
            if let Err(e) = logger.log(&record) {
                warn!(error = %e, "failed to write call log");
            }
        }

        Ok(result.to_mcp_response())
    }

    /// Serve until EOF on `reader` or until `shutdown` resolves, then
    /// release every session. Sessions are released on I/O errors too.
    pub async fn serve_until<R, W, F>(&mut self, mut reader: R, mut writer: W, shutdown: F) -> Result<CleanupReport>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let mut raw = Vec::new();
        tokio::pin!(shutdown);

        let outcome: Result<()> = loop {
            raw.clear();
            tokio::select! {
                read = reader.read_until(b'\n', &mut raw) => {
                    match read {
                        Ok(0) => {
                            info!("input closed");
                            break Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => break Err(anyhow::Error::new(e).context("Failed to read request")),
                    }
                    if let Err(e) = self.respond(&raw, &mut writer).await {
                        break Err(e);
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
            }
        };

        let report = self.shutdown().await;
        outcome.map(|()| report)
    }

    /// Answer one raw request line; bytes that are not UTF-8 get a parse error.
    async fn respond<W>(&mut self, raw: &[u8], writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let reply = match std::str::from_utf8(raw) {
            Ok(line) if line.trim().is_empty() => return Ok(()),
            Ok(line) => self.handle_line(line.trim()).await,
            Err(e) => {
                warn!(error = %e, "request is not valid UTF-8");
                Some(response(
                    Value::Null,
                    Err(RpcError::new(PARSE_ERROR, format!("Parse error: {}", e))),
                ))
            }
        };

        if let Some(reply) = reply {
            let mut out = serde_json::to_string(&reply)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await.context("Failed to write response")?;
            writer.flush().await.context("Failed to write response")?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> CleanupReport {
        self.context.sessions.lock().await.cleanup_all().await
    }
}
