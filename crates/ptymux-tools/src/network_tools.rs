// Handlers for the raw TCP/UDP socket and the one-shot telnet handshake

use crate::helpers::{already_open, channel_failure, invalid_params, normalize_http_request, not_open, port_number};
use anyhow::Result;
use async_trait::async_trait;
use ptymux_channels::socket::DEFAULT_CONNECT_TIMEOUT;
use ptymux_channels::{telnet, Channel};
use ptymux_toolcore::{param, ParameterDefinition, Tool, ToolCategory, ToolContext, ToolParameters, ToolResult};
use ptymux_types::{secs, ChannelKind, Protocol, ReadOutput, CLOSED_MESSAGE};
use std::collections::HashMap;
use std::time::Duration;

const NO_SOCKET: &str = "No active socket. Open one with socket-open first.";
/// Give the peer a moment before the first read of a request/response pair
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Connect the socket slot
#[derive(Debug, Default)]
pub struct SocketOpenTool;

#[async_trait]
impl Tool for SocketOpenTool {
    fn name(&self) -> &str {
        "socket-open"
    }

    fn description(&self) -> &str {
        "Open a TCP or UDP socket connection"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("host", "string", "Host name or address", required),
            param!("port", "integer", "Port number", required),
            param!("protocol", "string", "tcp or udp", optional, "tcp"),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let host: String = params.get_required("host")?;
        let protocol: String = params.get_or("protocol", "tcp".to_string())?;
        let Some(port) = port_number(params.get_required("port")?) else {
            return Ok(invalid_params("port must be between 1 and 65535"));
        };
        let protocol: Protocol = match protocol.parse() {
            Ok(protocol) => protocol,
            Err(e) => return Ok(invalid_params(e)),
        };

        let mut sessions = context.sessions.lock().await;
        let socket = sessions.socket();
        if socket.is_active() {
            return Ok(already_open("Socket already open. Close it first."));
        }

        match socket.open(&host, port, protocol).await {
            Ok(()) => Ok(ToolResult::success(format!(
                "Socket opened to {}:{} ({})",
                host, port, protocol
            ))),
            Err(e) => Ok(channel_failure("Failed to open socket", &e)),
        }
    }
}

/// Write data verbatim, fixing up HTTP requests
#[derive(Debug, Default)]
pub struct SocketWriteTool;

#[async_trait]
impl Tool for SocketWriteTool {
    fn name(&self) -> &str {
        "socket-write"
    }

    fn description(&self) -> &str {
        "Write data to the open socket. HTTP requests get CRLF line endings."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!("data", "string", "Data to send", required)])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let data: String = params.get_required("data")?;
        let (payload, notes) = normalize_http_request(&data).unwrap_or((data, Vec::new()));

        let mut sessions = context.sessions.lock().await;
        let socket = sessions.socket();
        if !socket.is_active() {
            return Ok(not_open(NO_SOCKET));
        }

        match socket.send(&payload).await {
            Ok(sent) => {
                let mut content = format!("Sent {} bytes", sent);
                for note in notes {
                    content.push('\n');
                    content.push_str(&note);
                }
                Ok(ToolResult::success(content))
            }
            Err(e) => Ok(ToolResult::from_channel_error(&e)),
        }
    }
}

/// One bounded read from the socket
#[derive(Debug, Default)]
pub struct SocketReadTool;

#[async_trait]
impl Tool for SocketReadTool {
    fn name(&self) -> &str {
        "socket-read"
    }

    fn description(&self) -> &str {
        "Read whatever arrives on the socket within the timeout"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!("timeout", "number", "Seconds to wait for data", optional, 2.0)])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut sessions = context.sessions.lock().await;
        let timeout: f64 = params.get_or("timeout", sessions.timeouts().socket)?;
        let socket = sessions.socket();
        if !socket.is_active() {
            return Ok(not_open(NO_SOCKET));
        }

        match socket.read(secs(timeout)).await {
            Ok(output) => Ok(ToolResult::success(output.to_string())),
            Err(e) => Ok(channel_failure("Read error", &e)),
        }
    }
}

/// Send one message and wait for the reply
#[derive(Debug, Default)]
pub struct SocketMessageTool;

#[async_trait]
impl Tool for SocketMessageTool {
    fn name(&self) -> &str {
        "socket-message"
    }

    fn description(&self) -> &str {
        "Send a message on the socket and wait for a response"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("message", "string", "Message to send", required),
            param!("wait_for_prompt", "boolean", "Wait for a response", optional, true),
            param!("prompt_timeout", "number", "Seconds to wait for a response", optional, 5.0),
            param!("add_newline", "boolean", "Append \\n when missing", optional, true),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut message: String = params.get_required("message")?;
        let wait_for_prompt: bool = params.get_or("wait_for_prompt", true)?;
        let prompt_timeout: f64 = params.get_or("prompt_timeout", 5.0)?;
        let add_newline: bool = params.get_or("add_newline", true)?;

        if add_newline && !message.ends_with('\n') {
            message.push('\n');
        }

        let mut sessions = context.sessions.lock().await;
        let socket = sessions.socket();
        if !socket.is_active() {
            return Ok(not_open(NO_SOCKET));
        }

        let sent = match socket.send(&message).await {
            Ok(sent) => sent,
            Err(e) => return Ok(channel_failure("Failed to send message", &e)),
        };
        let mut content = format!("Sent {} bytes", sent);

        if wait_for_prompt {
            tokio::time::sleep(SETTLE_DELAY).await;
            match socket.read(secs(prompt_timeout)).await {
                Ok(ReadOutput::Data(data)) => {
                    content.push_str("\n\nReceived:\n");
                    content.push_str(&data);
                }
                Ok(ReadOutput::NoData) => {
                    content.push_str(&format!("\n\n(No response within {}s timeout)", prompt_timeout));
                }
                Ok(ReadOutput::Closed) => {
                    content.push_str("\n\n");
                    content.push_str(CLOSED_MESSAGE);
                }
                Err(e) => return Ok(channel_failure("Failed to send message", &e)),
            }
        }

        Ok(ToolResult::success(content))
    }
}

/// Close the socket slot
#[derive(Debug, Default)]
pub struct SocketCloseTool;

#[async_trait]
impl Tool for SocketCloseTool {
    fn name(&self) -> &str {
        "socket-close"
    }

    fn description(&self) -> &str {
        "Close the open socket"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::new()
    }

    async fn execute(&self, _params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut sessions = context.sessions.lock().await;
        if !sessions.socket().is_active() {
            return Ok(not_open("No active socket to close"));
        }
        match sessions.close_channel(ChannelKind::Socket).await {
            Ok(_) => Ok(ToolResult::success("Socket closed successfully".to_string())),
            Err(e) => Ok(ToolResult::from_channel_error(&e)),
        }
    }
}

/// Throwaway telnet connection that refuses every option and shows the banner
#[derive(Debug, Default)]
pub struct SocketTelnetTool;

#[async_trait]
impl Tool for SocketTelnetTool {
    fn name(&self) -> &str {
        "socket-telnet"
    }

    fn description(&self) -> &str {
        "Check a telnet server: negotiate options, read the banner, disconnect"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("host", "string", "Host name or address", required),
            param!("port", "integer", "Telnet port", optional, 23),
            param!("initial_read", "boolean", "Read the login banner", optional, true),
            param!("timeout", "number", "Connect timeout in seconds", optional, 10),
        ])
    }

    async fn execute(&self, params: ToolParameters, _context: &ToolContext) -> Result<ToolResult> {
        let host: String = params.get_required("host")?;
        let initial_read: bool = params.get_or("initial_read", true)?;
        let connect_timeout = params
            .get_optional::<f64>("timeout")?
            .map(secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let Some(port) = port_number(params.get_or("port", 23)?) else {
            return Ok(invalid_params("port must be between 1 and 65535"));
        };

        let handshake = match telnet::handshake(&host, port, initial_read, connect_timeout).await {
            Ok(handshake) => handshake,
            Err(e) => return Ok(channel_failure("Telnet connection failed", &e)),
        };

        let mut content = format!("Connected to {}:{}\n", host, port);
        if handshake.negotiation.is_empty() {
            content.push_str("Negotiation: No negotiation needed\n");
        } else {
            content.push_str(&format!("Negotiation: {}\n", handshake.negotiation.join(", ")));
        }
        if initial_read {
            match &handshake.banner {
                Some(banner) => {
                    content.push_str("\nBanner:\n");
                    content.push_str(&String::from_utf8_lossy(banner));
                }
                None => content.push_str("\n(No banner received)"),
            }
        }
        content.push_str("\n\nTelnet handshake complete. Use socket-open to establish a persistent session.");
        Ok(ToolResult::success(content))
    }
}
