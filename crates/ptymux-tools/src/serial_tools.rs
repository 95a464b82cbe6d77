// Handlers for the serial port

use crate::helpers::{already_open, channel_failure, contains_prompt, invalid_params, not_open};
use anyhow::Result;
use async_trait::async_trait;
use ptymux_channels::serial::DEFAULT_BAUD_RATE;
use ptymux_channels::{Channel, SerialSettings};
use ptymux_toolcore::{param, ParameterDefinition, Tool, ToolCategory, ToolContext, ToolParameters, ToolResult};
use ptymux_types::{secs, ChannelKind, ReadOutput};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

const NO_SERIAL: &str = "No active serial connection. Use serial-open first.";
const NO_SERIAL_DATA: &str = "(no data received)";
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Open the serial slot
#[derive(Debug, Default)]
pub struct SerialOpenTool;

#[async_trait]
impl Tool for SerialOpenTool {
    fn name(&self) -> &str {
        "serial-open"
    }

    fn description(&self) -> &str {
        "Open a serial port"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Serial
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("device", "string", "Device path, e.g. /dev/ttyUSB0", required),
            param!("baudrate", "integer", "Baud rate", optional, DEFAULT_BAUD_RATE),
            param!("bytesize", "integer", "Data bits (5-8)", optional, 8),
            param!("parity", "string", "none, even or odd", optional, "none"),
            param!("stopbits", "number", "Stop bits (1 or 2)", optional, 1),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let device: String = params.get_required("device")?;
        let baudrate: i64 = params.get_or("baudrate", i64::from(DEFAULT_BAUD_RATE))?;
        let bytesize: i64 = params.get_or("bytesize", 8)?;
        let parity: String = params.get_or("parity", "none".to_string())?;
        let stopbits: f64 = params.get_or("stopbits", 1.0)?;

        let (Ok(baud), Ok(bits)) = (u32::try_from(baudrate), u8::try_from(bytesize)) else {
            return Ok(invalid_params("baudrate or bytesize out of range"));
        };
        let settings = match SerialSettings::parse(baud, bits, &parity, stopbits) {
            Ok(settings) => settings,
            Err(e) => return Ok(ToolResult::from_channel_error(&e)),
        };

        let mut sessions = context.sessions.lock().await;
        let serial = sessions.serial();
        if serial.is_active() {
            return Ok(already_open("Serial port already open. Close it first."));
        }

        match serial.open(&device, settings).await {
            Ok(()) => Ok(ToolResult::success(format!(
                "Serial port opened: {} at {} baud",
                device, baud
            ))),
            Err(e) => Ok(channel_failure("Failed to open serial port", &e)),
        }
    }
}

/// Write raw data to the port
#[derive(Debug, Default)]
pub struct SerialWriteTool;

#[async_trait]
impl Tool for SerialWriteTool {
    fn name(&self) -> &str {
        "serial-write"
    }

    fn description(&self) -> &str {
        "Write data to the serial port as-is"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Serial
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([param!("data", "string", "Data to write", required)])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let data: String = params.get_required("data")?;

        let mut sessions = context.sessions.lock().await;
        let serial = sessions.serial();
        if !serial.is_active() {
            return Ok(not_open(NO_SERIAL));
        }
        match serial.send(&data).await {
            Ok(sent) => Ok(ToolResult::success(format!("Sent {} bytes", sent))),
            Err(e) => Ok(channel_failure("Write error", &e)),
        }
    }
}

/// Bounded read from the port
#[derive(Debug, Default)]
pub struct SerialReadTool;

#[async_trait]
impl Tool for SerialReadTool {
    fn name(&self) -> &str {
        "serial-read"
    }

    fn description(&self) -> &str {
        "Read from the serial port until `size` bytes arrive or the timeout passes"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Serial
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("size", "integer", "Maximum number of bytes", optional),
            param!("timeout", "number", "Seconds to wait", optional, 2.0),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let size: Option<i64> = params.get_optional("size")?;
        let size = match size.map(usize::try_from) {
            None => None,
            Some(Ok(n)) if n > 0 => Some(n),
            Some(_) => return Ok(invalid_params("size must be a positive integer")),
        };

        let mut sessions = context.sessions.lock().await;
        let timeout: f64 = params.get_or("timeout", sessions.timeouts().serial)?;
        let serial = sessions.serial();
        if !serial.is_active() {
            return Ok(not_open(NO_SERIAL));
        }

        match serial.read_bytes(size, secs(timeout)).await {
            Ok(ReadOutput::Data(data)) if !data.is_empty() => Ok(ToolResult::success(data)),
            Ok(_) => Ok(ToolResult::success(NO_SERIAL_DATA.to_string())),
            Err(e) => Ok(channel_failure("Read error", &e)),
        }
    }
}

/// Send a line and collect the reply until a prompt shows up
#[derive(Debug, Default)]
pub struct SerialMessageTool;

#[async_trait]
impl Tool for SerialMessageTool {
    fn name(&self) -> &str {
        "serial-message"
    }

    fn description(&self) -> &str {
        "Send a line to the serial device and collect the reply until a prompt appears"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Serial
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::from([
            param!("message", "string", "Message to send", required),
            param!("wait_for_prompt", "boolean", "Collect the response", optional, true),
            param!("prompt_timeout", "number", "Seconds to wait for a prompt", optional, 5.0),
            param!("add_newline", "boolean", "Append \\r\\n when missing", optional, true),
        ])
    }

    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut message: String = params.get_required("message")?;
        let wait_for_prompt: bool = params.get_or("wait_for_prompt", true)?;
        let prompt_timeout: f64 = params.get_or("prompt_timeout", 5.0)?;
        let add_newline: bool = params.get_or("add_newline", true)?;

        if add_newline && !message.ends_with("\r\n") {
            message.push_str("\r\n");
        }

        let mut sessions = context.sessions.lock().await;
        let poll = secs(sessions.timeouts().serial_poll);
        let serial = sessions.serial();
        if !serial.is_active() {
            return Ok(not_open(NO_SERIAL));
        }

        let sent = match serial.send(&message).await {
            Ok(sent) => sent,
            Err(e) => return Ok(channel_failure("Failed to send message", &e)),
        };
        let mut content = format!("Sent {} bytes", sent);
        if !wait_for_prompt {
            return Ok(ToolResult::success(content));
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        let deadline = Instant::now() + secs(prompt_timeout);
        let mut received = String::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match serial.read_bytes(None, poll.min(remaining)).await {
                Ok(ReadOutput::Data(data)) if !data.is_empty() => {
                    received.push_str(&data);
                    if contains_prompt(&data) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => return Ok(channel_failure("Failed to send message", &e)),
            }
            tokio::time::sleep(SETTLE_DELAY.min(deadline.saturating_duration_since(Instant::now()))).await;
        }

        if received.is_empty() {
            content.push_str(&format!("\n\n(No response within {}s timeout)", prompt_timeout));
        } else {
            content.push_str("\n\nReceived:\n");
            content.push_str(&received);
        }
        Ok(ToolResult::success(content))
    }
}

/// Close the serial slot
#[derive(Debug, Default)]
pub struct SerialCloseTool;

#[async_trait]
impl Tool for SerialCloseTool {
    fn name(&self) -> &str {
        "serial-close"
    }

    fn description(&self) -> &str {
        "Close the serial port"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Serial
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        HashMap::new()
    }

    async fn execute(&self, _params: ToolParameters, context: &ToolContext) -> Result<ToolResult> {
        let mut sessions = context.sessions.lock().await;
        let serial = sessions.serial();
        if !serial.is_active() {
            return Ok(not_open("No active serial connection"));
        }
        let device = serial.device().unwrap_or("unknown").to_string();

        match sessions.close_channel(ChannelKind::Serial).await {
            Ok(_) => Ok(ToolResult::success(format!("Serial connection closed: {}", device))),
            Err(e) => Ok(ToolResult::from_channel_error(&e)),
        }
    }
}
