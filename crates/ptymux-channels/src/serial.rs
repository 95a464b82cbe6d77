//! Serial port channel.
//!
//! `serialport` is blocking, so every port operation runs on the blocking
//! pool with the port moved in and handed back afterwards.

use crate::channel::{decode_bytes, Channel};
use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ptymux_types::{ChannelKind, ReadOutput, MAX_WAIT};
use serde_json::{json, Value};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::info;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const PORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Line framing for a serial port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl SerialSettings {
    /// Build settings from loosely typed caller input
    pub fn parse(baud_rate: u32, data_bits: u8, parity: &str, stop_bits: f64) -> ChannelResult<Self> {
        if baud_rate == 0 {
            return Err(ChannelError::invalid("baudrate must be positive"));
        }
        let data_bits = match data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(ChannelError::invalid(format!(
                    "bytesize must be 5, 6, 7 or 8 (got {})",
                    other
                )))
            }
        };
        let parity = match parity.to_lowercase().as_str() {
            "none" | "n" => Parity::None,
            "even" | "e" => Parity::Even,
            "odd" | "o" => Parity::Odd,
            "mark" | "space" => {
                return Err(ChannelError::invalid(format!(
                    "{} parity is not supported on this platform",
                    parity
                )))
            }
            other => return Err(ChannelError::invalid(format!("unknown parity '{}'", other))),
        };
        let stop_bits = if stop_bits == 1.0 {
            StopBits::One
        } else if stop_bits == 2.0 {
            StopBits::Two
        } else if stop_bits == 1.5 {
            return Err(ChannelError::invalid(
                "1.5 stop bits is not supported on this platform",
            ));
        } else {
            return Err(ChannelError::invalid(format!(
                "stopbits must be 1 or 2 (got {})",
                stop_bits
            )));
        };

        Ok(Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        })
    }

    /// Conventional short form such as `8N1`
    pub fn framing(&self) -> String {
        let bits = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        format!("{}{}{}", bits, parity, stop)
    }
}

struct SerialHandles {
    /// `None` only while a blocking operation owns the port
    port: Option<Box<dyn SerialPort>>,
    device: String,
    settings: SerialSettings,
    opened_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SerialChannel {
    handles: Option<SerialHandles>,
}

impl SerialChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&mut self, device: &str, settings: SerialSettings) -> ChannelResult<()> {
        if self.handles.is_some() {
            return Err(ChannelError::AlreadyOpen(ChannelKind::Serial));
        }
        if device.is_empty() {
            return Err(ChannelError::invalid("device must not be empty"));
        }

        let path = device.to_string();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .parity(settings.parity)
                .stop_bits(settings.stop_bits)
                .timeout(PORT_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| ChannelError::os("Serial open task failed", io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(|e| ChannelError::os(format!("Failed to open {}", device), io::Error::from(e)))?;

        info!(device, framing = %settings.framing(), baud = settings.baud_rate, "serial port opened");
        self.handles = Some(SerialHandles {
            port: Some(port),
            device: device.to_string(),
            settings,
            opened_at: Utc::now(),
        });
        Ok(())
    }

    /// Write `message` followed by CRLF
    pub async fn send_message(&mut self, message: &str) -> ChannelResult<usize> {
        self.send(&format!("{}\r\n", message)).await
    }

    /// Read exactly up to `size` bytes, or everything buffered when `size`
    /// is `None`, giving up at `timeout`.
    pub async fn read_bytes(&mut self, size: Option<usize>, timeout: Duration) -> ChannelResult<ReadOutput> {
        let bytes = self
            .with_port(move |port| {
                let deadline = Instant::now() + timeout.min(MAX_WAIT);
                let mut data = Vec::new();
                loop {
                    let wanted = match size {
                        Some(limit) => limit.saturating_sub(data.len()),
                        None => port.bytes_to_read().map_err(io::Error::from)? as usize,
                    };
                    if size.is_some() && wanted == 0 {
                        break;
                    }
                    if wanted > 0 {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        port.set_timeout(remaining.max(POLL_INTERVAL))
                            .map_err(io::Error::from)?;
                        let mut chunk = vec![0u8; wanted];
                        match port.read(&mut chunk) {
                            Ok(n) => data.extend_from_slice(&chunk[..n]),
                            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                            Err(e) => return Err(e),
                        }
                        // Buffered read: one drain is enough once data arrived
                        if size.is_none() && !data.is_empty() {
                            break;
                        }
                    }
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Ok(data)
            })
            .await?;

        if bytes.is_empty() {
            Ok(ReadOutput::NoData)
        } else {
            Ok(ReadOutput::Data(decode_bytes(&bytes)))
        }
    }

    pub fn device(&self) -> Option<&str> {
        self.handles.as_ref().map(|h| h.device.as_str())
    }

    async fn with_port<T, F>(&mut self, op: F) -> ChannelResult<T>
    where
        F: FnOnce(&mut Box<dyn SerialPort>) -> io::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let handles = self
            .handles
            .as_mut()
            .ok_or(ChannelError::NotOpen(ChannelKind::Serial))?;
        let mut port = handles
            .port
            .take()
            .ok_or(ChannelError::NotOpen(ChannelKind::Serial))?;

        let joined = tokio::task::spawn_blocking(move || {
            let result = op(&mut port);
            (port, result)
        })
        .await;

        match joined {
            Ok((port, result)) => {
                handles.port = Some(port);
                result.map_err(|e| ChannelError::os("Serial I/O failed", e))
            }
            Err(e) => {
                // The port went down with the panicked task
                self.handles = None;
                Err(ChannelError::os(
                    "Serial I/O task failed",
                    io::Error::new(io::ErrorKind::Other, e),
                ))
            }
        }
    }
}

#[async_trait]
impl Channel for SerialChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Serial
    }

    /// Raw write; use `send_message` for line-oriented traffic
    async fn send(&mut self, data: &str) -> ChannelResult<usize> {
        let payload = data.as_bytes().to_vec();
        self.with_port(move |port| {
            port.write_all(&payload)?;
            port.flush()?;
            Ok(payload.len())
        })
        .await
    }

    async fn read(&mut self, timeout: Duration) -> ChannelResult<ReadOutput> {
        self.read_bytes(None, timeout).await
    }

    async fn close(&mut self) -> ChannelResult<()> {
        if let Some(handles) = self.handles.take() {
            info!(device = %handles.device, "serial port closed");
        }
        Ok(())
    }

    fn is_active(&mut self) -> bool {
        self.handles.is_some()
    }

    fn describe(&self) -> Value {
        match &self.handles {
            Some(h) => json!({
                "device": h.device,
                "baudrate": h.settings.baud_rate,
                "framing": h.settings.framing(),
                "opened_at": h.opened_at.to_rfc3339(),
            }),
            None => Value::Null,
        }
    }
}
