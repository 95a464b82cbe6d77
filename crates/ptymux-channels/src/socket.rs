//! Single TCP or UDP client socket.

use crate::channel::{decode_bytes, Channel};
use crate::error::{ChannelError, ChannelResult, OsContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ptymux_types::{ChannelKind, Protocol, ReadOutput, READ_CHUNK_SIZE};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::info;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

enum Transport {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

struct SocketHandles {
    transport: Transport,
    host: String,
    port: u16,
    protocol: Protocol,
    peer: SocketAddr,
    opened_at: DateTime<Utc>,
}

pub struct SocketChannel {
    handles: Option<SocketHandles>,
    connect_timeout: Duration,
}

impl Default for SocketChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketChannel {
    pub fn new() -> Self {
        Self {
            handles: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub async fn open(&mut self, host: &str, port: u16, protocol: Protocol) -> ChannelResult<()> {
        if self.handles.is_some() {
            return Err(ChannelError::AlreadyOpen(ChannelKind::Socket));
        }
        if host.is_empty() {
            return Err(ChannelError::invalid("host must not be empty"));
        }

        let target = format!("{}:{}", host, port);
        let transport = match protocol {
            Protocol::Tcp => {
                let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
                    .await
                    .map_err(|_| ChannelError::Timeout(self.connect_timeout))?
                    .os_context(&format!("Failed to connect to {}", target))?;
                Transport::Tcp(stream)
            }
            Protocol::Udp => {
                let addr = lookup_host((host, port))
                    .await
                    .os_context(&format!("Failed to resolve {}", target))?
                    .next()
                    .ok_or_else(|| ChannelError::invalid(format!("No address for {}", target)))?;
                let bind: SocketAddr = if addr.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(bind)
                    .await
                    .os_context("Failed to bind UDP socket")?;
                socket
                    .connect(addr)
                    .await
                    .os_context(&format!("Failed to connect UDP socket to {}", target))?;
                Transport::Udp(socket)
            }
        };

        let peer = match &transport {
            Transport::Tcp(stream) => stream.peer_addr(),
            Transport::Udp(socket) => socket.peer_addr(),
        }
        .os_context("Failed to read peer address")?;

        info!(%peer, %protocol, "socket connected");
        self.handles = Some(SocketHandles {
            transport,
            host: host.to_string(),
            port,
            protocol,
            peer,
            opened_at: Utc::now(),
        });
        Ok(())
    }

    /// `host:port (PROTO)` of the open connection
    pub fn endpoint(&self) -> Option<String> {
        self.handles
            .as_ref()
            .map(|h| format!("{}:{} ({})", h.host, h.port, h.protocol))
    }

    fn handles_mut(&mut self) -> ChannelResult<&mut SocketHandles> {
        self.handles
            .as_mut()
            .ok_or(ChannelError::NotOpen(ChannelKind::Socket))
    }
}

#[async_trait]
impl Channel for SocketChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Socket
    }

    /// Payload goes out verbatim; no terminator is added.
    async fn send(&mut self, data: &str) -> ChannelResult<usize> {
        let handles = self.handles_mut()?;
        match &mut handles.transport {
            Transport::Tcp(stream) => {
                stream
                    .write_all(data.as_bytes())
                    .await
                    .os_context("Failed to send on TCP socket")?;
                Ok(data.len())
            }
            Transport::Udp(socket) => socket
                .send(data.as_bytes())
                .await
                .os_context("Failed to send UDP datagram"),
        }
    }

    async fn read(&mut self, window: Duration) -> ChannelResult<ReadOutput> {
        let handles = self.handles_mut()?;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        let received = match &mut handles.transport {
            Transport::Tcp(stream) => timeout(window, stream.read(&mut buf)).await,
            Transport::Udp(socket) => timeout(window, socket.recv(&mut buf)).await,
        };

        let n = match received {
            Err(_) => return Ok(ReadOutput::NoData),
            Ok(result) => result.os_context("Failed to receive from socket")?,
        };

        if n == 0 && matches!(handles.transport, Transport::Tcp(_)) {
            return Ok(ReadOutput::Closed);
        }
        Ok(ReadOutput::Data(decode_bytes(&buf[..n])))
    }

    async fn close(&mut self) -> ChannelResult<()> {
        if let Some(handles) = self.handles.take() {
            if let Transport::Tcp(mut stream) = handles.transport {
                let _ = stream.shutdown().await;
            }
            info!(peer = %handles.peer, "socket closed");
        }
        Ok(())
    }

    fn is_active(&mut self) -> bool {
        self.handles.is_some()
    }

    fn describe(&self) -> Value {
        match &self.handles {
            Some(h) => json!({
                "host": h.host,
                "port": h.port,
                "protocol": h.protocol,
                "peer": h.peer.to_string(),
                "opened_at": h.opened_at.to_rfc3339(),
            }),
            None => Value::Null,
        }
    }
}
