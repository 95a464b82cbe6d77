//! Telnet option handling for the one-shot handshake.

use crate::error::{ChannelError, ChannelResult, OsContext};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

const NEGOTIATION_ROUNDS: usize = 5;
const NEGOTIATION_WINDOW: Duration = Duration::from_millis(500);
const BANNER_WINDOW: Duration = Duration::from_secs(2);

/// Drop IAC command sequences, keeping escaped `IAC IAC` as a literal 255
pub fn strip_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if data[i] != IAC {
            out.push(data[i]);
            i += 1;
            continue;
        }

        let Some(&cmd) = data.get(i + 1) else {
            break;
        };

        match cmd {
            DO | DONT | WILL | WONT => i += 3,
            SB => {
                let end = data[i + 2..]
                    .windows(2)
                    .position(|w| w == [IAC, SE])
                    .map(|pos| i + 2 + pos + 2);
                i = end.unwrap_or(i + 2);
            }
            IAC => {
                out.push(IAC);
                i += 2;
            }
            _ => i += 2,
        }
    }

    out
}

/// Refuse every option the server offers or requests.
/// Returns the bytes to send back and a note per refusal.
pub fn refuse_options(data: &[u8]) -> (Vec<u8>, Vec<String>) {
    let mut reply = Vec::new();
    let mut notes = Vec::new();

    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == IAC {
            let option = data[i + 2];
            match data[i + 1] {
                DO => {
                    reply.extend_from_slice(&[IAC, WONT, option]);
                    notes.push(format!("Refused DO {}", option));
                }
                WILL => {
                    reply.extend_from_slice(&[IAC, DONT, option]);
                    notes.push(format!("Refused WILL {}", option));
                }
                _ => {}
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    (reply, notes)
}

/// Result of probing a telnet server
#[derive(Debug, Default)]
pub struct TelnetHandshake {
    pub negotiation: Vec<String>,
    /// Banner with IAC sequences removed; `None` when nothing arrived
    pub banner: Option<Vec<u8>>,
}

/// Connect, refuse all options, optionally read a banner, then disconnect
pub async fn handshake(
    host: &str,
    port: u16,
    read_banner: bool,
    connect_timeout: Duration,
) -> ChannelResult<TelnetHandshake> {
    let mut stream = timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ChannelError::Timeout(connect_timeout))?
        .os_context(&format!("Failed to connect to {}:{}", host, port))?;

    let mut result = TelnetHandshake::default();
    let mut buf = [0u8; 1024];

    for _ in 0..NEGOTIATION_ROUNDS {
        let n = match timeout(NEGOTIATION_WINDOW, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => n,
            _ => break,
        };
        let (reply, notes) = refuse_options(&buf[..n]);
        if !reply.is_empty() {
            stream
                .write_all(&reply)
                .await
                .os_context("Failed to answer telnet negotiation")?;
        }
        result.negotiation.extend(notes);

        // Text that arrived with the options is the start of the banner
        let text = strip_iac(&buf[..n]);
        if !text.is_empty() {
            result.banner.get_or_insert_with(Vec::new).extend(text);
        }
    }

    if read_banner && result.banner.is_none() {
        let mut banner = vec![0u8; ptymux_types::READ_CHUNK_SIZE];
        if let Ok(Ok(n)) = timeout(BANNER_WINDOW, stream.read(&mut banner)).await {
            if n > 0 {
                result.banner = Some(strip_iac(&banner[..n]));
            }
        }
    }

    if !read_banner {
        result.banner = None;
    }

    let _ = stream.shutdown().await;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    #[test]
    fn test_strip_iac_removes_option_commands() {
        let data = [IAC, DO, 1, b'h', b'i', IAC, WILL, 3];
        assert_eq!(strip_iac(&data), b"hi");
    }

    #[test]
    fn test_strip_iac_handles_subnegotiation_and_escape() {
        let data = [b'a', IAC, SB, 24, 1, IAC, SE, b'b', IAC, IAC, b'c'];
        assert_eq!(strip_iac(&data), vec![b'a', b'b', 255, b'c']);
    }

    #[test]
    fn test_strip_iac_tolerates_truncated_sequences() {
        assert_eq!(strip_iac(&[b'x', IAC]), b"x");
        assert_eq!(strip_iac(&[b'x', IAC, SB, 1, 2]), vec![b'x', 1, 2]);
    }

    #[test]
    fn test_refuse_options() {
        let (reply, notes) = refuse_options(&[IAC, DO, 24, IAC, WILL, 1]);
        assert_eq!(reply, vec![IAC, WONT, 24, IAC, DONT, 1]);
        assert_eq!(notes, vec!["Refused DO 24", "Refused WILL 1"]);
    }

    #[tokio::test]
    async fn test_handshake_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[IAC, DO, 24]).await.unwrap();
            let mut reply = [0u8; 3];
            socket.read_exact(&mut reply).await.unwrap();
            socket.write_all(b"Welcome\r\n").await.unwrap();
            reply
        });

        let result = handshake("127.0.0.1", port, true, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.negotiation, vec!["Refused DO 24"]);
        assert_eq!(result.banner.as_deref(), Some(&b"Welcome\r\n"[..]));
        assert_eq!(server.await.unwrap(), [IAC, WONT, 24]);
    }
}
