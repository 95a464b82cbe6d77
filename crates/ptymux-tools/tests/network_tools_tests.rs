use ptymux_session::{MemoryProjectStore, SessionManager};
use ptymux_toolcore::{ToolContext, ToolRegistry};
use ptymux_tools::builtin_registry;
use ptymux_types::{ChannelKind, NO_DATA_MESSAGE};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn setup() -> (ToolRegistry, ToolContext) {
    let (registry, _) = builtin_registry();
    let manager = SessionManager::new(Box::new(MemoryProjectStore::default())).unwrap();
    (registry, ToolContext::from_manager(manager))
}

/// Accepts one connection and echoes everything back
async fn echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    port
}

#[tokio::test]
async fn test_socket_round_trip() {
    let (registry, context) = setup();
    let port = echo_server().await;

    let opened = registry
        .execute("socket-open", json!({"host": "127.0.0.1", "port": port}), &context)
        .await;
    assert_eq!(opened.content, format!("Socket opened to 127.0.0.1:{} (TCP)", port));

    let twice = registry
        .execute("socket-open", json!({"host": "127.0.0.1", "port": port}), &context)
        .await;
    assert_eq!(twice.error.as_deref(), Some("Socket already open. Close it first."));

    let reply = registry
        .execute("socket-message", json!({"message": "hello"}), &context)
        .await;
    assert_eq!(reply.content, "Sent 6 bytes\n\nReceived:\nhello\n");

    let idle = registry
        .execute("socket-read", json!({"timeout": 0.2}), &context)
        .await;
    assert_eq!(idle.content, NO_DATA_MESSAGE);

    let written = registry
        .execute("socket-write", json!({"data": "raw"}), &context)
        .await;
    assert_eq!(written.content, "Sent 3 bytes");
    let echoed = registry
        .execute("socket-read", json!({"timeout": 1.0}), &context)
        .await;
    assert_eq!(echoed.content, "raw");

    let closed = registry.execute("socket-close", json!({}), &context).await;
    assert_eq!(closed.content, "Socket closed successfully");

    let again = registry.execute("socket-close", json!({}), &context).await;
    assert_eq!(again.error.as_deref(), Some("No active socket to close"));
}

#[tokio::test]
async fn test_socket_write_normalises_http() {
    let (registry, context) = setup();
    let port = echo_server().await;
    registry
        .execute("socket-open", json!({"host": "127.0.0.1", "port": port}), &context)
        .await;

    let written = registry
        .execute("socket-write", json!({"data": "GET / HTTP/1.0\n"}), &context)
        .await;
    assert!(written.content.starts_with("Sent 18 bytes\nDetected HTTP request"), "{}", written.content);

    let echoed = registry
        .execute("socket-read", json!({"timeout": 1.0}), &context)
        .await;
    assert_eq!(echoed.content, "GET / HTTP/1.0\r\n\r\n");
}

#[tokio::test]
async fn test_socket_commands_without_socket() {
    let (registry, context) = setup();

    for (tool, args) in [
        ("socket-write", json!({"data": "x"})),
        ("socket-read", json!({})),
        ("socket-message", json!({"message": "x"})),
    ] {
        let result = registry.execute(tool, args, &context).await;
        assert_eq!(
            result.error.as_deref(),
            Some("No active socket. Open one with socket-open first."),
            "{}",
            tool
        );
        assert_eq!(result.metadata.unwrap()["error_kind"], "not_open");
    }
}

#[tokio::test]
async fn test_socket_open_validation() {
    let (registry, context) = setup();

    let bad_protocol = registry
        .execute(
            "socket-open",
            json!({"host": "127.0.0.1", "port": 9, "protocol": "sctp"}),
            &context,
        )
        .await;
    assert_eq!(bad_protocol.error.as_deref(), Some("Unknown protocol: sctp"));

    let bad_port = registry
        .execute("socket-open", json!({"host": "127.0.0.1", "port": 0}), &context)
        .await;
    assert_eq!(
        bad_port.error.as_deref(),
        Some("port must be between 1 and 65535")
    );

    // Nothing listens on the port we just released
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let refused = registry
        .execute("socket-open", json!({"host": "127.0.0.1", "port": port}), &context)
        .await;
    assert!(!refused.success);
    assert!(refused.error.unwrap().starts_with("Failed to open socket: "));
}

#[tokio::test]
async fn test_socket_telnet_handshake() {
    let (registry, context) = setup();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        // IAC DO ECHO, then a banner
        socket.write_all(&[255, 253, 1]).await.unwrap();
        socket.write_all(b"Welcome\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = socket.read(&mut buf).await;
    });

    let handshake = registry
        .execute("socket-telnet", json!({"host": "127.0.0.1", "port": port}), &context)
        .await;
    assert!(handshake.success, "{:?}", handshake.error);
    assert!(handshake.content.starts_with(&format!("Connected to 127.0.0.1:{}\n", port)));
    assert!(handshake.content.contains("Negotiation: Refused DO 1"), "{}", handshake.content);
    assert!(handshake.content.contains("Banner:\nWelcome"), "{}", handshake.content);
    assert!(handshake
        .content
        .ends_with("Telnet handshake complete. Use socket-open to establish a persistent session."));

    // The handshake never touches the socket slot
    let read = registry.execute("socket-read", json!({}), &context).await;
    assert!(!read.success);
}

#[tokio::test]
async fn test_socket_read_with_huge_timeout() {
    let (registry, context) = setup();
    let port = echo_server().await;

    registry
        .execute("socket-open", json!({"host": "127.0.0.1", "port": port}), &context)
        .await;
    registry
        .execute("socket-write", json!({"data": "ping"}), &context)
        .await;

    let echoed = registry
        .execute("socket-read", json!({"timeout": 1e20}), &context)
        .await;
    assert!(echoed.success, "{:?}", echoed.error);
    assert_eq!(echoed.content, "ping");
    assert!(context.sessions.lock().await.has_channel(ChannelKind::Socket));
}
