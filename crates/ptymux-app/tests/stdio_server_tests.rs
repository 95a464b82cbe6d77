use pretty_assertions::assert_eq;
use ptymux::Server;
use ptymux_logging::{CallLogger, CallRecord};
use ptymux_session::{MemoryProjectStore, SessionManager};
use ptymux_toolcore::ToolContext;
use ptymux_types::ChannelKind;
use serde_json::Value;
use std::future::pending;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};

fn server() -> Server {
    let manager = SessionManager::new(Box::new(MemoryProjectStore::default())).unwrap();
    let (registry, report) = ptymux_tools::builtin_registry();
    assert!(report.failed.is_empty());
    Server::new(registry, ToolContext::from_manager(manager))
}

/// Input that fails on every read
struct BrokenInput;

impl AsyncRead for BrokenInput {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin went away")))
    }
}

fn replies(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_session_over_stdio() {
    let input = [
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        "",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"exec","arguments":{"command":"echo hello"}}}"#,
        r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
    ]
    .join("\n");

    let mut output = Vec::new();
    let mut server = server();
    server
        .serve_until(BufReader::new(input.as_bytes()), &mut output, pending())
        .await
        .unwrap();

    let replies = replies(&output);
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["result"]["serverInfo"]["name"], "ptymux");

    let call = &replies[1]["result"];
    assert_eq!(call["isError"], false);
    let body: Value = serde_json::from_str(call["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(body["stdout"], "hello\n");
    assert_eq!(body["return_code"], 0);

    assert_eq!(replies[2]["id"], 3);
    assert_eq!(replies[2]["result"], serde_json::json!({}));
}

#[tokio::test]
async fn test_end_of_input_closes_sessions() {
    let input = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"spawn","arguments":{"command":"cat"}}}"#;

    let mut output = Vec::new();
    let mut server = server();
    let report = server
        .serve_until(BufReader::new(input.as_bytes()), &mut output, pending())
        .await
        .unwrap();

    let replies = replies(&output);
    assert_eq!(replies[0]["result"]["isError"], false);
    assert_eq!(report.closed, vec![ChannelKind::Process]);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_shutdown_future_stops_the_loop() {
    let (_keep_open, reader) = tokio::io::duplex(64);
    let mut output = Vec::new();
    let mut server = server();

    let report = server
        .serve_until(BufReader::new(reader), &mut output, async {})
        .await
        .unwrap();

    assert!(output.is_empty());
    assert!(report.closed.is_empty());
}

#[tokio::test]
async fn test_calls_are_logged() {
    let dir = tempfile::tempdir().unwrap();
    let logger = CallLogger::new(dir.path()).unwrap();
    let log_path = logger.path().to_path_buf();

    let input = [
        r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"status"}}"#,
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"kill-proc"}}"#,
    ]
    .join("\n");

    let mut output = Vec::new();
    let mut server = server().with_call_log(logger);
    server
        .serve_until(BufReader::new(input.as_bytes()), &mut output, pending())
        .await
        .unwrap();

    let records: Vec<CallRecord> = std::fs::read_to_string(log_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tool, "status");
    assert!(records[0].success);
    assert_eq!(records[1].tool, "kill-proc");
    assert!(!records[1].success);
    assert_eq!(records[1].error.as_deref(), Some("No active process to kill"));
    assert_ne!(records[0].call_id, records[1].call_id);
}

#[tokio::test]
async fn test_invalid_utf8_gets_parse_error_and_loop_continues() {
    let mut input = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"exec","arguments":{"command":"echo "#.to_vec();
    input.push(0xFF);
    input.extend_from_slice(b"\"}}}\n");
    input.extend_from_slice(br#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#);
    input.push(b'\n');

    let mut output = Vec::new();
    let mut server = server();
    server
        .serve_until(BufReader::new(&input[..]), &mut output, pending())
        .await
        .unwrap();

    let replies = replies(&output);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], Value::Null);
    assert_eq!(replies[0]["error"]["code"], -32700);
    assert_eq!(replies[1]["id"], 2);
    assert_eq!(replies[1]["result"], serde_json::json!({}));
}

#[tokio::test]
async fn test_read_error_still_releases_sessions() {
    let manager = SessionManager::new(Box::new(MemoryProjectStore::default())).unwrap();
    let (registry, _) = ptymux_tools::builtin_registry();
    let context = ToolContext::from_manager(manager);
    let mut server = Server::new(registry, context.clone());

    let spawn = "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"spawn\",\"arguments\":{\"command\":\"cat\"}}}\n";
    let reader = BufReader::new(spawn.as_bytes().chain(BrokenInput));

    let mut output = Vec::new();
    let err = server.serve_until(reader, &mut output, pending()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read request"));

    let replies = replies(&output);
    assert_eq!(replies[0]["result"]["isError"], false);
    assert!(!context.sessions.lock().await.has_channel(ChannelKind::Process));
}
