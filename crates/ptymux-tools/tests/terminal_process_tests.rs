use ptymux_session::{MemoryProjectStore, SessionManager};
use ptymux_toolcore::{ToolContext, ToolRegistry};
use ptymux_tools::builtin_registry;
use serde_json::json;

fn setup() -> (ToolRegistry, ToolContext) {
    let (registry, report) = builtin_registry();
    assert!(report.failed.is_empty());
    let manager = SessionManager::new(Box::new(MemoryProjectStore::default())).unwrap();
    (registry, ToolContext::from_manager(manager))
}

#[tokio::test]
async fn test_bash_session_lifecycle() {
    let (registry, context) = setup();

    let started = registry.execute("bash", json!({}), &context).await;
    assert!(started.success, "{:?}", started.error);
    assert!(started.content.starts_with("Bash PTY session started\n"));

    let second = registry.execute("bash", json!({}), &context).await;
    assert_eq!(
        second.error.as_deref(),
        Some("PTY session already active. Disconnect first.")
    );
    assert_eq!(second.metadata.unwrap()["error_kind"], "already_open");

    let echoed = registry
        .execute("send", json!({"message": "echo ptymux-$((40+2))"}), &context)
        .await;
    assert!(echoed.success);
    assert!(echoed.content.contains("ptymux-42"), "{}", echoed.content);

    let resized = registry
        .execute("resize", json!({"width": 120, "height": 40}), &context)
        .await;
    assert_eq!(resized.content, "Terminal resized to 120x40 (width x height)");

    let cleared = registry.execute("clear", json!({}), &context).await;
    assert_eq!(cleared.content, "PTY terminal cleared");

    let closed = registry.execute("disconnect", json!({}), &context).await;
    assert_eq!(closed.content, "PTY session terminated");

    let again = registry.execute("disconnect", json!({}), &context).await;
    assert_eq!(again.error.as_deref(), Some("No active PTY session"));
}

#[tokio::test]
async fn test_terminal_commands_need_a_session() {
    let (registry, context) = setup();

    let sent = registry.execute("send", json!({"message": "ls"}), &context).await;
    assert_eq!(
        sent.error.as_deref(),
        Some("No active PTY session. Use 'connect' or 'bash' first.")
    );

    let resized = registry.execute("resize", json!({}), &context).await;
    assert_eq!(resized.error.as_deref(), Some("No active PTY session to resize"));
}

#[tokio::test]
async fn test_connect_runs_given_command_in_working_dir() {
    let (registry, context) = setup();
    let dir = tempfile::tempdir().unwrap();

    let started = registry
        .execute(
            "connect",
            json!({"command": "pwd", "working_dir": dir.path().to_str().unwrap()}),
            &context,
        )
        .await;
    assert!(started.success, "{:?}", started.error);
    assert!(started.content.starts_with("PTY session started with command: pwd\n"));
    let name = dir.path().file_name().unwrap().to_str().unwrap();
    assert!(started.content.contains(name), "{}", started.content);

    // pwd has exited, so a new session may start right away
    let next = registry
        .execute("connect", json!({"command": "cat"}), &context)
        .await;
    assert!(next.success, "{:?}", next.error);
    registry.execute("disconnect", json!({}), &context).await;
}

#[tokio::test]
async fn test_spawn_send_and_kill() {
    let (registry, context) = setup();

    let started = registry.execute("spawn", json!({"command": "cat"}), &context).await;
    assert!(started.success, "{:?}", started.error);
    assert!(started.content.starts_with("Process started: cat"));

    let busy = registry.execute("spawn", json!({"command": "cat"}), &context).await;
    assert_eq!(busy.error.as_deref(), Some("Process already active. Kill it first."));

    let echoed = registry
        .execute("send-proc", json!({"message": "ping"}), &context)
        .await;
    assert_eq!(echoed.content, "ping\n");

    let killed = registry.execute("kill-proc", json!({}), &context).await;
    assert_eq!(killed.content, "Process terminated");

    let again = registry.execute("kill-proc", json!({}), &context).await;
    assert_eq!(again.error.as_deref(), Some("No active process to kill"));

    let orphan = registry
        .execute("send-proc", json!({"message": "ping"}), &context)
        .await;
    assert_eq!(orphan.error.as_deref(), Some("No active process. Use 'spawn' first."));
}

#[tokio::test]
async fn test_spawn_reports_quick_exit_and_frees_slot() {
    let (registry, context) = setup();

    let finished = registry
        .execute(
            "spawn",
            json!({"command": "sh", "args": ["-c", "echo done; exit 3"]}),
            &context,
        )
        .await;
    assert!(finished.success, "{:?}", finished.error);
    assert!(
        finished
            .content
            .starts_with("Process completed: sh -c echo done; exit 3 (exit code: 3)\n"),
        "{}",
        finished.content
    );
    assert!(finished.content.contains("done"));
    assert_eq!(finished.metadata.unwrap()["exit_code"], 3);

    let next = registry.execute("spawn", json!({"command": "cat"}), &context).await;
    assert!(next.success, "{:?}", next.error);
    registry.execute("kill-proc", json!({}), &context).await;
}

#[tokio::test]
async fn test_spawn_rejects_bad_arguments() {
    let (registry, context) = setup();

    let missing = registry.execute("spawn", json!({}), &context).await;
    assert_eq!(
        missing.error.as_deref(),
        Some("Invalid arguments: Missing required field: command")
    );

    let wrong = registry
        .execute("spawn", json!({"command": "cat", "args": "x"}), &context)
        .await;
    assert_eq!(
        wrong.error.as_deref(),
        Some("Invalid arguments: Field 'args' must be an array")
    );
}
