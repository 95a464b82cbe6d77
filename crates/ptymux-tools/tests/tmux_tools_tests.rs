use ptymux_session::{MemoryProjectStore, SessionManager};
use ptymux_toolcore::{ToolContext, ToolRegistry};
use ptymux_tools::builtin_registry;
use serde_json::json;
use serial_test::serial;
use std::process::Command;
use std::time::Duration;

/// Private tmux server, torn down on drop
struct Isolated {
    socket: String,
    registry: ToolRegistry,
    context: ToolContext,
}

impl Isolated {
    fn start(tag: &str) -> Option<Self> {
        if Command::new("tmux").arg("-V").output().is_err() {
            eprintln!("tmux not installed, skipping");
            return None;
        }
        let socket = format!("ptymux-tools-{}-{}", std::process::id(), tag);
        let (registry, _) = builtin_registry();
        let manager = SessionManager::new(Box::new(MemoryProjectStore::default()))
            .unwrap()
            .with_multiplexer("tmux", Some(socket.clone()));
        Some(Self {
            socket,
            registry,
            context: ToolContext::from_manager(manager),
        })
    }
}

impl Drop for Isolated {
    fn drop(&mut self) {
        let _ = Command::new("tmux")
            .args(["-L", &self.socket, "kill-server"])
            .output();
    }
}

#[tokio::test]
#[serial]
async fn test_tmux_session_lifecycle() {
    let Some(env) = Isolated::start("lifecycle") else {
        return;
    };
    let (registry, context) = (&env.registry, &env.context);

    let started = registry
        .execute("tmux-start", json!({"session_name": "work", "command": "sh"}), context)
        .await;
    assert!(started.success, "{:?}", started.error);
    assert!(started.content.starts_with("Started tmux session 'work'"));
    assert!(started.content.contains(&format!("tmux -L {} attach -t work", env.socket)));

    let duplicate = registry
        .execute("tmux-start", json!({"session_name": "work"}), context)
        .await;
    assert_eq!(duplicate.error.as_deref(), Some("Session 'work' already exists"));

    let listed = registry.execute("tmux-list", json!({}), context).await;
    assert!(listed.content.starts_with("Active tmux sessions:"));
    assert!(listed.content.contains("• work - Detached"), "{}", listed.content);

    let sent = registry
        .execute(
            "tmux-send",
            json!({"session_name": "work", "command": "echo tools-$((6*7))"}),
            context,
        )
        .await;
    assert_eq!(sent.content, "Sent keys to session 'work'\nSent: echo tools-$((6*7))");

    tokio::time::sleep(Duration::from_millis(500)).await;
    let captured = registry
        .execute("tmux-capture", json!({"session_name": "work"}), context)
        .await;
    assert!(captured.content.starts_with("Output from session 'work':\n\n"));
    assert!(captured.content.contains("tools-42"), "{}", captured.content);

    let attach = registry
        .execute("tmux-attach", json!({"session_name": "work"}), context)
        .await;
    assert!(attach.content.contains("Press Ctrl+B, then D to detach"));

    let killed = registry
        .execute("tmux-kill", json!({"session_name": "work"}), context)
        .await;
    assert_eq!(killed.content, "Killed session 'work'");

    let empty = registry.execute("tmux-list", json!({}), context).await;
    assert_eq!(empty.content, "No active tmux sessions found.");
}

#[tokio::test]
#[serial]
async fn test_tmux_unknown_session() {
    let Some(env) = Isolated::start("unknown") else {
        return;
    };

    for tool in ["tmux-capture", "tmux-kill", "tmux-attach"] {
        let result = env
            .registry
            .execute(tool, json!({"session_name": "ghost"}), &env.context)
            .await;
        assert_eq!(result.error.as_deref(), Some("Session 'ghost' not found"), "{}", tool);
        assert_eq!(result.metadata.unwrap()["error_kind"], "not_found");
    }
}

#[tokio::test]
#[serial]
async fn test_missing_multiplexer_binary() {
    let (registry, _) = builtin_registry();
    let manager = SessionManager::new(Box::new(MemoryProjectStore::default()))
        .unwrap()
        .with_multiplexer("ptymux-no-such-tmux", None);
    let context = ToolContext::from_manager(manager);

    let result = registry
        .execute("tmux-start", json!({"session_name": "x"}), &context)
        .await;
    assert_eq!(
        result.error.as_deref(),
        Some("ptymux-no-such-tmux is not installed. Install with: sudo apt install tmux")
    );
}
