use pretty_assertions::assert_eq;
use ptymux_session::{MemoryProjectStore, SessionManager};
use ptymux_toolcore::{
    param, ParameterDefinition, Tool, ToolCategory, ToolContext, ToolEntry, ToolParameters,
    ToolRegistry, ToolResult,
};
use serde_json::json;
use std::collections::HashMap;

// Mock tool implementations for testing
#[derive(Debug, Clone)]
struct TestTool {
    name: String,
    description: String,
    category: ToolCategory,
    parameters: HashMap<String, ParameterDefinition>,
    behaviour: Behaviour,
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Echo,
    Fail,
    Error,
    Panic,
}

impl TestTool {
    fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            category: ToolCategory::System,
            parameters: HashMap::new(),
            behaviour: Behaviour::Echo,
        }
    }

    fn with_parameters(mut self, parameters: HashMap<String, ParameterDefinition>) -> Self {
        self.parameters = parameters;
        self
    }

    fn in_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }

    fn behaving(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }
}

#[async_trait::async_trait]
impl Tool for TestTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn category(&self) -> ToolCategory {
        self.category
    }

    fn parameters(&self) -> HashMap<String, ParameterDefinition> {
        self.parameters.clone()
    }

    async fn execute(
        &self,
        params: ToolParameters,
        _context: &ToolContext,
    ) -> anyhow::Result<ToolResult> {
        match self.behaviour {
            Behaviour::Echo => Ok(ToolResult::success(format!(
                "Executed {} with {} parameters",
                self.name,
                params.data.len()
            ))),
            Behaviour::Fail => Ok(ToolResult::error("Test tool failed intentionally".to_string())),
            Behaviour::Error => anyhow::bail!("handler blew up"),
            Behaviour::Panic => panic!("handler panicked"),
        }
    }
}

fn create_test_context() -> ToolContext {
    let manager = SessionManager::new(Box::new(MemoryProjectStore::default())).unwrap();
    ToolContext::from_manager(manager)
}

fn socket_open_tool() -> TestTool {
    TestTool::new("socket-open", "Open a socket")
        .in_category(ToolCategory::Network)
        .with_parameters(HashMap::from([
            param!("host", "string", "Host", required),
            param!("port", "number", "Port", required),
            param!("protocol", "string", "tcp or udp", optional, "tcp"),
        ]))
}

#[tokio::test]
async fn test_unknown_tool_returns_not_found_envelope() {
    let registry = ToolRegistry::new();
    let context = create_test_context();

    let result = registry.execute("nope", json!({}), &context).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Tool 'nope' not found"));
    assert_eq!(result.metadata.unwrap()["error_kind"], "not_found");
}

#[tokio::test]
async fn test_missing_required_field_names_it() {
    let mut registry = ToolRegistry::new();
    registry.register(socket_open_tool());
    let context = create_test_context();

    let result = registry
        .execute("socket-open", json!({"host": "localhost"}), &context)
        .await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Invalid arguments: Missing required field: port")
    );
}

#[tokio::test]
async fn test_wrong_type_is_rejected_before_execution() {
    let mut registry = ToolRegistry::new();
    registry.register(socket_open_tool());
    let context = create_test_context();

    let result = registry
        .execute("socket-open", json!({"host": "h", "port": "23"}), &context)
        .await;
    assert_eq!(
        result.error.as_deref(),
        Some("Invalid arguments: Field 'port' must be a number")
    );
}

#[tokio::test]
async fn test_successful_execution() {
    let mut registry = ToolRegistry::new();
    registry.register(socket_open_tool());
    let context = create_test_context();

    let result = registry
        .execute("socket-open", json!({"host": "h", "port": 23}), &context)
        .await;
    assert!(result.success);
    assert_eq!(result.content, "Executed socket-open with 2 parameters");
}

#[tokio::test]
async fn test_handler_failures_become_envelopes() {
    let mut registry = ToolRegistry::new();
    registry.register(TestTool::new("fails", "").behaving(Behaviour::Fail));
    registry.register(TestTool::new("errors", "").behaving(Behaviour::Error));
    registry.register(TestTool::new("panics", "").behaving(Behaviour::Panic));
    let context = create_test_context();

    let failed = registry.execute("fails", json!({}), &context).await;
    assert_eq!(failed.error.as_deref(), Some("Test tool failed intentionally"));

    let errored = registry.execute("errors", json!({}), &context).await;
    assert_eq!(
        errored.error.as_deref(),
        Some("Error executing tool: handler blew up")
    );

    let panicked = registry.execute("panics", json!({}), &context).await;
    assert!(!panicked.success);
    assert!(panicked.error.unwrap().contains("handler panicked"));

    // The shared session manager is still usable afterwards
    let mut sessions = context.sessions.lock().await;
    assert!(sessions.status().channels.is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_last_write_wins() {
    let mut registry = ToolRegistry::new();
    registry.register(TestTool::new("dup", "first").in_category(ToolCategory::Terminal));
    registry.register(TestTool::new("dup", "second").in_category(ToolCategory::Process));

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get_tool("dup").unwrap().description(), "second");
    assert!(registry.tools_by_category(ToolCategory::Terminal).is_empty());
    assert_eq!(registry.tools_by_category(ToolCategory::Process).len(), 1);
    assert_eq!(registry.categories(), vec![ToolCategory::Process]);
}

#[tokio::test]
async fn test_validate_without_executing() {
    let mut registry = ToolRegistry::new();
    registry.register(socket_open_tool());

    assert!(registry.validate("socket-open", &json!({"host": "h", "port": 1})).is_ok());
    let err = registry.validate("socket-open", &json!({})).unwrap_err();
    assert_eq!(err.to_string(), "Missing required field: host");
    assert!(registry.validate("ghost", &json!({})).is_err());
}

fn build_echo() -> anyhow::Result<Box<dyn Tool>> {
    Ok(Box::new(TestTool::new("echo", "Echo")))
}

fn build_broken() -> anyhow::Result<Box<dyn Tool>> {
    anyhow::bail!("missing dependency")
}

fn build_panicking() -> anyhow::Result<Box<dyn Tool>> {
    panic!("bad factory")
}

#[tokio::test]
async fn test_discovery_skips_failing_factories() {
    let table = [
        ToolEntry {
            name: "echo",
            category: ToolCategory::System,
            factory: build_echo,
        },
        ToolEntry {
            name: "broken",
            category: ToolCategory::System,
            factory: build_broken,
        },
        ToolEntry {
            name: "panicky",
            category: ToolCategory::System,
            factory: build_panicking,
        },
    ];

    let mut registry = ToolRegistry::new();
    let report = registry.discover_and_register(&table);

    assert_eq!(report.registered, vec!["echo".to_string()]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0], ("broken".to_string(), "missing dependency".to_string()));
    assert!(report.failed[1].1.contains("bad factory"));
    assert_eq!(registry.tool_names(), vec!["echo".to_string()]);
}

#[tokio::test]
async fn test_definitions_are_sorted_and_schema_shaped() {
    let mut registry = ToolRegistry::new();
    registry.register(TestTool::new("zeta", "z"));
    registry.register(socket_open_tool());

    let defs = registry.mcp_definitions();
    assert_eq!(defs[0]["name"], "socket-open");
    assert_eq!(defs[1]["name"], "zeta");

    let schema = &defs[0]["inputSchema"];
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["required"], json!(["host", "port"]));
    assert_eq!(schema["properties"]["protocol"]["default"], "tcp");
}
