use crate::context::ToolContext;
use crate::schema::{validate, ValidationError};
use crate::tool::{Tool, ToolCategory, ToolParameters, ToolResult};
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// One row of the static registration table
#[derive(Clone, Copy)]
pub struct ToolEntry {
    pub name: &'static str,
    pub category: ToolCategory,
    pub factory: fn() -> anyhow::Result<Box<dyn Tool>>,
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registered: Vec<String>,
    /// `(entry name, reason)` for every factory that failed
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Registry for managing and dispatching tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    categories: BTreeMap<ToolCategory, Vec<String>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.len())
            .field("categories", &self.categories)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a later registration under the same name wins
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_boxed(&mut self, tool: Box<dyn Tool>) {
        self.register_arc(Arc::from(tool));
    }

    fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let category = tool.category();

        if let Some(previous) = self.tools.insert(name.clone(), tool) {
            debug!(tool = %name, "replacing registered tool");
            if let Some(names) = self.categories.get_mut(&previous.category()) {
                names.retain(|n| n != &name);
            }
        }
        self.categories.entry(category).or_default().push(name);
    }

    /// Build and register every entry of a static table.
    /// A factory that errors or panics is logged and skipped.
    pub fn discover_and_register(&mut self, entries: &[ToolEntry]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for entry in entries {
            let built = std::panic::catch_unwind(entry.factory)
                .map_err(|payload| format!("factory panicked: {}", panic_message(payload.as_ref())))
                .and_then(|result| result.map_err(|e| format!("{:#}", e)));

            match built {
                Ok(tool) => {
                    if tool.name() != entry.name {
                        warn!(entry = entry.name, tool = tool.name(), "tool name differs from table entry");
                    }
                    report.registered.push(tool.name().to_string());
                    self.register_boxed(tool);
                }
                Err(reason) => {
                    warn!(tool = entry.name, %reason, "skipping tool that failed to load");
                    report.failed.push((entry.name.to_string(), reason));
                }
            }
        }

        debug!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            "tool discovery finished"
        );
        report
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in lexicographic order
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tools_by_category(&self, category: ToolCategory) -> Vec<Arc<dyn Tool>> {
        let mut names: Vec<&String> = self
            .categories
            .get(&category)
            .map(|names| names.iter().collect())
            .unwrap_or_default();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .cloned()
            .collect()
    }

    /// Categories that currently hold at least one tool
    pub fn categories(&self) -> Vec<ToolCategory> {
        self.categories
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(category, _)| *category)
            .collect()
    }

    /// Check `args` against the declared parameters of `name`
    pub fn validate(&self, name: &str, args: &Value) -> Result<(), RegistryError> {
        let tool = self
            .get_tool(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        validate(&tool.parameters(), args)?;
        Ok(())
    }

    /// Look up, validate and run a tool. Always returns an envelope.
    pub async fn execute(&self, name: &str, args: Value, context: &ToolContext) -> ToolResult {
        let Some(tool) = self.get_tool(name) else {
            return ToolResult::not_found(name);
        };

        if let Err(e) = validate(&tool.parameters(), &args) {
            debug!(tool = name, error = %e, "rejected arguments");
            return ToolResult::invalid_arguments(e);
        }

        let params = match ToolParameters::from_value(args) {
            Ok(params) => params,
            Err(e) => return ToolResult::invalid_arguments(e),
        };

        let started = Instant::now();
        let outcome = AssertUnwindSafe(tool.execute(params, context))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::error_kind(
                format!("Error executing tool: {:#}", e),
                "execution_failed",
            ),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(tool = name, panic = %message, "tool panicked");
                ToolResult::error_kind(format!("Error executing tool: {}", message), "panicked")
            }
        };

        debug!(
            tool = name,
            call_id = %context.call_id,
            success = result.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool executed"
        );
        result
    }

    /// Definitions for `tools/list`, sorted by name
    pub fn mcp_definitions(&self) -> Vec<Value> {
        let mut tools: Vec<_> = self.tools.iter().collect();
        tools.sort_by_key(|(name, _)| name.as_str());
        tools
            .into_iter()
            .map(|(_, tool)| tool.to_mcp_definition())
            .collect()
    }
}
