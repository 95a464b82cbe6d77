use crate::context::ToolContext;
use anyhow::Result;
use async_trait::async_trait;
use ptymux_channels::ChannelError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Tool parameters
#[derive(Debug, Clone, Default)]
pub struct ToolParameters {
    pub data: HashMap<String, Value>,
}

impl ToolParameters {
    pub fn from_json(json_str: &str) -> Result<Self> {
        let data: HashMap<String, Value> = serde_json::from_str(json_str)?;
        Ok(Self { data })
    }

    /// Accepts an object; `null` means no arguments
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                data: map.into_iter().collect(),
            }),
            Value::Null => Ok(Self::default()),
            other => anyhow::bail!("Arguments must be a JSON object, got {}", other),
        }
    }

    pub fn get_required<T>(&self, key: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = self
            .data
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| anyhow::anyhow!("Required parameter '{}' missing", key))?;

        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Failed to parse parameter '{}': {}", key, e))
    }

    pub fn get_optional<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.data.get(key) {
            Some(Value::Null) | None => Ok(None),
            Some(value) => {
                let parsed: T = serde_json::from_value(value.clone())
                    .map_err(|e| anyhow::anyhow!("Failed to parse parameter '{}': {}", key, e))?;
                Ok(Some(parsed))
            }
        }
    }

    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(self.get_optional(key)?.unwrap_or(default))
    }
}

/// Tool execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn success(content: String) -> Self {
        Self {
            success: true,
            content,
            error: None,
            metadata: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error),
            metadata: None,
        }
    }

    /// Error with a machine-readable `error_kind` in the metadata
    pub fn error_kind(error: String, kind: &str) -> Self {
        Self::error(error).with_metadata(json!({ "error_kind": kind }))
    }

    pub fn not_found(tool_name: &str) -> Self {
        Self::error_kind(format!("Tool '{}' not found", tool_name), "not_found")
    }

    pub fn invalid_arguments(reason: impl fmt::Display) -> Self {
        Self::error_kind(format!("Invalid arguments: {}", reason), "invalid_arguments")
    }

    pub fn from_channel_error(err: &ChannelError) -> Self {
        Self::error_kind(err.to_string(), err.kind_name())
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The error text, or the content on success
    pub fn text(&self) -> &str {
        match (&self.error, self.success) {
            (Some(error), false) => error,
            _ => &self.content,
        }
    }

    /// MCP `tools/call` result shape
    pub fn to_mcp_response(&self) -> Value {
        let text = if self.success {
            self.content.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        };
        let mut response = json!({
            "content": [{ "type": "text", "text": text }],
            "isError": !self.success,
        });
        if let Some(metadata) = &self.metadata {
            response["_meta"] = metadata.clone();
        }
        response
    }
}

/// Grouping used for listing and registry indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Terminal,
    Process,
    Network,
    Serial,
    Tmux,
    System,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 6] = [
        ToolCategory::Terminal,
        ToolCategory::Process,
        ToolCategory::Network,
        ToolCategory::Serial,
        ToolCategory::Tmux,
        ToolCategory::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Terminal => "terminal",
            ToolCategory::Process => "process",
            ToolCategory::Network => "network",
            ToolCategory::Serial => "serial",
            ToolCategory::Tmux => "tmux",
            ToolCategory::System => "system",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ToolCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown tool category: {}", s))
    }
}

/// Tool parameter definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub param_type: String,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
}

/// Tool trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name of the tool (must be unique)
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory;

    /// Parameter definitions
    fn parameters(&self) -> HashMap<String, ParameterDefinition>;

    /// Execute the tool.
    ///
    /// Expected failures come back as `Ok(ToolResult::error(..))`; an `Err`
    /// is reported by the registry as an execution failure.
    async fn execute(&self, params: ToolParameters, context: &ToolContext) -> Result<ToolResult>;

    /// JSON-schema object describing the arguments
    fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        let mut params: Vec<_> = self.parameters().into_iter().collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, param_def) in params {
            let mut param_json = json!({
                "type": param_def.param_type,
                "description": param_def.description,
            });
            if let Some(default) = param_def.default {
                param_json["default"] = default;
            }
            properties.insert(name.clone(), param_json);

            if param_def.required {
                required.push(name);
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }

    /// Tool definition as advertised by `tools/list`
    fn to_mcp_definition(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": self.input_schema(),
        })
    }
}

/// Helper macro for creating parameter definitions
#[macro_export]
macro_rules! param {
    ($name:expr, $type:expr, $desc:expr, required) => {
        (
            $name.to_string(),
            $crate::tool::ParameterDefinition {
                param_type: $type.to_string(),
                description: $desc.to_string(),
                required: true,
                default: None,
            },
        )
    };
    ($name:expr, $type:expr, $desc:expr, optional, $default:expr) => {
        (
            $name.to_string(),
            $crate::tool::ParameterDefinition {
                param_type: $type.to_string(),
                description: $desc.to_string(),
                required: false,
                default: Some(serde_json::Value::from($default)),
            },
        )
    };
    ($name:expr, $type:expr, $desc:expr, optional) => {
        (
            $name.to_string(),
            $crate::tool::ParameterDefinition {
                param_type: $type.to_string(),
                description: $desc.to_string(),
                required: false,
                default: None,
            },
        )
    };
}
