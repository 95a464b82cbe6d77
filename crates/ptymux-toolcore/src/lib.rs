//! Tool abstraction, argument validation and dispatch for ptymux

pub mod context;
pub mod registry;
pub mod schema;
pub mod tool;

pub use context::{SharedSessions, ToolContext};
pub use registry::{DiscoveryReport, RegistryError, ToolEntry, ToolRegistry};
pub use schema::ValidationError;
pub use tool::{ParameterDefinition, Tool, ToolCategory, ToolParameters, ToolResult};
