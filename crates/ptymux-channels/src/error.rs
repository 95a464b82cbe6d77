use ptymux_types::ChannelKind;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Failures surfaced by channels and the multiplexer manager
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0} session already active")]
    AlreadyOpen(ChannelKind),

    #[error("No active {0} session")]
    NotOpen(ChannelKind),

    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("Session '{0}' already exists")]
    AlreadyExists(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{context}: {source}")]
    Os {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0} is not installed or not on PATH")]
    ExternalToolMissing(String),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

impl ChannelError {
    pub fn os(context: impl Into<String>, source: io::Error) -> Self {
        ChannelError::Os {
            context: context.into(),
            source,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ChannelError::InvalidParams(message.into())
    }

    /// Stable snake_case tag used in tool result metadata
    pub fn kind_name(&self) -> &'static str {
        match self {
            ChannelError::AlreadyOpen(_) => "already_open",
            ChannelError::NotOpen(_) => "not_open",
            ChannelError::NotFound(_) => "not_found",
            ChannelError::AlreadyExists(_) => "already_exists",
            ChannelError::InvalidParams(_) => "invalid_params",
            ChannelError::Os { .. } => "os_failure",
            ChannelError::Timeout(_) => "timeout",
            ChannelError::ExternalToolMissing(_) => "external_tool_missing",
            ChannelError::CommandFailed { .. } => "command_failed",
        }
    }
}

/// Attach a context string to an `io::Result`
pub(crate) trait OsContext<T> {
    fn os_context(self, context: &str) -> ChannelResult<T>;
}

impl<T> OsContext<T> for io::Result<T> {
    fn os_context(self, context: &str) -> ChannelResult<T> {
        self.map_err(|e| ChannelError::os(context, e))
    }
}
