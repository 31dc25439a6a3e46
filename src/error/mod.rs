//! Error types for agent runs.

use thiserror::Error;

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Permission,
    Protocol,
    Transport,
    Context,
    Validation,
    Provider,
    ToolExecution,
    Serialization,
    Unknown,
}

/// Primary error type for all agent run operations.
#[derive(Error, Debug)]
pub enum AgentRunError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported capability: provider '{provider}' does not support {capability}")]
    UnsupportedCapability { provider: String, capability: String },

    #[error("Permission denied: tool '{tool_id}' is not allowed for this agent")]
    PermissionDenied { tool_id: String },

    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Context contributor '{contributor}' failed: {message}")]
    ContributorFailure { contributor: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Rejected by hook: {0}")]
    HookRejected(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentRunError {
    /// Shorthand for a provider-side failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a missing capability on a provider.
    pub fn unsupported(provider: impl Into<String>, capability: impl ToString) -> Self {
        Self::UnsupportedCapability {
            provider: provider.into(),
            capability: capability.to_string(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::UnsupportedCapability { .. } => {
                ErrorCategory::Configuration
            }
            Self::PermissionDenied { .. } | Self::HookRejected(_) => ErrorCategory::Permission,
            Self::ProtocolDecode(_) => ErrorCategory::Protocol,
            Self::Transport(_) | Self::Cancelled | Self::Io(_) => ErrorCategory::Transport,
            Self::ContributorFailure { .. } => ErrorCategory::Context,
            Self::NotFound(_) | Self::InvalidArgument(_) | Self::InvalidState(_) => {
                ErrorCategory::Validation
            }
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Serialization(_) => ErrorCategory::Serialization,
        }
    }

    /// Whether this error ends the run it occurred in.
    ///
    /// Permission denials, decode failures and contributor failures are
    /// recoverable: they are logged or surfaced as tool results while the run
    /// continues.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::UnsupportedCapability { .. }
                | Self::Transport(_)
                | Self::Cancelled
        )
    }

    /// Stable machine-readable code used in `RUN_ERROR` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UnsupportedCapability { .. } => "UNSUPPORTED_CAPABILITY",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::ProtocolDecode(_) => "PROTOCOL_ERROR",
            Self::Transport(_) | Self::Io(_) => "TRANSPORT_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::ContributorFailure { .. } => "CONTEXT_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::HookRejected(_) => "EXECUTION_CANCELLED",
            Self::Provider { .. } | Self::ToolExecution { .. } | Self::Serialization(_) => {
                "STREAMING_ERROR"
            }
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgentRunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_setup_and_transport_failures_abort() {
        assert!(AgentRunError::Configuration("x".into()).aborts_run());
        assert!(AgentRunError::unsupported("openai", "embedding").aborts_run());
        assert!(AgentRunError::Transport("eof".into()).aborts_run());
        assert!(AgentRunError::Cancelled.aborts_run());

        assert!(!AgentRunError::PermissionDenied {
            tool_id: "delete".into()
        }
        .aborts_run());
        assert!(!AgentRunError::ProtocolDecode("bad".into()).aborts_run());
        assert!(!AgentRunError::ContributorFailure {
            contributor: "c".into(),
            message: "boom".into()
        }
        .aborts_run());
    }

    #[test]
    fn categories() {
        assert_eq!(
            AgentRunError::unsupported("p", "chat").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            AgentRunError::Cancelled.category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            AgentRunError::HookRejected("no".into()).category(),
            ErrorCategory::Permission
        );
    }

    #[test]
    fn messages_name_the_subject() {
        let err = AgentRunError::PermissionDenied {
            tool_id: "delete_page".into(),
        };
        assert_eq!(
            err.to_string(),
            "Permission denied: tool 'delete_page' is not allowed for this agent"
        );
        let err = AgentRunError::unsupported("openai", "embedding");
        assert!(err.to_string().contains("does not support embedding"));
    }
}
