//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing or invalid provider credential/endpoint value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network, auth or rate-limit failure talking to the provider
    #[error("Provider transport error: {message}")]
    ProviderTransport {
        status: Option<u16>,
        message: String,
    },

    /// Provider returned a payload the adapter cannot parse
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Provider response carried neither text nor a tool call
    #[error("Empty model response: {0}")]
    EmptyModelResponse(String),

    /// Provider reported an error inside an otherwise well-formed response
    #[error("Model error: {0}")]
    ModelError(String),

    /// Tool call ceiling reached within a single turn
    #[error("Too many function calls have occurred in a row ({0})")]
    TooManyToolCalls(usize),

    /// Agent asked to run in a state that does not accept turns
    #[error("Invalid agent state: {0}")]
    InvalidState(String),

    /// Host method marked as a tool but missing required metadata
    #[error("Malformed tool metadata: {0}")]
    MalformedToolMetadata(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments failed validation
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Build a transport error from an HTTP status and raw body
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ProviderTransport {
            status,
            message: message.into(),
        }
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderTransport { status: None, .. } => true,
            Self::ProviderTransport { status: Some(code), .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("The agent is not configured correctly: {msg}"),
            Self::ProviderTransport { status: Some(401 | 403), .. } => {
                "Authentication with the AI service failed. Please check your credentials.".into()
            }
            Self::ProviderTransport { status: Some(429), .. } => {
                "You've made too many requests. Please wait a moment.".into()
            }
            Self::ProviderTransport { .. } => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::Protocol(_) | Self::EmptyModelResponse(_) => {
                "The AI service returned a response that could not be understood.".into()
            }
            Self::ModelError(msg) => format!("The AI service encountered an error: {msg}"),
            Self::TooManyToolCalls(_) => {
                "The request took too many steps to process. Please try a simpler query.".into()
            }
            Self::InvalidState(_) => "The agent has finished and must be reset before continuing.".into(),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolValidation(msg) => format!("Invalid tool input: {msg}"),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
