//! # agent-runtime
//!
//! HTTP chat model providers for tool-agents.
//!
//! ## Providers
//!
//! - **OpenAI / Azure OpenAI**: chat completions with `tools` or legacy `functions`
//! - **Anthropic**: messages API with native tool blocks or XML tool markup
//! - **JSON convention**: OpenAI-compatible endpoints (OctoAI) for models
//!   without native tool calling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::{AgentBuilder, AgentConfig, ChatSession};
//! use agent_runtime::OpenAiBackend;
//!
//! let backend = OpenAiBackend::from_env()?;
//! let agent = AgentBuilder::new()
//!     .model(ChatSession::new(backend, ""))
//!     .config(AgentConfig::functions())
//!     .build()?;
//! ```

pub mod anthropic;
pub mod json_convention;
pub mod openai;
pub mod schema;
pub mod transport;

pub use anthropic::{AnthropicBackend, AnthropicConfig, ToolFormat};
pub use json_convention::{JsonConventionBackend, JsonConventionConfig};
pub use openai::{ApiStyle, AzureOpenAiConfig, OpenAiBackend, OpenAiConfig};

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentBuilder, AgentConfig, AgentError, ChatBackend, ChatModel, ChatSession, Message,
    Result, Role, Tool, ToolRegistry,
};
