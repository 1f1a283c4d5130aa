//! # agent-core
//!
//! Provider-agnostic tool-calling agents: a uniform chat model contract, a
//! tool registration table and a policy-parameterized agent loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//! │  │  Reasoning  │  │    Tool     │  │  ChatModel           │  │
//! │  │    Loop     │──│  Registry   │  │  (ChatSession<B>)    │  │
//! │  └─────────────┘  └─────────────┘  └──────────┬───────────┘  │
//! └───────────────────────────────────────────────┼──────────────┘
//!                                                 │
//!                                      ChatBackend (per provider)
//! ```
//!
//! The [`ChatBackend`] trait is the only provider-specific seam: OpenAI,
//! Anthropic or a JSON-convention endpoint plug in without touching the
//! loop, the history or the token budgeting.

pub mod builtin;
pub mod chat;
pub mod error;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod response;
pub mod tool;

#[cfg(test)]
mod test_helpers;

pub use chat::{ChatModel, ChatSession};
pub use error::{AgentError, Result};
pub use message::{Conversation, Message, Role};
pub use provider::{ChatBackend, ChatRequest, ContextWindow, ToolChoice};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, AgentHooks, AgentPolicy, AgentState};
pub use response::{FinishReason, ResponseEnvelope, ResponseKind, ResponseMetadata, TokenUsage};
pub use tool::{
    FnTool, HostMethod, HostParameter, ParamType, Tool, ToolArguments, ToolCall, ToolRegistry,
    ToolSpec, resolve,
};
