//! LLM Provider Strategy Pattern
//!
//! A [`ChatBackend`] is the provider-specific half of a chat model: it turns
//! tool specs into the provider's schema shape, sends one prepared request
//! over the wire and parses the reply into a [`ResponseEnvelope`]. History,
//! token budgeting and the uniform operations live in
//! [`ChatSession`](crate::chat::ChatSession), which works with any backend.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::chat::ChatSession;
//!
//! let backend = OpenAiBackend::new(config)?;
//! let mut model = ChatSession::new(backend, "You are helpful.");
//! let response = model.send_user_message("Hello").await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::{Message, estimate_tokens};
use crate::response::ResponseEnvelope;
use crate::tool::ToolSpec;

/// Which tool, if any, the model must call next
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides
    #[default]
    Auto,
    /// Model must not call tools
    None,
    /// Model must call some tool
    Required,
    /// Model must call this tool
    Function(String),
}

/// Context window size and safety margin for a model
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContextWindow {
    /// Nominal context window in tokens
    pub tokens: usize,

    /// Fraction of the window held back for estimator error (0.05 = 5%)
    pub buffer_ratio: f64,
}

impl ContextWindow {
    pub const fn new(tokens: usize, buffer_ratio: f64) -> Self {
        Self {
            tokens,
            buffer_ratio,
        }
    }

    /// Usable token budget after the safety margin
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn budget(&self) -> usize {
        let margin = (self.tokens as f64 * self.buffer_ratio.clamp(0.0, 1.0)).round() as usize;
        self.tokens.saturating_sub(margin)
    }
}

/// One prepared provider request
#[derive(Clone, Debug)]
pub struct ChatRequest<'a> {
    /// System preamble (already including any tool instructions)
    pub system: &'a str,

    /// Token-budgeted history, chronological, without the preamble
    pub messages: &'a [Message],

    /// Provider-shaped tool descriptors
    pub functions: &'a [Value],

    pub tool_choice: &'a ToolChoice,
}

/// Per-provider wire strategy
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Translate a tool spec into the provider's descriptor shape.
    ///
    /// Must be pure: the same spec always yields the same descriptor.
    fn convert_function(&self, spec: &ToolSpec) -> Value;

    /// Full system preamble for the given pre-prompt and active tools
    fn system_preamble(&self, pre_prompt: &str, _functions: &[Value]) -> String {
        pre_prompt.to_string()
    }

    /// Context window used when no explicit ceiling is configured
    fn context_window(&self) -> ContextWindow;

    /// Whether the provider can be forced to call a specific tool
    fn supports_forced_tool_choice(&self) -> bool {
        true
    }

    /// Estimate token count for text (fixed heuristic encoder)
    fn estimate_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    /// Send a prepared request and parse the reply
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ResponseEnvelope>;
}
