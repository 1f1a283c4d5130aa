//! Response Envelope
//!
//! The uniform value every chat model returns after a provider query.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::message::Message;
use crate::tool::ToolCall;

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Map a provider stop/finish reason string
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "function_call" | "tool_use" => Self::ToolUse,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Opaque response metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Provider request/response id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Model that generated the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// Provider-specific extras
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Uniform response from a chat model.
///
/// A well-formed envelope is exactly one of: an error, one or more tool calls
/// (possibly with accompanying text), or final text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub text: Option<String>,

    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    pub error: Option<String>,

    #[serde(default)]
    pub metadata: ResponseMetadata,
}

/// Borrowed view of what an envelope carries
#[derive(Debug, PartialEq)]
pub enum ResponseKind<'a> {
    Error(&'a str),
    ToolCalls(&'a [ToolCall]),
    Text(&'a str),
}

impl ResponseEnvelope {
    /// Final text response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Tool call response, with optional accompanying text
    pub fn tool_calls(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            text: text.filter(|t| !t.is_empty()),
            tool_calls: calls,
            ..Self::default()
        }
    }

    /// Provider-reported error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn kind(&self) -> ResponseKind<'_> {
        if let Some(err) = &self.error {
            ResponseKind::Error(err)
        } else if !self.tool_calls.is_empty() {
            ResponseKind::ToolCalls(&self.tool_calls)
        } else {
            ResponseKind::Text(self.text.as_deref().unwrap_or_default())
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.error.is_none() && !self.tool_calls.is_empty()
    }

    /// The assistant history entry this response corresponds to
    pub fn to_message(&self) -> Message {
        let text = self.text.clone().unwrap_or_default();
        if self.tool_calls.is_empty() {
            Message::assistant(text)
        } else {
            Message::tool_call(text, self.tool_calls.clone())
        }
    }
}
