//! Conversation Messages
//!
//! Provider-neutral history entries and the owned conversation log each chat
//! model keeps. Adapters translate these into their wire formats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::tool::ToolCall;

/// Role of a history entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) text response
    Assistant,
    /// Assistant response requesting one or more tool calls
    ToolCall,
    /// Result of a tool call
    ToolResult,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::ToolCall => write!(f, "tool_call"),
            Self::ToolResult => write!(f, "tool_result"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content
    pub content: String,

    /// Tool calls requested by the assistant (tool-call messages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Tool name (tool-result messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Correlates a tool result with its call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            name: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls
    pub fn tool_call(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::ToolCall, content);
        msg.tool_calls = calls;
        msg
    }

    /// Create a tool result message
    pub fn tool_result(
        name: impl Into<String>,
        content: impl Into<String>,
        tool_call_id: Option<String>,
    ) -> Self {
        let mut msg = Self::new(Role::ToolResult, content);
        msg.name = Some(name.into());
        msg.tool_call_id = tool_call_id;
        msg
    }

    /// True for messages produced by the assistant
    pub const fn is_assistant(&self) -> bool {
        matches!(self.role, Role::Assistant | Role::ToolCall)
    }

    /// Estimate token count: content plus any embedded tool-call payload
    pub fn estimate_tokens(&self) -> usize {
        let calls: usize = self
            .tool_calls
            .iter()
            .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments.to_string()))
            .sum();
        MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&self.content) + calls
    }
}

/// Per-message overhead for role names and delimiters
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token count of a string (~4 characters per token, rounded up)
pub const fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Conversation history owned by a single chat model.
///
/// Grows by append; shrinks only by dropping the newest entry
/// ([`Conversation::retract_last`]) or, when preparing a request, by leaving
/// out the oldest entries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation from existing messages
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Remove and return the newest message
    pub fn retract_last(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Estimate total tokens in conversation
    pub fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }

    /// Id of the most recent call to `name` that has no result yet
    pub fn pending_call_id(&self, name: &str) -> Option<String> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::ToolResult)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages
            .iter()
            .rev()
            .flat_map(|m| m.tool_calls.iter().rev())
            .filter(|c| c.name == name)
            .filter_map(|c| c.id.as_deref())
            .find(|id| !answered.contains(id))
            .map(str::to_string)
    }

    /// Select the newest messages (plus an optional pending one) that fit the
    /// token budget, in chronological order.
    ///
    /// `reserved` is the cost of the system preamble, which is always counted
    /// first. The pending message is always kept, even past the budget, since
    /// it is the one being sent. History is walked newest to oldest and the
    /// walk stops at the first message that would exceed the budget. Tool
    /// results left at the front without their call are dropped as well.
    pub fn prepare_context<F>(
        &self,
        pending: Option<&Message>,
        reserved: usize,
        max_tokens: usize,
        estimate: F,
    ) -> Vec<Message>
    where
        F: Fn(&Message) -> usize,
    {
        let mut used = reserved + pending.map_or(0, &estimate);
        if used > max_tokens {
            tracing::warn!(used, max_tokens, "Pending message alone exceeds the token budget");
        }

        let mut kept: Vec<Message> = Vec::new();
        for msg in self.messages.iter().rev() {
            let cost = estimate(msg);
            if used + cost > max_tokens {
                break;
            }
            used += cost;
            kept.push(msg.clone());
        }

        kept.reverse();

        let dropped = self.messages.len() - kept.len();
        if dropped > 0 {
            tracing::debug!(dropped, used, max_tokens, "Truncated oldest history to fit token budget");
        }

        let orphans = kept
            .iter()
            .take_while(|m| m.role == Role::ToolResult)
            .count();
        kept.drain(..orphans);
        kept.extend(pending.cloned());
        kept
    }
}

/// Give every tool call in `messages` a matching result.
///
/// Providers that reject unanswered calls need this when a result was never
/// recorded (for example an empty result that was suppressed). Missing
/// results are inserted as empty results right after the calling message's
/// existing results.
pub fn answer_pending_calls(messages: Vec<Message>) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    let mut pending: Vec<ToolCall> = Vec::new();

    for msg in messages {
        if msg.role == Role::ToolResult {
            if let Some(id) = msg.tool_call_id.as_deref() {
                pending.retain(|c| c.id.as_deref() != Some(id));
            }
        } else {
            flush_pending(&mut out, &mut pending);
        }
        if msg.role == Role::ToolCall {
            pending.extend(msg.tool_calls.iter().filter(|c| c.id.is_some()).cloned());
        }
        out.push(msg);
    }
    flush_pending(&mut out, &mut pending);
    out
}

fn flush_pending(out: &mut Vec<Message>, pending: &mut Vec<ToolCall>) {
    for call in pending.drain(..) {
        out.push(Message::tool_result(call.name, "", call.id));
    }
}
