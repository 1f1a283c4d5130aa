//! Chat Models
//!
//! [`ChatModel`] is the uniform contract the agent loop talks to.
//! [`ChatSession`] implements it once for every provider: it owns the
//! conversation history, the active tool descriptors and the pre-prompt, fits
//! each outgoing request into the token budget and delegates the wire work to
//! a [`ChatBackend`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, MESSAGE_OVERHEAD_TOKENS, Message};
use crate::provider::{ChatBackend, ChatRequest, ToolChoice};
use crate::response::ResponseEnvelope;
use crate::tool::{ToolCall, ToolSpec};

/// Uniform chat model operations
#[async_trait]
pub trait ChatModel: Send {
    /// Conversation history so far
    fn history(&self) -> &Conversation;

    fn pre_prompt(&self) -> &str;

    fn set_pre_prompt(&mut self, prompt: &str);

    /// Replace the active tool set; identical descriptors are deduplicated
    fn set_functions(&mut self, specs: &[ToolSpec]);

    /// Active provider-shaped tool descriptors
    fn functions(&self) -> &[Value];

    fn tool_choice(&self) -> &ToolChoice;

    fn set_tool_choice(&mut self, choice: ToolChoice);

    /// Append a user message and query the model
    async fn send_user_message(&mut self, text: &str) -> Result<ResponseEnvelope>;

    /// Append a system message and query the model
    async fn send_system_message(&mut self, text: &str) -> Result<ResponseEnvelope>;

    /// Force the model to call the named tool
    async fn send_function_call(&mut self, name: &str) -> Result<ResponseEnvelope>;

    /// Append a tool result and query the model
    async fn send_function_result(
        &mut self,
        name: &str,
        result: &str,
        call_id: Option<&str>,
    ) -> Result<ResponseEnvelope>;

    /// Query the model on the current history without adding anything
    async fn generate(&mut self) -> Result<ResponseEnvelope>;

    fn record_user_message(&mut self, text: &str);

    fn record_system_message(&mut self, text: &str);

    fn record_assistant_message(&mut self, text: &str);

    /// Record a tool result without querying the model
    fn record_function_result(&mut self, name: &str, result: &str, call_id: Option<&str>);

    /// Record an assistant tool call without querying the model
    fn record_assistant_function(&mut self, name: &str, arguments: Value, call_id: Option<&str>);

    /// Drop the newest history entry
    fn retract_last(&mut self) -> Option<Message>;
}

/// Provider-independent chat model over a [`ChatBackend`]
pub struct ChatSession<B: ChatBackend> {
    backend: B,
    history: Conversation,
    pre_prompt: String,
    functions: Vec<Value>,
    tool_choice: ToolChoice,
    max_context_tokens: Option<usize>,
    suppress_empty_function_results: bool,
}

impl<B: ChatBackend> ChatSession<B> {
    pub fn new(backend: B, pre_prompt: impl Into<String>) -> Self {
        Self {
            backend,
            history: Conversation::new(),
            pre_prompt: pre_prompt.into(),
            functions: Vec::new(),
            tool_choice: ToolChoice::Auto,
            max_context_tokens: None,
            suppress_empty_function_results: true,
        }
    }

    /// Start from an existing history
    #[must_use]
    pub fn with_history(mut self, history: Conversation) -> Self {
        self.history = history;
        self
    }

    /// Override the provider's context window guess
    #[must_use]
    pub const fn with_max_context_tokens(mut self, max: usize) -> Self {
        self.max_context_tokens = Some(max);
        self
    }

    /// Whether recording an empty tool result is a no-op (default: true)
    #[must_use]
    pub const fn with_suppress_empty_function_results(mut self, suppress: bool) -> Self {
        self.suppress_empty_function_results = suppress;
        self
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Token ceiling for one outgoing request
    pub fn token_budget(&self) -> usize {
        self.max_context_tokens
            .unwrap_or_else(|| self.backend.context_window().budget())
    }

    /// The request context that would be sent next, with `pending` appended
    pub fn prepared_context(&self, pending: Option<&Message>) -> (String, Vec<Message>) {
        let preamble = self.backend.system_preamble(&self.pre_prompt, &self.functions);
        let reserved = if preamble.is_empty() {
            0
        } else {
            MESSAGE_OVERHEAD_TOKENS + self.backend.estimate_tokens(&preamble)
        };
        let backend = &self.backend;
        let messages = self.history.prepare_context(
            pending,
            reserved,
            self.token_budget(),
            |m| estimate_message(backend, m),
        );
        (preamble, messages)
    }

    async fn query(&mut self, pending: Option<Message>) -> Result<ResponseEnvelope> {
        let (preamble, messages) = self.prepared_context(pending.as_ref());
        let tool_choice = self.tool_choice.clone();

        tracing::debug!(
            provider = self.backend.name(),
            messages = messages.len(),
            functions = self.functions.len(),
            ?tool_choice,
            "Querying chat model"
        );

        let request = ChatRequest {
            system: &preamble,
            messages: &messages,
            functions: &self.functions,
            tool_choice: &tool_choice,
        };
        let mut envelope = self.backend.complete(&request).await?;

        if let Some(err) = &envelope.error {
            tracing::warn!(provider = self.backend.name(), error = %err, "Model returned an error");
            return Ok(envelope);
        }

        let has_text = envelope.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        if envelope.tool_calls.is_empty() && !has_text {
            return Err(AgentError::EmptyModelResponse(format!(
                "{} returned no text and no tool call",
                self.backend.name()
            )));
        }

        for call in &mut envelope.tool_calls {
            if call.id.is_none() {
                call.id = Some(new_call_id());
            }
        }

        if let Some(msg) = pending {
            self.history.push(msg);
        }
        self.history.push(envelope.to_message());

        Ok(envelope)
    }
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn estimate_message<B: ChatBackend>(backend: &B, msg: &Message) -> usize {
    let calls: usize = msg
        .tool_calls
        .iter()
        .map(|c| backend.estimate_tokens(&c.name) + backend.estimate_tokens(&c.arguments.to_string()))
        .sum();
    MESSAGE_OVERHEAD_TOKENS + backend.estimate_tokens(&msg.content) + calls
}

#[async_trait]
impl<B: ChatBackend> ChatModel for ChatSession<B> {
    fn history(&self) -> &Conversation {
        &self.history
    }

    fn pre_prompt(&self) -> &str {
        &self.pre_prompt
    }

    fn set_pre_prompt(&mut self, prompt: &str) {
        self.pre_prompt = prompt.to_string();
    }

    fn set_functions(&mut self, specs: &[ToolSpec]) {
        let mut functions: Vec<Value> = Vec::with_capacity(specs.len());
        for spec in specs {
            let descriptor = self.backend.convert_function(spec);
            if !functions.contains(&descriptor) {
                functions.push(descriptor);
            }
        }
        tracing::debug!(provider = self.backend.name(), count = functions.len(), "Active functions set");
        self.functions = functions;
    }

    fn functions(&self) -> &[Value] {
        &self.functions
    }

    fn tool_choice(&self) -> &ToolChoice {
        &self.tool_choice
    }

    fn set_tool_choice(&mut self, choice: ToolChoice) {
        self.tool_choice = choice;
    }

    async fn send_user_message(&mut self, text: &str) -> Result<ResponseEnvelope> {
        self.query(Some(Message::user(text))).await
    }

    async fn send_system_message(&mut self, text: &str) -> Result<ResponseEnvelope> {
        self.query(Some(Message::system(text))).await
    }

    async fn send_function_call(&mut self, name: &str) -> Result<ResponseEnvelope> {
        if !self.backend.supports_forced_tool_choice() {
            return self
                .query(Some(Message::user(format!("Call the function {name}"))))
                .await;
        }

        let previous = std::mem::replace(&mut self.tool_choice, ToolChoice::Function(name.to_string()));
        let result = self.query(None).await;
        self.tool_choice = previous;
        result
    }

    async fn send_function_result(
        &mut self,
        name: &str,
        result: &str,
        call_id: Option<&str>,
    ) -> Result<ResponseEnvelope> {
        let id = call_id
            .map(str::to_string)
            .or_else(|| self.history.pending_call_id(name));
        self.query(Some(Message::tool_result(name, result, id))).await
    }

    async fn generate(&mut self) -> Result<ResponseEnvelope> {
        self.query(None).await
    }

    fn record_user_message(&mut self, text: &str) {
        self.history.push(Message::user(text));
    }

    fn record_system_message(&mut self, text: &str) {
        self.history.push(Message::system(text));
    }

    fn record_assistant_message(&mut self, text: &str) {
        self.history.push(Message::assistant(text));
    }

    fn record_function_result(&mut self, name: &str, result: &str, call_id: Option<&str>) {
        if result.is_empty() && self.suppress_empty_function_results {
            tracing::trace!(function = name, "Skipping empty function result");
            return;
        }
        let id = call_id
            .map(str::to_string)
            .or_else(|| self.history.pending_call_id(name));
        self.history.push(Message::tool_result(name, result, id));
    }

    fn record_assistant_function(&mut self, name: &str, arguments: Value, call_id: Option<&str>) {
        let id = call_id.map_or_else(new_call_id, str::to_string);
        let call = ToolCall::new(name, arguments).with_id(id);
        self.history.push(Message::tool_call("", vec![call]));
    }

    fn retract_last(&mut self) -> Option<Message> {
        self.history.retract_last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::test_helpers::ScriptedBackend;
    use crate::tool::ParamType;
    use serde_json::json;

    fn add_spec() -> ToolSpec {
        ToolSpec::new("add", "add two numbers together")
            .param("a", ParamType::Number, "", true)
            .param("b", ParamType::Number, "", true)
    }

    #[test]
    fn test_set_functions_dedups() {
        let (backend, _) = ScriptedBackend::new(vec![]);
        let mut session = ChatSession::new(backend, "");
        session.set_functions(&[add_spec(), add_spec(), ToolSpec::new("now", "current time")]);
        assert_eq!(session.functions().len(), 2);

        session.set_functions(&[add_spec()]);
        assert_eq!(session.functions().len(), 1);
    }

    #[tokio::test]
    async fn test_send_user_message_records_both_sides() {
        let (backend, handle) = ScriptedBackend::new(vec![ResponseEnvelope::text("Hello!")]);
        let mut session = ChatSession::new(backend, "Be nice.");

        let env = session.send_user_message("Hi").await.unwrap();
        assert_eq!(env.text.as_deref(), Some("Hello!"));

        let roles: Vec<Role> = session.history().messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);

        let requests = handle.requests();
        assert_eq!(requests[0].system, "Be nice.");
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].content, "Hi");
    }

    #[tokio::test]
    async fn test_failed_query_leaves_history_untouched() {
        let (backend, _) = ScriptedBackend::new(vec![ResponseEnvelope::error("overloaded")]);
        let mut session = ChatSession::new(backend, "");

        let env = session.send_user_message("Hi").await.unwrap();
        assert_eq!(env.error.as_deref(), Some("overloaded"));
        assert!(session.history().is_empty());

        let (backend, _) = ScriptedBackend::new(vec![ResponseEnvelope::default()]);
        let mut session = ChatSession::new(backend, "");
        let err = session.send_user_message("Hi").await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyModelResponse(_)));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_forced_tool_choice_is_restored() {
        let call = ToolCall::new("add", json!({"a": 1, "b": 2}));
        let (backend, handle) = ScriptedBackend::new(vec![
            ResponseEnvelope::tool_calls(None, vec![call]),
            ResponseEnvelope::text("ok"),
        ]);
        let mut session = ChatSession::new(backend, "");
        session.set_tool_choice(ToolChoice::None);

        let env = session.send_function_call("add").await.unwrap();
        assert!(env.tool_calls[0].id.is_some());
        assert_eq!(session.tool_choice(), &ToolChoice::None);

        session.send_user_message("next").await.unwrap();
        let requests = handle.requests();
        assert_eq!(requests[0].tool_choice, ToolChoice::Function("add".into()));
        assert_eq!(requests[1].tool_choice, ToolChoice::None);
    }

    #[tokio::test]
    async fn test_forced_call_without_native_support_uses_instruction() {
        let (backend, handle) = ScriptedBackend::new(vec![ResponseEnvelope::text("fine")]);
        let mut session = ChatSession::new(backend.without_forced_choice(), "");

        session.send_function_call("record_thought").await.unwrap();
        let requests = handle.requests();
        assert_eq!(requests[0].tool_choice, ToolChoice::Auto);
        assert_eq!(
            requests[0].messages.last().unwrap().content,
            "Call the function record_thought"
        );
    }

    #[tokio::test]
    async fn test_function_result_pairs_with_pending_call() {
        let call = ToolCall::new("add", json!({"a": 2, "b": 3})).with_id("call_1");
        let (backend, handle) = ScriptedBackend::new(vec![
            ResponseEnvelope::tool_calls(None, vec![call]),
            ResponseEnvelope::text("5"),
        ]);
        let mut session = ChatSession::new(backend, "");

        session.send_user_message("2+3?").await.unwrap();
        session.send_function_result("add", "5", None).await.unwrap();

        let sent = &handle.requests()[1].messages;
        let result = sent.last().unwrap();
        assert_eq!(result.role, Role::ToolResult);
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_record_operations_do_not_query() {
        let (backend, handle) = ScriptedBackend::new(vec![]);
        let mut session = ChatSession::new(backend, "");

        session.record_user_message("hello");
        session.record_system_message("be brief");
        session.record_assistant_function("add", json!({"a": 1}), None);
        session.record_function_result("add", "", None);
        session.record_function_result("add", "1", None);
        session.record_assistant_message("one");

        assert!(handle.requests().is_empty());
        let history = session.history().messages();
        assert_eq!(history.len(), 5);
        assert_eq!(history[3].tool_call_id, history[2].tool_calls[0].id);
    }

    #[test]
    fn test_empty_result_suppression_is_configurable() {
        let (backend, _) = ScriptedBackend::new(vec![]);
        let mut session = ChatSession::new(backend, "").with_suppress_empty_function_results(false);
        session.record_function_result("record_thought", "", None);
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_budget_truncates_oldest_and_keeps_preamble() {
        let (backend, handle) = ScriptedBackend::new(vec![ResponseEnvelope::text("ok")]);
        let mut history = Conversation::new();
        for i in 0..20 {
            history.push(Message::user(format!("message number {i} {}", "z".repeat(80))));
        }
        let mut session = ChatSession::new(backend, "You are a helpful generalist assistant.")
            .with_history(history)
            .with_max_context_tokens(120);

        session.send_user_message("latest question").await.unwrap();

        let request = &handle.requests()[0];
        assert_eq!(request.system, "You are a helpful generalist assistant.");
        assert!(request.messages.len() < 21);
        assert_eq!(request.messages.last().unwrap().content, "latest question");

        let reserved = MESSAGE_OVERHEAD_TOKENS + crate::message::estimate_tokens(&request.system);
        let used: usize = request.messages.iter().map(Message::estimate_tokens).sum();
        assert!(reserved + used <= 120);

        // the kept messages are the newest ones, in order
        let all = session.history().messages();
        let kept = &all[all.len() - 1 - request.messages.len()..all.len() - 1];
        assert_eq!(kept, request.messages.as_slice());
    }
}
