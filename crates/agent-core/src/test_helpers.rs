//! Scripted backend for unit tests

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{ChatBackend, ChatRequest, ContextWindow, ToolChoice};
use crate::response::ResponseEnvelope;
use crate::tool::ToolSpec;

/// Owned copy of one request the backend received
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub functions: Vec<Value>,
    pub tool_choice: ToolChoice,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<ResponseEnvelope>,
    fallback: Option<ResponseEnvelope>,
    requests: Vec<RecordedRequest>,
}

/// Inspection handle shared with a [`ScriptedBackend`]
#[derive(Clone)]
pub struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.0.lock().unwrap().requests.clone()
    }
}

/// Replays canned envelopes in order
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    forced_choice: bool,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<ResponseEnvelope>) -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script {
            replies: replies.into(),
            ..Script::default()
        }));
        let handle = ScriptHandle(Arc::clone(&script));
        (
            Self {
                script,
                forced_choice: true,
            },
            handle,
        )
    }

    /// Returns the same envelope forever once the script runs out
    pub fn repeating(reply: ResponseEnvelope) -> (Self, ScriptHandle) {
        let (backend, handle) = Self::new(vec![]);
        backend.script.lock().unwrap().fallback = Some(reply);
        (backend, handle)
    }

    pub fn without_forced_choice(mut self) -> Self {
        self.forced_choice = false;
        self
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn convert_function(&self, spec: &ToolSpec) -> Value {
        json!({
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
            "required": spec.required,
        })
    }

    fn context_window(&self) -> ContextWindow {
        ContextWindow::new(100_000, 0.0)
    }

    fn supports_forced_tool_choice(&self) -> bool {
        self.forced_choice
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ResponseEnvelope> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(RecordedRequest {
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            functions: request.functions.to_vec(),
            tool_choice: request.tool_choice.clone(),
        });
        match script.replies.pop_front() {
            Some(reply) => Ok(reply),
            None => script
                .fallback
                .clone()
                .ok_or_else(|| AgentError::Other("script exhausted".into())),
        }
    }
}
