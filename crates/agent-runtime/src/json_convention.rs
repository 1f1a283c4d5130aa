//! JSON Convention Provider
//!
//! For OpenAI-compatible chat endpoints serving models without native tool
//! support (Llama 2 on OctoAI by default). Every message is wrapped in a small
//! JSON document naming its source, the tool list is embedded in the system
//! preamble, and the model is instructed to answer with
//! `{"function": ..., "parameters": {...}}`. Replies are scanned for that shape.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{ChatBackend, ChatRequest, ContextWindow},
    response::{FinishReason, ResponseEnvelope, ResponseMetadata, TokenUsage},
    tool::{ToolCall, ToolSpec},
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};

use crate::transport::{build_client, error_message, optional_env, required_env, send_json};

const OCTOAI_URL: &str = "https://text.octoai.run/v1/chat/completions";
const DEFAULT_MODEL: &str = "llama-2-70b-chat-fp16";
const CONTEXT_WINDOW: ContextWindow = ContextWindow::new(8192, 0.0);

const RESPONSE_FORMAT_INSTRUCTION: &str =
    "\nAll responses should be JSON formatted and call a function, following this message as an example\n";
const RESPONSE_EXAMPLE: &str =
    r#"{"function":"example_function","parameters":{"param1":"value1","param2":"value2"}}"#;

/// JSON convention provider configuration
#[derive(Clone, Debug)]
pub struct JsonConventionConfig {
    pub api_key: String,

    /// Full chat completions URL
    pub url: String,

    pub model: String,

    pub max_tokens: u32,

    pub temperature: f32,

    pub top_p: f32,

    pub presence_penalty: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for JsonConventionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: OCTOAI_URL.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: 128,
            temperature: 0.1,
            top_p: 0.9,
            presence_penalty: 0.0,
            timeout_secs: 120,
        }
    }
}

impl JsonConventionConfig {
    /// `OCTOAI_API_KEY` (required), `OCTOAI_URL`, `OCTOAI_MODEL`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_key: required_env("OCTOAI_API_KEY")?,
            url: optional_env("OCTOAI_URL").unwrap_or(defaults.url),
            model: optional_env("OCTOAI_MODEL").unwrap_or(defaults.model),
            ..defaults
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Backend speaking the JSON message convention
pub struct JsonConventionBackend {
    client: Client,
    config: JsonConventionConfig,
}

impl JsonConventionBackend {
    pub fn new(config: JsonConventionConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::Config("OctoAI api_key is not set".into()));
        }
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            config,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(JsonConventionConfig::from_env()?)
    }

    pub const fn config(&self) -> &JsonConventionConfig {
        &self.config
    }

    pub fn build_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(request.messages.iter().map(wrap_message));
        json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "presence_penalty": self.config.presence_penalty,
        })
    }
}

fn source_document(source: &str, data: Value) -> String {
    json!({ "source": source, "data": data }).to_string()
}

fn wrap_message(msg: &Message) -> Value {
    let (role, content) = match msg.role {
        Role::User => ("user", source_document("user", json!({ "message": msg.content }))),
        Role::System => ("system", source_document("system", json!({ "message": msg.content }))),
        Role::Assistant => ("assistant", msg.content.clone()),
        Role::ToolCall => {
            let content = msg.tool_calls.first().map_or_else(
                || msg.content.clone(),
                |call| {
                    let parameters = call.arguments_object().unwrap_or_default();
                    json!({ "function": call.name, "parameters": parameters }).to_string()
                },
            );
            ("assistant", content)
        }
        Role::ToolResult => (
            "user",
            source_document(
                "function_result",
                json!({
                    "function_name": msg.name.as_deref().unwrap_or_default(),
                    "result": msg.content,
                }),
            ),
        ),
    };
    json!({ "role": role, "content": content })
}

/// Find a `{"function": ..., "parameters": ...}` object in reply text
pub fn parse_function_reply(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();
    let candidate = serde_json::from_str::<Value>(trimmed).ok().or_else(|| {
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&trimmed[start..=end]).ok()
    })?;

    let name = candidate.get("function")?.as_str()?;
    let arguments = match candidate.get("parameters") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(raw)) => Value::String(raw.clone()),
        _ => Value::Object(Map::new()),
    };
    Some(ToolCall::new(name, arguments))
}

/// Parse a chat completions reply under the JSON convention
pub fn parse_response(body: &Value) -> Result<ResponseEnvelope> {
    if let Some(error) = body.get("error") {
        return Ok(ResponseEnvelope::error(error_message(error)));
    }

    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| AgentError::Protocol(format!("completion has no choices: {body}")))?;
    let message = choice
        .get("message")
        .ok_or_else(|| AgentError::Protocol("completion choice has no message".into()))?;
    let content = message.get("content").and_then(Value::as_str).unwrap_or_default();

    let native = message.get("function_call").and_then(|fc| {
        let name = fc.get("name")?.as_str()?;
        Some(ToolCall::new(name, fc.get("arguments").cloned().unwrap_or(Value::Null)))
    });

    let usage = body.get("usage").map(|u| {
        let count = |key: &str| {
            u.get(key)
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or_default()
        };
        TokenUsage::new(count("prompt_tokens"), count("completion_tokens"))
    });
    let metadata = ResponseMetadata {
        id: body.get("id").and_then(Value::as_str).map(str::to_string),
        model: body.get("model").and_then(Value::as_str).map(str::to_string),
        usage,
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(FinishReason::from_provider),
        ..ResponseMetadata::default()
    };

    let envelope = match native.or_else(|| parse_function_reply(content)) {
        Some(call) => ResponseEnvelope::tool_calls(None, vec![call]),
        None => ResponseEnvelope::text(content),
    };
    Ok(envelope.with_metadata(metadata))
}

#[async_trait]
impl ChatBackend for JsonConventionBackend {
    fn name(&self) -> &str {
        "json-convention"
    }

    fn convert_function(&self, spec: &ToolSpec) -> Value {
        let parameters: Vec<Value> = spec
            .parameters
            .iter()
            .map(|p| {
                let mut param = json!({
                    "name": p.name,
                    "type": p.param_type.as_str(),
                    "description": p.description,
                });
                if spec.is_required(&p.name) {
                    param["required"] = json!(true);
                }
                param
            })
            .collect();
        json!({
            "name": spec.name,
            "description": spec.description,
            "parameters": parameters,
        })
    }

    fn system_preamble(&self, pre_prompt: &str, functions: &[Value]) -> String {
        let instructions = json!({
            "source": "instructions",
            "data": { "message": pre_prompt },
            "functions_available": functions,
        });
        format!("{instructions}{RESPONSE_FORMAT_INSTRUCTION}{RESPONSE_EXAMPLE}")
    }

    fn context_window(&self) -> ContextWindow {
        CONTEXT_WINDOW
    }

    fn supports_forced_tool_choice(&self) -> bool {
        false
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ResponseEnvelope> {
        let body = self.build_body(request);
        let http = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&body);

        let reply = send_json("octoai", http).await?;
        let envelope = parse_response(&reply)?;
        tracing::debug!(
            model = %self.config.model,
            tool_calls = envelope.tool_calls.len(),
            "JSON convention completion received"
        );
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::provider::ToolChoice;
    use agent_core::tool::ParamType;

    fn backend() -> JsonConventionBackend {
        JsonConventionBackend::new(JsonConventionConfig {
            api_key: "test-key".into(),
            ..JsonConventionConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_descriptor_lists_parameters() {
        let spec = ToolSpec::new("current_date", "today's date")
            .param("time_zone_hours_offset", ParamType::Number, "offset", false);
        let descriptor = backend().convert_function(&spec);
        assert_eq!(descriptor["parameters"][0]["name"], "time_zone_hours_offset");
        assert!(descriptor["parameters"][0].get("required").is_none());
    }

    #[test]
    fn test_preamble_embeds_tools_and_example() {
        let backend = backend();
        let functions = vec![backend.convert_function(&ToolSpec::new("complete_task", "done"))];
        let preamble = backend.system_preamble("Be helpful.", &functions);

        let (document, rest) = preamble.split_once('\n').unwrap();
        let document: Value = serde_json::from_str(document).unwrap();
        assert_eq!(document["source"], "instructions");
        assert_eq!(document["data"]["message"], "Be helpful.");
        assert_eq!(document["functions_available"][0]["name"], "complete_task");
        assert!(rest.ends_with(RESPONSE_EXAMPLE));
    }

    #[test]
    fn test_messages_are_wrapped() {
        let messages = vec![
            Message::user("What is 2+3?"),
            Message::tool_call("", vec![ToolCall::new("add", json!({"a": 2, "b": 3}))]),
            Message::tool_result("add", "5", None),
        ];
        let body = backend().build_body(&ChatRequest {
            system: "sys",
            messages: &messages,
            functions: &[],
            tool_choice: &ToolChoice::Auto,
        });

        let wire = body["messages"].as_array().unwrap();
        assert_eq!(wire[0]["content"], "sys");
        let user: Value = serde_json::from_str(wire[1]["content"].as_str().unwrap()).unwrap();
        assert_eq!(user, json!({"source": "user", "data": {"message": "What is 2+3?"}}));
        let call: Value = serde_json::from_str(wire[2]["content"].as_str().unwrap()).unwrap();
        assert_eq!(call, json!({"function": "add", "parameters": {"a": 2, "b": 3}}));
        let result: Value = serde_json::from_str(wire[3]["content"].as_str().unwrap()).unwrap();
        assert_eq!(result["source"], "function_result");
        assert_eq!(result["data"]["function_name"], "add");
        assert_eq!(wire[3]["role"], "user");
        assert_eq!(body["max_tokens"], 128);
    }

    #[test]
    fn test_parse_function_reply() {
        let call = parse_function_reply(
            r#"Sure! {"function": "add", "parameters": {"a": 2, "b": 3}} Hope that helps."#,
        )
        .unwrap();
        assert_eq!(call.name, "add");
        assert_eq!(call.arguments, json!({"a": 2, "b": 3}));

        assert!(parse_function_reply("The answer is 5.").is_none());
        assert!(parse_function_reply(r#"{"message": "hi"}"#).is_none());
    }

    #[test]
    fn test_parse_response_text_and_call() {
        let text = parse_response(&json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}]
        }))
        .unwrap();
        assert_eq!(text.text.as_deref(), Some("Hello"));
        assert_eq!(text.metadata.finish_reason, Some(FinishReason::Stop));

        let call = parse_response(&json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"function\":\"complete_task\",\"parameters\":{}}"}}]
        }))
        .unwrap();
        assert_eq!(call.tool_calls[0].name, "complete_task");
    }
}
