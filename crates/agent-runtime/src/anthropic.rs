//! Anthropic Messages Provider
//!
//! [`ChatBackend`] for the Anthropic messages API. Two tool formats:
//!
//! - [`ToolFormat::Native`]: `tools` with `tool_use` / `tool_result` content blocks.
//! - [`ToolFormat::Xml`]: the older prompt convention where tool descriptions
//!   live in the system prompt as `<tool_description>` markup and calls come
//!   back as `<function_calls>` blocks inside plain text.
//!
//! The API has no system role in `messages`, and consecutive messages must
//! alternate roles, so mid-history system messages are sent as user turns and
//! adjacent same-role messages are merged.

use std::sync::LazyLock;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role, answer_pending_calls},
    provider::{ChatBackend, ChatRequest, ContextWindow, ToolChoice},
    response::{FinishReason, ResponseEnvelope, ResponseMetadata, TokenUsage},
    tool::{ToolCall, ToolSpec, render_result},
};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value, json};

use crate::schema::parameters_schema;
use crate::transport::{build_client, error_message, optional_env, required_env, send_json};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-opus-20240229";
const CONTEXT_WINDOW: ContextWindow = ContextWindow::new(200_000, 0.05);

/// How tools are exposed to the model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToolFormat {
    #[default]
    Native,
    Xml,
}

/// Anthropic provider configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,

    /// API base, without the `/v1/messages` path
    pub base_url: String,

    pub model: String,

    pub max_tokens: u32,

    pub anthropic_version: String,

    pub temperature: Option<f32>,

    pub tool_format: ToolFormat,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: ANTHROPIC_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: 1024,
            anthropic_version: ANTHROPIC_VERSION.into(),
            temperature: None,
            tool_format: ToolFormat::Native,
            timeout_secs: 120,
        }
    }
}

impl AnthropicConfig {
    /// `ANTHROPIC_API_KEY` (required), `ANTHROPIC_BASE_URL`, `ANTHROPIC_MODEL`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_key: required_env("ANTHROPIC_API_KEY")?,
            base_url: optional_env("ANTHROPIC_BASE_URL").unwrap_or(defaults.base_url),
            model: optional_env("ANTHROPIC_MODEL").unwrap_or(defaults.model),
            ..defaults
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub const fn with_tool_format(mut self, format: ToolFormat) -> Self {
        self.tool_format = format;
        self
    }
}

/// Anthropic backend
pub struct AnthropicBackend {
    client: Client,
    url: String,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::Config("Anthropic api_key is not set".into()));
        }
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            config,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(AnthropicConfig::from_env()?)
    }

    pub const fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    /// Full request body for a prepared request
    pub fn build_body(&self, request: &ChatRequest<'_>) -> Result<Value> {
        let messages = match self.config.tool_format {
            ToolFormat::Native => native_messages(request.messages)?,
            ToolFormat::Xml => xml_messages(request.messages),
        };

        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        });
        if !request.system.is_empty() {
            body["system"] = json!(request.system);
        }
        if let Some(temperature) = self.config.temperature {
            body["temperature"] = json!(temperature);
        }

        let offer_tools = self.config.tool_format == ToolFormat::Native
            && !request.functions.is_empty()
            && *request.tool_choice != ToolChoice::None;
        if offer_tools {
            body["tools"] = json!(request.functions);
            body["tool_choice"] = match request.tool_choice {
                ToolChoice::Required => json!({ "type": "any" }),
                ToolChoice::Function(name) => json!({ "type": "tool", "name": name }),
                ToolChoice::Auto | ToolChoice::None => json!({ "type": "auto" }),
            };
        }
        Ok(body)
    }
}

// ============================================================================
// Native tool blocks
// ============================================================================

fn text_block(text: &str) -> Option<Value> {
    (!text.trim().is_empty()).then(|| json!({ "type": "text", "text": text }))
}

fn native_blocks(msg: &Message) -> Result<(&'static str, Vec<Value>)> {
    let turn = match msg.role {
        Role::System | Role::User => ("user", text_block(&msg.content).into_iter().collect()),
        Role::Assistant => ("assistant", text_block(&msg.content).into_iter().collect()),
        Role::ToolCall => {
            let mut blocks: Vec<Value> = text_block(&msg.content).into_iter().collect();
            for call in &msg.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments_object()?,
                }));
            }
            ("assistant", blocks)
        }
        Role::ToolResult => {
            let block = match &msg.tool_call_id {
                Some(id) => Some(json!({ "type": "tool_result", "tool_use_id": id, "content": msg.content })),
                None => text_block(&function_result_text(msg)),
            };
            ("user", block.into_iter().collect())
        }
    };
    Ok(turn)
}

fn is_tool_result(block: &Value) -> bool {
    block.get("type").and_then(Value::as_str) == Some("tool_result")
}

/// Merged user/assistant turns, starting with a user turn
fn native_messages(messages: &[Message]) -> Result<Vec<Value>> {
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for msg in answer_pending_calls(messages.to_vec()) {
        let (role, blocks) = native_blocks(&msg)?;
        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    // A truncated history may open with the assistant, or with results
    // whose tool_use blocks were cut off.
    loop {
        match turns.first_mut() {
            Some((role, _)) if *role == "assistant" => {
                turns.remove(0);
            }
            Some((_, blocks)) if blocks.iter().any(is_tool_result) => {
                blocks.retain(|b| !is_tool_result(b));
                if blocks.is_empty() {
                    turns.remove(0);
                }
            }
            _ => break,
        }
    }

    Ok(turns
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect())
}

// ============================================================================
// XML tool markup
// ============================================================================

const XML_TOOL_INSTRUCTIONS: &str = "

In this environment you have access to a set of tools you can use to answer the user's question.

You may call them like this:
<function_calls>
<invoke>
<tool_name>$TOOL_NAME</tool_name>
<parameters>
<$PARAMETER_NAME>$PARAMETER_VALUE</$PARAMETER_NAME>
...
</parameters>
</invoke>
</function_calls>

You must wait for the user to respond with the function_results.
";

static FUNCTION_CALLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<function_calls>(.*?)</function_calls>").expect("valid regex"));
static INVOKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<invoke>(.*?)</invoke>").expect("valid regex"));
static TOOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<tool_name>\s*(.*?)\s*</tool_name>").expect("valid regex"));
static PARAMETERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<parameters>(.*?)</parameters>").expect("valid regex"));
static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_\-]*)>").expect("valid regex"));

/// `<tool_description>` markup for one tool
pub fn xml_tool_description(spec: &ToolSpec) -> String {
    let parameters: Vec<String> = spec
        .parameters
        .iter()
        .map(|p| {
            format!(
                "<parameter><name>{}</name><type>{}</type><description>{}</description></parameter>",
                p.name, p.param_type, p.description
            )
        })
        .collect();
    format!(
        "<tool_description>\n<tool_name>{}</tool_name>\n<description>{}</description>\n<parameters>\n{}\n</parameters>\n</tool_description>",
        spec.name,
        spec.description,
        parameters.join("\n")
    )
}

/// Render tool calls back into `<function_calls>` markup
pub fn format_function_calls(calls: &[ToolCall]) -> String {
    let mut out = String::from("<function_calls>");
    for call in calls {
        out.push_str("<invoke><tool_name>");
        out.push_str(&call.name);
        out.push_str("</tool_name><parameters>");
        if let Ok(args) = call.arguments_object() {
            for (key, value) in &args {
                out.push_str(&format!("<{key}>{}</{key}>", render_result(value)));
            }
        }
        out.push_str("</parameters></invoke>");
    }
    out.push_str("</function_calls>");
    out
}

/// Extract tool calls from `<function_calls>` blocks and return the remaining text
pub fn parse_function_calls(text: &str) -> (String, Vec<ToolCall>) {
    let mut calls = Vec::new();
    for block in FUNCTION_CALLS.captures_iter(text) {
        let block = block[1].replace("<\\/", "</");
        for invoke in INVOKE.captures_iter(&block) {
            let body = &invoke[1];
            let Some(name) = TOOL_NAME.captures(body).map(|c| c[1].to_string()) else {
                continue;
            };
            let arguments = PARAMETERS
                .captures(body)
                .map(|c| parse_parameters(&c[1]))
                .unwrap_or_default();
            calls.push(ToolCall::new(name, Value::Object(arguments)));
        }
    }
    let remaining = FUNCTION_CALLS.replace_all(text, "").trim().to_string();
    (remaining, calls)
}

/// `<name>value</name>` pairs; every value arrives as text
fn parse_parameters(xml: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let mut rest = xml;
    while let Some(open) = OPEN_TAG.captures(rest) {
        let (Some(whole), Some(name)) = (open.get(0), open.get(1)) else {
            break;
        };
        let name = name.as_str();
        let after = &rest[whole.end()..];
        let close = format!("</{name}>");
        let Some(end) = after.find(&close) else {
            break;
        };
        params.insert(name.to_string(), Value::String(after[..end].trim().to_string()));
        rest = &after[end + close.len()..];
    }
    params
}

fn function_result_text(msg: &Message) -> String {
    format!(
        "<function_results>\n<result>\n<tool_name>{}</tool_name>\n<stdout>\n{}\n</stdout>\n</result>\n</function_results>",
        msg.name.as_deref().unwrap_or_default(),
        msg.content
    )
}

fn xml_turn(msg: &Message) -> (&'static str, String) {
    match msg.role {
        Role::System | Role::User => ("user", msg.content.clone()),
        Role::Assistant => ("assistant", msg.content.clone()),
        Role::ToolCall => {
            let markup = format_function_calls(&msg.tool_calls);
            let text = if msg.content.is_empty() {
                markup
            } else {
                format!("{}\n{markup}", msg.content)
            };
            ("assistant", text)
        }
        Role::ToolResult => ("user", function_result_text(msg)),
    }
}

fn xml_messages(messages: &[Message]) -> Vec<Value> {
    let mut turns: Vec<(&'static str, String)> = Vec::new();
    for (role, text) in messages.iter().map(xml_turn) {
        if text.trim().is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some((last_role, last_text)) if *last_role == role => {
                last_text.push('\n');
                last_text.push_str(&text);
            }
            _ => turns.push((role, text)),
        }
    }

    let leading = turns.iter().take_while(|(role, _)| *role == "assistant").count();
    turns.drain(..leading);

    turns
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse a messages API reply into an envelope
pub fn parse_response(body: &Value, format: ToolFormat) -> Result<ResponseEnvelope> {
    if let Some(error) = body.get("error") {
        return Ok(ResponseEnvelope::error(error_message(error)));
    }

    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::Protocol(format!("messages response has no content: {body}")))?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default()),
            Some("tool_use") => {
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AgentError::Protocol("tool_use block without a name".into()))?;
                let mut call = ToolCall::new(name, block.get("input").cloned().unwrap_or(Value::Null));
                if let Some(id) = block.get("id").and_then(Value::as_str) {
                    call = call.with_id(id);
                }
                calls.push(call);
            }
            Some(other) => tracing::debug!(block = other, "Ignoring content block"),
            None => return Err(AgentError::Protocol("content block without a type".into())),
        }
    }

    if format == ToolFormat::Xml {
        let (remaining, parsed) = parse_function_calls(&text);
        if !parsed.is_empty() {
            text = remaining;
            calls.extend(parsed);
        }
    }

    let usage = body.get("usage").map(|u| {
        let count = |key: &str| {
            u.get(key)
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or_default()
        };
        TokenUsage::new(count("input_tokens"), count("output_tokens"))
    });
    let metadata = ResponseMetadata {
        id: body.get("id").and_then(Value::as_str).map(str::to_string),
        model: body.get("model").and_then(Value::as_str).map(str::to_string),
        usage,
        finish_reason: body
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(FinishReason::from_provider),
        ..ResponseMetadata::default()
    };

    let envelope = if calls.is_empty() {
        ResponseEnvelope::text(text)
    } else {
        ResponseEnvelope::tool_calls(Some(text), calls)
    };
    Ok(envelope.with_metadata(metadata))
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn convert_function(&self, spec: &ToolSpec) -> Value {
        match self.config.tool_format {
            ToolFormat::Native => json!({
                "name": spec.name,
                "description": spec.description,
                "input_schema": parameters_schema(spec),
            }),
            ToolFormat::Xml => Value::String(xml_tool_description(spec)),
        }
    }

    fn system_preamble(&self, pre_prompt: &str, functions: &[Value]) -> String {
        if self.config.tool_format == ToolFormat::Native || functions.is_empty() {
            return pre_prompt.to_string();
        }
        let tools: String = functions.iter().filter_map(Value::as_str).collect();
        format!("{pre_prompt}{XML_TOOL_INSTRUCTIONS}Here are the tools available: <tools>{tools}</tools>")
    }

    fn context_window(&self) -> ContextWindow {
        CONTEXT_WINDOW
    }

    fn supports_forced_tool_choice(&self) -> bool {
        self.config.tool_format == ToolFormat::Native
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ResponseEnvelope> {
        let body = self.build_body(request)?;

        let http = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.anthropic_version)
            .json(&body);

        let reply = send_json("anthropic", http).await?;
        let envelope = parse_response(&reply, self.config.tool_format)?;
        tracing::debug!(
            model = %self.config.model,
            tool_calls = envelope.tool_calls.len(),
            "Anthropic message received"
        );
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::message::Conversation;
    use agent_core::tool::ParamType;
    use agent_core::ChatSession;

    fn backend(format: ToolFormat) -> AnthropicBackend {
        AnthropicBackend::new(AnthropicConfig {
            api_key: "test-key".into(),
            tool_format: format,
            ..AnthropicConfig::default()
        })
        .unwrap()
    }

    fn add_spec() -> ToolSpec {
        ToolSpec::new("add", "add two numbers together")
            .param("a", ParamType::Number, "", true)
            .param("b", ParamType::Number, "", true)
    }

    #[test]
    fn test_native_merges_same_role_turns() {
        let messages = vec![
            Message::user("hi"),
            Message::system("be brief"),
            Message::tool_call("adding", vec![ToolCall::new("add", json!("{\"a\":2,\"b\":3}")).with_id("tu_1")]),
            Message::tool_result("add", "5", Some("tu_1".into())),
            Message::user("thanks"),
        ];
        let turns = native_messages(&messages).unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0]["content"].as_array().unwrap().len(), 2);
        assert_eq!(turns[1]["content"][1]["input"], json!({"a": 2, "b": 3}));
        assert_eq!(turns[2]["content"][0]["type"], "tool_result");
        assert_eq!(turns[2]["content"][1]["text"], "thanks");
    }

    #[test]
    fn test_truncated_history_starts_with_user() {
        let history = Conversation::from_messages(vec![
            Message::user("x".repeat(600)),
            Message::assistant("a1"),
            Message::user("q2"),
            Message::assistant("a2"),
        ]);
        let session = ChatSession::new(backend(ToolFormat::Native), "")
            .with_history(history)
            .with_max_context_tokens(60);
        let pending = Message::user("q3");
        let (system, messages) = session.prepared_context(Some(&pending));
        assert_eq!(messages[0].role, Role::Assistant);

        for format in [ToolFormat::Native, ToolFormat::Xml] {
            let body = backend(format)
                .build_body(&ChatRequest {
                    system: &system,
                    messages: &messages,
                    functions: &[],
                    tool_choice: &ToolChoice::Auto,
                })
                .unwrap();
            let wire = body["messages"].as_array().unwrap();
            assert_eq!(wire.len(), 3);
            assert_eq!(wire[0]["role"], "user");
            assert_eq!(wire[2]["role"], "user");
        }
    }

    #[test]
    fn test_native_drops_results_of_truncated_calls() {
        let messages = vec![
            Message::tool_call("", vec![ToolCall::new("add", json!({"a": 1, "b": 1})).with_id("tu_1")]),
            Message::tool_result("add", "2", Some("tu_1".into())),
            Message::user("next"),
        ];
        let turns = native_messages(&messages).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[0]["content"], json!([{"type": "text", "text": "next"}]));
    }

    #[test]
    fn test_native_tool_choice() {
        let backend = backend(ToolFormat::Native);
        let functions = vec![backend.convert_function(&add_spec())];
        let messages = vec![Message::user("2+3")];
        let body = backend
            .build_body(&ChatRequest {
                system: "Be brief.",
                messages: &messages,
                functions: &functions,
                tool_choice: &ToolChoice::Function("add".into()),
            })
            .unwrap();
        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["tools"][0]["input_schema"]["required"], json!(["a", "b"]));
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "add"}));
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn test_xml_preamble_and_descriptor() {
        let backend = backend(ToolFormat::Xml);
        let descriptor = backend.convert_function(&add_spec());
        assert!(descriptor.as_str().unwrap().contains("<tool_name>add</tool_name>"));
        assert_eq!(descriptor, backend.convert_function(&add_spec()));

        let preamble = backend.system_preamble("Be helpful.", &[descriptor]);
        assert!(preamble.starts_with("Be helpful."));
        assert!(preamble.contains("<tools><tool_description>"));
        assert_eq!(backend.system_preamble("Be helpful.", &[]), "Be helpful.");
        assert!(!backend.supports_forced_tool_choice());
    }

    #[test]
    fn test_parse_function_calls_markup() {
        let text = "Let me add those.\n<function_calls>\n<invoke>\n<tool_name>add</tool_name>\n<parameters>\n<a>2</a>\n<b>3</b>\n</parameters>\n</invoke>\n</function_calls>";
        let (remaining, calls) = parse_function_calls(text);
        assert_eq!(remaining, "Let me add those.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].arguments, json!({"a": "2", "b": "3"}));
    }

    #[test]
    fn test_xml_round_trip_of_recorded_call() {
        let call = ToolCall::new("add", json!({"a": 2, "b": 3}));
        let (_, parsed) = parse_function_calls(&format_function_calls(&[call]));
        assert_eq!(parsed[0].arguments, json!({"a": "2", "b": "3"}));
    }

    #[test]
    fn test_xml_messages_render_results() {
        let messages = vec![
            Message::user("2+3"),
            Message::tool_call("", vec![ToolCall::new("add", json!({"a": 2, "b": 3}))]),
            Message::tool_result("add", "5", None),
            Message::system("keep going"),
        ];
        let turns = xml_messages(&messages);
        assert_eq!(turns.len(), 3);
        assert!(turns[1]["content"].as_str().unwrap().starts_with("<function_calls>"));
        let last = turns[2]["content"].as_str().unwrap();
        assert!(last.contains("<stdout>\n5\n</stdout>"));
        assert!(last.ends_with("keep going"));
    }

    #[test]
    fn test_parse_response_shapes() {
        let envelope = parse_response(
            &json!({
                "id": "msg_1",
                "model": "claude-3-opus-20240229",
                "content": [
                    {"type": "text", "text": "Adding."},
                    {"type": "tool_use", "id": "tu_1", "name": "add", "input": {"a": 2, "b": 3}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            }),
            ToolFormat::Native,
        )
        .unwrap();
        assert_eq!(envelope.text.as_deref(), Some("Adding."));
        assert_eq!(envelope.tool_calls[0].id.as_deref(), Some("tu_1"));
        assert_eq!(envelope.metadata.usage.unwrap().total_tokens, 15);

        let envelope = parse_response(
            &json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            ToolFormat::Native,
        )
        .unwrap();
        assert_eq!(envelope.error.as_deref(), Some("Overloaded"));

        let err = parse_response(&json!({"id": "x"}), ToolFormat::Native).unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }
}
