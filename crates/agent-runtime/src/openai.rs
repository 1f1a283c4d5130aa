//! OpenAI Chat Completions Provider
//!
//! [`ChatBackend`] for the OpenAI chat-completions API and for Azure OpenAI
//! deployments, which speak the same wire format behind a different URL and
//! auth header. Tools go out either as the `tools` array (default) or as the
//! legacy `functions` array.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role, answer_pending_calls},
    provider::{ChatBackend, ChatRequest, ContextWindow, ToolChoice},
    response::{FinishReason, ResponseEnvelope, ResponseMetadata, TokenUsage},
    tool::{ToolCall, ToolSpec},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::schema::{arguments_string, function_descriptor};
use crate::transport::{build_client, error_message, optional_env, required_env, send_json};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";
const CONTEXT_BUFFER: f64 = 0.05;

/// How tools are declared on the wire
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApiStyle {
    /// `tools` / `tool_calls` / `tool` role
    #[default]
    Tools,
    /// `functions` / `function_call` / `function` role
    LegacyFunctions,
}

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,

    /// API base, without the `/chat/completions` suffix
    pub base_url: String,

    pub model: String,

    /// Sent as the `OpenAI-Organization` header
    pub organization: Option<String>,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    pub api_style: ApiStyle,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: OPENAI_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            organization: None,
            temperature: None,
            max_tokens: None,
            api_style: ApiStyle::Tools,
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    /// `OPENAI_API_KEY` (required), `OPENAI_BASE_URL`, `OPENAI_MODEL`,
    /// `OPENAI_ORGANIZATION`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_key: required_env("OPENAI_API_KEY")?,
            base_url: optional_env("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: optional_env("OPENAI_MODEL").unwrap_or(defaults.model),
            organization: optional_env("OPENAI_ORGANIZATION"),
            ..defaults
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Azure OpenAI configuration.
///
/// Values are optional so a missing one can be reported by name.
#[derive(Clone, Debug)]
pub struct AzureOpenAiConfig {
    pub api_key: Option<String>,

    /// Custom subdomain (`<domain>.openai.azure.com`) or a full base URL
    pub domain: Option<String>,

    pub deployment: Option<String>,

    pub api_version: Option<String>,

    /// Used for the context window guess; the deployment picks the model
    pub model: String,

    pub api_style: ApiStyle,

    pub timeout_secs: u64,
}

impl Default for AzureOpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            domain: None,
            deployment: None,
            api_version: Some(DEFAULT_AZURE_API_VERSION.into()),
            model: DEFAULT_MODEL.into(),
            api_style: ApiStyle::Tools,
            timeout_secs: 120,
        }
    }
}

impl AzureOpenAiConfig {
    /// `AZURE_OPENAI_KEY`, `AZURE_OPENAI_DOMAIN`, `AZURE_OPENAI_DEPLOYMENT`,
    /// `AZURE_OPENAI_API_VERSION`, `AZURE_OPENAI_MODEL`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: optional_env("AZURE_OPENAI_KEY"),
            domain: optional_env("AZURE_OPENAI_DOMAIN"),
            deployment: optional_env("AZURE_OPENAI_DEPLOYMENT"),
            api_version: optional_env("AZURE_OPENAI_API_VERSION").or(defaults.api_version),
            model: optional_env("AZURE_OPENAI_MODEL").unwrap_or(defaults.model),
            ..defaults
        }
    }

    fn require<'a>(value: Option<&'a String>, name: &str) -> Result<&'a str> {
        value
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                AgentError::Config(format!("The Azure OpenAI configuration value for {name} is not set."))
            })
    }
}

#[derive(Clone, Debug)]
enum Auth {
    Bearer(String),
    ApiKey(String),
}

/// OpenAI / Azure OpenAI backend
pub struct OpenAiBackend {
    client: Client,
    url: String,
    query: Vec<(String, String)>,
    auth: Auth,
    organization: Option<String>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    api_style: ApiStyle,
    name: &'static str,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::Config("OpenAI api_key is not set".into()));
        }
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            query: Vec::new(),
            auth: Auth::Bearer(config.api_key),
            organization: config.organization,
            model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_style: config.api_style,
            name: "openai",
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env()?)
    }

    pub fn azure(config: AzureOpenAiConfig) -> Result<Self> {
        let domain = AzureOpenAiConfig::require(config.domain.as_ref(), "custom_domain")?;
        let deployment = AzureOpenAiConfig::require(config.deployment.as_ref(), "deployment")?;
        let api_key = AzureOpenAiConfig::require(config.api_key.as_ref(), "api_key")?;
        let api_version = AzureOpenAiConfig::require(config.api_version.as_ref(), "api_version")?;

        let base = if domain.contains("://") {
            domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{domain}.openai.azure.com")
        };

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!("{base}/openai/deployments/{deployment}/chat/completions"),
            query: vec![("api-version".into(), api_version.to_string())],
            auth: Auth::ApiKey(api_key.to_string()),
            organization: None,
            model: config.model,
            temperature: None,
            max_tokens: None,
            api_style: config.api_style,
            name: "azure-openai",
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Full request body for a prepared request
    pub fn build_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }

        let mut body = json!({ "model": self.model });

        match self.api_style {
            ApiStyle::Tools => {
                let history = answer_pending_calls(request.messages.to_vec());
                messages.extend(history.iter().map(tools_message));
                if !request.functions.is_empty() {
                    let tools: Vec<Value> = request
                        .functions
                        .iter()
                        .map(|f| json!({ "type": "function", "function": f }))
                        .collect();
                    body["tools"] = json!(tools);
                    body["tool_choice"] = tool_choice(request.tool_choice);
                }
            }
            ApiStyle::LegacyFunctions => {
                messages.extend(request.messages.iter().flat_map(legacy_messages));
                if !request.functions.is_empty() {
                    body["functions"] = json!(request.functions);
                    body["function_call"] = legacy_function_call(request.tool_choice);
                }
            }
        }

        body["messages"] = json!(messages);
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

/// Context window guess by model family
pub fn context_window_for(model: &str) -> ContextWindow {
    let tokens = if model.starts_with("gpt-4o")
        || model.starts_with("gpt-4-turbo")
        || model.starts_with("gpt-4-1106")
        || model.starts_with("gpt-4-0125")
        || model.starts_with("o1")
        || model.starts_with("o3")
    {
        128_000
    } else if model.starts_with("gpt-4-32k") {
        32_768
    } else if model.starts_with("gpt-4") {
        8_192
    } else if model.starts_with("gpt-3.5-turbo") {
        16_385
    } else {
        8_192
    };
    ContextWindow::new(tokens, CONTEXT_BUFFER)
}

fn tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function(name) => json!({ "type": "function", "function": { "name": name } }),
    }
}

fn legacy_function_call(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::None => json!("none"),
        ToolChoice::Function(name) => json!({ "name": name }),
        ToolChoice::Auto | ToolChoice::Required => json!("auto"),
    }
}

fn text_message(role: &str, content: &str) -> Value {
    json!({ "role": role, "content": content })
}

fn tools_message(msg: &Message) -> Value {
    match msg.role {
        Role::System => text_message("system", &msg.content),
        Role::User => text_message("user", &msg.content),
        Role::Assistant => text_message("assistant", &msg.content),
        Role::ToolCall => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": arguments_string(&c.arguments) },
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                json!(msg.content)
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        Role::ToolResult => match &msg.tool_call_id {
            Some(id) => json!({ "role": "tool", "tool_call_id": id, "content": msg.content }),
            None => text_message(
                "user",
                &format!(
                    "Result of {}: {}",
                    msg.name.as_deref().unwrap_or("function"),
                    msg.content
                ),
            ),
        },
    }
}

fn legacy_messages(msg: &Message) -> Vec<Value> {
    match msg.role {
        Role::ToolCall => msg
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "function_call": { "name": c.name, "arguments": arguments_string(&c.arguments) },
                })
            })
            .collect(),
        Role::ToolResult => vec![json!({
            "role": "function",
            "name": msg.name.as_deref().unwrap_or_default(),
            "content": msg.content,
        })],
        _ => vec![tools_message(msg)],
    }
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
    function_call: Option<WireFunction>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Parse a chat-completions reply into an envelope
pub fn parse_response(body: Value) -> Result<ResponseEnvelope> {
    if let Some(error) = body.get("error") {
        return Ok(ResponseEnvelope::error(error_message(error)));
    }

    let response: CompletionResponse = serde_json::from_value(body)
        .map_err(|e| AgentError::Protocol(format!("unexpected chat completion shape: {e}")))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Protocol("chat completion has no choices".into()))?;

    let metadata = ResponseMetadata {
        id: response.id,
        model: response.model,
        usage: response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
        finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_provider),
        ..ResponseMetadata::default()
    };

    let message = choice.message;
    let mut calls: Vec<ToolCall> = message
        .tool_calls
        .into_iter()
        .map(|c| {
            let call = ToolCall::new(c.function.name, c.function.arguments);
            match c.id {
                Some(id) => call.with_id(id),
                None => call,
            }
        })
        .collect();
    if let Some(function) = message.function_call.filter(|f| !f.name.is_empty()) {
        calls.push(ToolCall::new(function.name, function.arguments));
    }

    let envelope = if calls.is_empty() {
        ResponseEnvelope {
            text: message.content,
            ..ResponseEnvelope::default()
        }
    } else {
        ResponseEnvelope::tool_calls(message.content, calls)
    };
    Ok(envelope.with_metadata(metadata))
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn convert_function(&self, spec: &ToolSpec) -> Value {
        function_descriptor(spec)
    }

    fn context_window(&self) -> ContextWindow {
        context_window_for(&self.model)
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ResponseEnvelope> {
        let body = self.build_body(request);

        let mut http = self.client.post(&self.url).json(&body);
        if !self.query.is_empty() {
            http = http.query(&self.query);
        }
        http = match &self.auth {
            Auth::Bearer(key) => http.bearer_auth(key),
            Auth::ApiKey(key) => http.header("api-key", key),
        };
        if let Some(organization) = &self.organization {
            http = http.header("OpenAI-Organization", organization);
        }

        let reply = send_json(self.name, http).await?;
        let envelope = parse_response(reply)?;
        tracing::debug!(
            provider = self.name,
            tool_calls = envelope.tool_calls.len(),
            "Chat completion received"
        );
        Ok(envelope)
    }
}
