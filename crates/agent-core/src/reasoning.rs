//! Reasoning Loop
//!
//! One agent loop parameterized by an [`AgentPolicy`]. The loop sends the
//! user's turn to a [`ChatModel`], dispatches any tool calls in the response
//! against the [`ToolRegistry`], feeds the results back and repeats until the
//! model produces an answer the policy accepts or the call ceiling is hit.
//!
//! | Kind             | Behavior                                               |
//! |------------------|--------------------------------------------------------|
//! | conversational   | returns the first text answer                          |
//! | functions        | re-asks until at least one tool was called             |
//! | functions-only   | every response must be a tool call; `complete_task` ends the turn |
//! | react            | Thought → Action → Observe cycle until `finish`        |

use serde_json::Value;

use crate::chat::ChatModel;
use crate::error::{AgentError, Result};
use crate::response::{ResponseEnvelope, ResponseMetadata};
use crate::tool::{
    HostMethod, HostParameter, Tool, ToolArguments, ToolCall, ToolRegistry, ToolSpec, render_result,
};

const DEFAULT_PRE_PROMPT: &str = "You are a helpful generalist assistant.";

/// Ends a tools-only turn
pub const COMPLETE_TASK: &str = "complete_task";
/// Thought phase tool
pub const RECORD_THOUGHT: &str = "record_thought";
/// Observe phase tool
pub const RECORD_OBSERVATION: &str = "record_observation";
/// Ends a react cycle
pub const FINISH: &str = "finish";

// ============================================================================
// Configuration
// ============================================================================

/// Orthogonal turn policy flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AgentPolicy {
    /// A turn must include at least one tool round-trip before it may return
    pub require_tool_before_return: bool,

    /// Every model response must be a tool call
    pub require_tool_every_turn: bool,

    /// Record the last tool result and return instead of sending it back
    pub return_on_function_call: bool,

    /// Drive the Thought/Action/Observe cycle with per-phase tool sets
    pub phase_restricted_tools: bool,
}

impl AgentPolicy {
    pub const fn conversational() -> Self {
        Self {
            require_tool_before_return: false,
            require_tool_every_turn: false,
            return_on_function_call: false,
            phase_restricted_tools: false,
        }
    }

    pub const fn functions() -> Self {
        Self {
            require_tool_before_return: true,
            ..Self::conversational()
        }
    }

    pub const fn functions_only() -> Self {
        Self {
            require_tool_before_return: true,
            require_tool_every_turn: true,
            ..Self::conversational()
        }
    }

    pub const fn react() -> Self {
        Self {
            require_tool_before_return: true,
            require_tool_every_turn: true,
            return_on_function_call: true,
            phase_restricted_tools: true,
        }
    }
}

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System pre-prompt handed to the chat model
    pub pre_prompt: String,

    /// Maximum tool round-trips without user input
    pub max_function_calls: usize,

    pub policy: AgentPolicy,

    /// Corrective instruction sent when a response breaks the policy
    pub function_required_message: String,

    /// On hitting the call ceiling, ask once more with a pause instruction
    pub recover_from_call_limit: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::conversational()
    }
}

impl AgentConfig {
    pub fn conversational() -> Self {
        Self {
            pre_prompt: DEFAULT_PRE_PROMPT.into(),
            max_function_calls: 10,
            policy: AgentPolicy::conversational(),
            function_required_message: String::new(),
            recover_from_call_limit: true,
        }
    }

    pub fn functions() -> Self {
        Self {
            policy: AgentPolicy::functions(),
            function_required_message: "You must call a function before you can return.".into(),
            ..Self::conversational()
        }
    }

    pub fn functions_only() -> Self {
        Self {
            policy: AgentPolicy::functions_only(),
            function_required_message: format!(
                "If you have answered the question, call '{COMPLETE_TASK}' to return to the user. Otherwise, call a function."
            ),
            ..Self::conversational()
        }
    }

    pub fn react() -> Self {
        Self {
            max_function_calls: 20,
            policy: AgentPolicy::react(),
            function_required_message: "You must call one of the provided functions.".into(),
            recover_from_call_limit: false,
            ..Self::conversational()
        }
    }

    #[must_use]
    pub fn with_pre_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.pre_prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn with_max_function_calls(mut self, max: usize) -> Self {
        self.max_function_calls = max;
        self
    }

    #[must_use]
    pub const fn with_limit_recovery(mut self, recover: bool) -> Self {
        self.recover_from_call_limit = recover;
        self
    }
}

/// Phase of the react cycle; other policies stay in `Input`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AgentState {
    #[default]
    Input,
    Thought,
    Action,
    Observe,
    Complete,
}

/// Extension points, all no-op by default
pub trait AgentHooks: Send + Sync {
    /// Called after a tool ran without error
    fn on_successful_call(&self, _name: &str, _args: &ToolArguments, _result: &Value) {}

    /// Called for every envelope the loop processes
    fn on_model_response(&self, _envelope: &ResponseEnvelope) {}
}

struct NoHooks;

impl AgentHooks for NoHooks {}

// ============================================================================
// Control tools
// ============================================================================

struct ControlTools {
    complete_task: ToolSpec,
    record_thought: ToolSpec,
    record_observation: ToolSpec,
    finish: ToolSpec,
}

impl ControlTools {
    fn resolve() -> Result<Self> {
        let complete_task = HostMethod::exposed(
            COMPLETE_TASK,
            "Call this when you are done with all tasks and want to return to the user",
        );
        let record_thought = HostMethod::exposed(RECORD_THOUGHT, "Record a thought based on the last message")
            .param(HostParameter::new("thought", "string", "Your reasoning about what to do next"));
        let record_observation =
            HostMethod::exposed(RECORD_OBSERVATION, "Record an observation based on the last message")
                .param(HostParameter::new("observation", "string", "What the last result tells you"));
        let finish = HostMethod::exposed(
            FINISH,
            "Call this once all tasks have been completed to give a final answer",
        )
        .param(HostParameter::new("answer", "string", "The final answer for the user").optional());

        Ok(Self {
            complete_task: complete_task.to_spec()?,
            record_thought: record_thought.to_spec()?,
            record_observation: record_observation.to_spec()?,
            finish: finish.to_spec()?,
        })
    }
}

// ============================================================================
// Agent
// ============================================================================

/// The main Agent struct
pub struct Agent {
    model: Box<dyn ChatModel>,
    tools: ToolRegistry,
    config: AgentConfig,
    hooks: Box<dyn AgentHooks>,
    control: ControlTools,
    state: AgentState,
    function_call_depth: usize,
    last_response_metadata: Option<ResponseMetadata>,
    completed: bool,
    finish_answer: Option<String>,
}

impl Agent {
    /// Create a new agent; the model receives the pre-prompt and tool set
    pub fn new<M: ChatModel + 'static>(model: M, tools: ToolRegistry, config: AgentConfig) -> Result<Self> {
        Self::from_boxed(Box::new(model), tools, config)
    }

    fn from_boxed(model: Box<dyn ChatModel>, tools: ToolRegistry, config: AgentConfig) -> Result<Self> {
        let mut agent = Self {
            model,
            tools,
            config,
            hooks: Box::new(NoHooks),
            control: ControlTools::resolve()?,
            state: AgentState::Input,
            function_call_depth: 0,
            last_response_metadata: None,
            completed: false,
            finish_answer: None,
        };
        agent.model.set_pre_prompt(&agent.config.pre_prompt);
        agent.sync_functions();
        Ok(agent)
    }

    #[must_use]
    pub fn with_hooks<H: AgentHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Run one user turn
    pub async fn ask(&mut self, message: &str) -> Result<String> {
        if self.config.policy.phase_restricted_tools {
            return self.ask_react(message).await;
        }

        self.begin_turn();

        let mut message = message.to_string();
        let mut recovered = false;

        loop {
            let start = self.function_call_depth;
            let outcome = match self.model.send_user_message(&message).await {
                Ok(envelope) => self.process_response(envelope).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(text) => {
                    let called = self.config.policy.require_tool_every_turn
                        || self.function_call_depth - start > 1;
                    if self.config.policy.require_tool_before_return && !called {
                        tracing::debug!("Turn returned without a function call, asking again");
                        message.clone_from(&self.config.function_required_message);
                        continue;
                    }
                    return Ok(text);
                }
                Err(AgentError::TooManyToolCalls(max))
                    if self.config.recover_from_call_limit && !recovered =>
                {
                    tracing::warn!(max, "Function call limit reached, asking the model to check in with the user");
                    recovered = true;
                    self.function_call_depth = 0;
                    message = format!(
                        "You have run {max} function calls without user input. You must ask the user if they would like you to proceed with calls before you can continue."
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Force a call to `name`, optionally recording a user message first
    pub async fn ask_function(&mut self, name: &str, message: Option<&str>) -> Result<String> {
        self.begin_turn();
        if let Some(message) = message {
            self.record(message);
        }
        let envelope = self.model.send_function_call(name).await?;
        self.process_response(envelope).await
    }

    /// Let the model continue on the current history
    pub async fn generate(&mut self) -> Result<String> {
        self.begin_turn();
        let envelope = self.model.generate().await?;
        self.process_response(envelope).await
    }

    pub fn record(&mut self, message: &str) {
        self.model.record_user_message(message);
    }

    pub fn record_assistant(&mut self, message: &str) {
        self.model.record_assistant_message(message);
    }

    pub fn record_system(&mut self, message: &str) {
        self.model.record_system_message(message);
    }

    pub fn record_function(&mut self, name: &str, result: &str) {
        self.model.record_function_result(name, result, None);
    }

    pub fn record_assistant_function(&mut self, name: &str, arguments: Value) {
        self.model.record_assistant_function(name, arguments, None);
    }

    /// Whether the last turn made at least one tool round-trip
    pub const fn did_ask_call_function(&self) -> bool {
        self.config.policy.require_tool_every_turn || self.function_call_depth > 1
    }

    pub const fn function_call_depth(&self) -> usize {
        self.function_call_depth
    }

    pub const fn last_response_metadata(&self) -> Option<&ResponseMetadata> {
        self.last_response_metadata.as_ref()
    }

    pub const fn state(&self) -> AgentState {
        self.state
    }

    /// Return a react agent to `Input` so it accepts new turns
    pub fn reset(&mut self) {
        self.enter(AgentState::Input);
    }

    pub fn model(&self) -> &dyn ChatModel {
        self.model.as_ref()
    }

    pub const fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    // ========================================================================
    // Loop internals
    // ========================================================================

    async fn ask_react(&mut self, message: &str) -> Result<String> {
        if self.state == AgentState::Complete {
            return Err(AgentError::InvalidState(
                "the agent has completed and must be reset before it can be asked again".into(),
            ));
        }

        self.begin_turn();
        self.model.record_user_message(message);

        loop {
            match self.state {
                AgentState::Input | AgentState::Observe => {
                    self.enter(AgentState::Thought);
                    let envelope = self.model.send_function_call(RECORD_THOUGHT).await?;
                    self.process_response(envelope).await?;
                }
                AgentState::Thought => {
                    self.enter(AgentState::Action);
                    let envelope = self.model.generate().await?;
                    self.process_response(envelope).await?;
                }
                AgentState::Action => {
                    self.enter(AgentState::Observe);
                    let envelope = self.model.send_function_call(RECORD_OBSERVATION).await?;
                    self.process_response(envelope).await?;
                }
                AgentState::Complete => {
                    return Ok(self.finish_answer.take().unwrap_or_default());
                }
            }
        }
    }

    /// Clear per-turn loop state
    fn begin_turn(&mut self) {
        self.function_call_depth = 0;
        self.completed = false;
        self.finish_answer = None;
    }

    fn enter(&mut self, state: AgentState) {
        tracing::debug!(from = ?self.state, to = ?state, "Agent state transition");
        self.state = state;
        self.sync_functions();
    }

    fn sync_functions(&mut self) {
        let specs = self.active_specs();
        self.model.set_functions(&specs);
    }

    /// Tools legal under the current policy and phase
    fn active_specs(&self) -> Vec<ToolSpec> {
        let policy = self.config.policy;
        if policy.phase_restricted_tools {
            return match self.state {
                AgentState::Input | AgentState::Thought => vec![self.control.record_thought.clone()],
                AgentState::Observe => vec![self.control.record_observation.clone()],
                AgentState::Action => {
                    let mut specs = self.tools.specs();
                    specs.push(self.control.finish.clone());
                    specs
                }
                AgentState::Complete => Vec::new(),
            };
        }

        let mut specs = self.tools.specs();
        if policy.require_tool_every_turn {
            specs.push(self.control.complete_task.clone());
        }
        specs
    }

    fn control_spec(&self, name: &str) -> Option<&ToolSpec> {
        let policy = self.config.policy;
        match name {
            COMPLETE_TASK if policy.require_tool_every_turn && !policy.phase_restricted_tools => {
                Some(&self.control.complete_task)
            }
            RECORD_THOUGHT if policy.phase_restricted_tools => Some(&self.control.record_thought),
            RECORD_OBSERVATION if policy.phase_restricted_tools => Some(&self.control.record_observation),
            FINISH if policy.phase_restricted_tools => Some(&self.control.finish),
            _ => None,
        }
    }

    /// Process envelopes until the policy lets the turn return
    async fn process_response(&mut self, mut envelope: ResponseEnvelope) -> Result<String> {
        loop {
            self.hooks.on_model_response(&envelope);
            self.last_response_metadata = Some(envelope.metadata.clone());

            self.function_call_depth += 1;
            if self.function_call_depth > self.config.max_function_calls {
                return Err(AgentError::TooManyToolCalls(self.config.max_function_calls));
            }

            if let Some(error) = envelope.error.take() {
                return Err(AgentError::ModelError(error));
            }

            if envelope.tool_calls.is_empty() {
                if !self.config.policy.require_tool_every_turn {
                    return Ok(envelope.text.unwrap_or_default());
                }
                tracing::debug!("Response without a function call, discarding and asking again");
                self.model.retract_last();
                envelope = self
                    .model
                    .send_user_message(&self.config.function_required_message)
                    .await?;
                continue;
            }

            let mut results = Vec::with_capacity(envelope.tool_calls.len());
            for call in &envelope.tool_calls {
                let result = self.dispatch(call).await;
                results.push((call, result));
            }

            let Some((last_call, last_result)) = results.pop() else {
                continue;
            };
            for (call, result) in results {
                self.model.record_function_result(&call.name, &result, call.id.as_deref());
            }

            if self.completed || self.config.policy.return_on_function_call {
                self.model
                    .record_function_result(&last_call.name, &last_result, last_call.id.as_deref());
                let text = if self.completed {
                    envelope.text.clone().unwrap_or_default()
                } else {
                    String::new()
                };
                return Ok(text);
            }

            let next = self
                .model
                .send_function_result(&last_call.name, &last_result, last_call.id.as_deref())
                .await?;
            envelope = next;
        }
    }

    /// Run one tool call and produce the result text the model will see
    async fn dispatch(&mut self, call: &ToolCall) -> String {
        tracing::debug!(tool = %call.name, "Dispatching function call");

        if let Some(spec) = self.control_spec(&call.name) {
            let args = match ToolArguments::decode(&call.arguments, spec) {
                Ok(args) => args,
                Err(e) => return tool_error_text(&call.name, &e),
            };
            match call.name.as_str() {
                COMPLETE_TASK => self.completed = true,
                FINISH => {
                    self.finish_answer = args.get("answer").map(render_result);
                    self.state = AgentState::Complete;
                }
                _ => {}
            }
            self.hooks.on_successful_call(&call.name, &args, &Value::Null);
            return String::new();
        }

        match self.tools.invoke(&call.name, &call.arguments).await {
            Ok((args, value)) => {
                self.hooks.on_successful_call(&call.name, &args, &value);
                render_result(&value)
            }
            Err(AgentError::ToolNotFound(_)) => {
                tracing::warn!(tool = %call.name, "Model called an unknown function");
                format!("Function '{}' does not exist.", call.name)
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Function call failed");
                tool_error_text(&call.name, &e)
            }
        }
    }
}

fn tool_error_text(name: &str, err: &AgentError) -> String {
    let detail = match err {
        AgentError::ToolExecution(msg) | AgentError::ToolValidation(msg) => msg.clone(),
        other => other.to_string(),
    };
    format!("An error occurred while running the function {name}: {detail}")
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Agent`]
pub struct AgentBuilder {
    model: Option<Box<dyn ChatModel>>,
    tools: ToolRegistry,
    config: AgentConfig,
    hooks: Option<Box<dyn AgentHooks>>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            model: None,
            tools: ToolRegistry::new(),
            config: AgentConfig::default(),
            hooks: None,
        }
    }

    #[must_use]
    pub fn model<M: ChatModel + 'static>(mut self, model: M) -> Self {
        self.model = Some(Box::new(model));
        self
    }

    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn pre_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.pre_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn hooks<H: AgentHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    pub fn build(self) -> Result<Agent> {
        let model = self
            .model
            .ok_or_else(|| AgentError::Config("Chat model is required".into()))?;

        let mut agent = Agent::from_boxed(model, self.tools, self.config)?;
        if let Some(hooks) = self.hooks {
            agent.hooks = hooks;
        }
        Ok(agent)
    }
}
