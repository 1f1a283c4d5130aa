//! Tool System
//!
//! Host functions exposed to the model. Host method metadata is normalized into
//! [`ToolSpec`]s by [`resolve`], and the [`ToolRegistry`] maps each tool name to
//! its spec and an invocable handle. The agent loop depends only on the
//! registry, never on how the host discovered its methods.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};

// ============================================================================
// Tool specs
// ============================================================================

/// Semantic type of a tool parameter, as the model sees it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Map a host source type name onto a parameter type.
    ///
    /// Unrecognized types fall back to `string`.
    pub fn from_source_type(source: &str) -> Self {
        let normalized = source.trim().trim_start_matches('&').to_ascii_lowercase();
        let base = normalized.split('<').next().unwrap_or_default();
        match base {
            "int" | "integer" | "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8"
            | "u16" | "u32" | "u64" | "u128" | "usize" => Self::Integer,
            "float" | "double" | "number" | "f32" | "f64" => Self::Number,
            "bool" | "boolean" => Self::Boolean,
            "array" | "list" | "vec" => Self::Array,
            "object" | "map" | "hashmap" | "btreemap" => Self::Object,
            _ => Self::String,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tool parameter
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(default)]
    pub description: String,
}

/// Normalized tool descriptor handed to chat models
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool identifier, used as the dispatch key
    pub name: String,

    /// Human-readable description (sent to the model verbatim)
    pub description: String,

    /// Parameters in declaration order
    pub parameters: Vec<ToolParameter>,

    /// Names of mandatory parameters
    pub required: Vec<String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            required: Vec::new(),
        }
    }

    /// Append a parameter
    #[must_use]
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.parameters.push(ToolParameter {
            name,
            param_type,
            description: description.into(),
        });
        self
    }

    pub fn is_required(&self, param: &str) -> bool {
        self.required.iter().any(|r| r == param)
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Metadata for one host parameter
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostParameter {
    pub name: String,

    /// Host-side type name, e.g. `f64`, `int`, `Vec<String>`
    pub source_type: String,

    #[serde(default)]
    pub description: String,

    /// Optional parameters are left out of the required list
    #[serde(default)]
    pub optional: bool,
}

impl HostParameter {
    pub fn new(
        name: impl Into<String>,
        source_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            description: description.into(),
            optional: false,
        }
    }

    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Metadata record for a host method that may be exposed to the model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostMethod {
    pub name: String,

    /// Marker: only exposed methods become tools
    pub exposed: bool,

    pub description: Option<String>,

    #[serde(default)]
    pub parameters: Vec<HostParameter>,
}

impl HostMethod {
    /// An exposed method with a description
    pub fn exposed(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exposed: true,
            description: Some(description.into()),
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, param: HostParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Normalize this method into a tool spec
    pub fn to_spec(&self) -> Result<ToolSpec> {
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                AgentError::MalformedToolMetadata(format!(
                    "method '{}' is exposed to the model but has no description",
                    self.name
                ))
            })?;

        let parameters = self
            .parameters
            .iter()
            .map(|p| ToolParameter {
                name: p.name.clone(),
                param_type: ParamType::from_source_type(&p.source_type),
                description: p.description.clone(),
            })
            .collect();

        let required = self
            .parameters
            .iter()
            .filter(|p| !p.optional)
            .map(|p| p.name.clone())
            .collect();

        Ok(ToolSpec {
            name: self.name.clone(),
            description: description.to_string(),
            parameters,
            required,
        })
    }
}

/// Resolve host method metadata into tool specs, in declaration order.
///
/// Methods without the exposed marker are skipped.
pub fn resolve(methods: &[HostMethod]) -> Result<Vec<ToolSpec>> {
    methods
        .iter()
        .filter(|m| m.exposed)
        .map(HostMethod::to_spec)
        .collect()
}

// ============================================================================
// Calls and arguments
// ============================================================================

/// Tool call request from the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Provider-native argument payload (JSON string, object or array)
    #[serde(default)]
    pub arguments: Value,

    /// Call ID for providers that correlate results to calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            id: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Arguments as a JSON object, decoding string payloads
    pub fn arguments_object(&self) -> Result<Map<String, Value>> {
        match &self.arguments {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map.clone()),
            Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
            Value::String(raw) => match serde_json::from_str::<Value>(raw)? {
                Value::Object(map) => Ok(map),
                Value::Null => Ok(Map::new()),
                other => Err(AgentError::ToolValidation(format!(
                    "arguments for '{}' must be an object, got {other}",
                    self.name
                ))),
            },
            other => Err(AgentError::ToolValidation(format!(
                "arguments for '{}' must be an object, got {other}",
                self.name
            ))),
        }
    }
}

/// Decoded tool arguments keyed by parameter name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolArguments(Map<String, Value>);

impl ToolArguments {
    /// Decode a provider-native payload against a spec.
    ///
    /// Positional (array) payloads are keyed by the spec's parameter order.
    pub fn decode(payload: &Value, spec: &ToolSpec) -> Result<Self> {
        let decoded = match payload {
            Value::String(raw) if raw.trim().is_empty() => Value::Null,
            Value::String(raw) => serde_json::from_str(raw)?,
            other => other.clone(),
        };

        let map = match decoded {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            Value::Array(values) => {
                if values.len() > spec.parameters.len() {
                    return Err(AgentError::ToolValidation(format!(
                        "'{}' takes {} arguments but {} were given",
                        spec.name,
                        spec.parameters.len(),
                        values.len()
                    )));
                }
                spec.parameters
                    .iter()
                    .zip(values)
                    .map(|(p, v)| (p.name.clone(), v))
                    .collect()
            }
            other => {
                return Err(AgentError::ToolValidation(format!(
                    "arguments for '{}' must be an object or array, got {other}",
                    spec.name
                )));
            }
        };

        let args = Self(map);
        args.check_required(spec)?;
        Ok(args)
    }

    fn check_required(&self, spec: &ToolSpec) -> Result<()> {
        for name in &spec.required {
            if !self.0.contains_key(name) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {name}"
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::ToolValidation(format!("'{name}' must be a string")))
    }

    /// Numbers may arrive as JSON numbers or numeric strings
    pub fn f64(&self, name: &str) -> Result<f64> {
        let value = match self.get(name) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        value.ok_or_else(|| AgentError::ToolValidation(format!("'{name}' must be a number")))
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        let value = match self.get(name) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        value.ok_or_else(|| AgentError::ToolValidation(format!("'{name}' must be an integer")))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        let value = match self.get(name) {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        value.ok_or_else(|| AgentError::ToolValidation(format!("'{name}' must be a boolean")))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Render a tool return value as result text for the model
pub fn render_result(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tool trait and registry
// ============================================================================

/// Tool trait - implement to expose a host capability
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's descriptor
    fn spec(&self) -> ToolSpec;

    /// Execute the tool with decoded arguments
    async fn call(&self, args: &ToolArguments) -> Result<Value>;
}

type BoxedHandler = Arc<dyn Fn(ToolArguments) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A tool backed by a closure
pub struct FnTool {
    spec: ToolSpec,
    handler: BoxedHandler,
}

impl FnTool {
    /// Wrap a synchronous closure
    pub fn new<F>(spec: ToolSpec, f: F) -> Self
    where
        F: Fn(&ToolArguments) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            spec,
            handler: Arc::new(move |args: ToolArguments| -> BoxFuture<'static, Result<Value>> {
                Box::pin(futures::future::ready(f(&args)))
            }),
        }
    }

    /// Wrap a closure returning a boxed future
    pub fn new_async<F>(spec: ToolSpec, f: F) -> Self
    where
        F: Fn(ToolArguments) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        Self {
            spec,
            handler: Arc::new(f),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn call(&self, args: &ToolArguments) -> Result<Value> {
        (self.handler)(args.clone()).await
    }
}

struct Registered {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
}

/// Registration table: tool name -> spec and handle, in registration order
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Registered>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let spec = tool.spec();
        if let Some(&idx) = self.index.get(&spec.name) {
            self.entries[idx] = Registered { spec, tool };
        } else {
            self.index.insert(spec.name.clone(), self.entries.len());
            self.entries.push(Registered { spec, tool });
        }
    }

    /// Resolve a host method and register a synchronous handler for it
    pub fn register_method<F>(&mut self, method: &HostMethod, f: F) -> Result<()>
    where
        F: Fn(&ToolArguments) -> Result<Value> + Send + Sync + 'static,
    {
        let spec = method.to_spec()?;
        self.register(FnTool::new(spec, f));
        Ok(())
    }

    /// Resolve a host method and register an async handler for it
    pub fn register_method_async<F>(&mut self, method: &HostMethod, f: F) -> Result<()>
    where
        F: Fn(ToolArguments) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        let spec = method.to_spec()?;
        self.register(FnTool::new_async(spec, f));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.entries[i].tool))
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.entries[i].spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Decode arguments and invoke a tool by name
    pub async fn invoke(&self, name: &str, payload: &Value) -> Result<(ToolArguments, Value)> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        let entry = &self.entries[idx];
        let args = ToolArguments::decode(payload, &entry.spec)?;
        let value = entry.tool.call(&args).await?;
        Ok((args, value))
    }

    /// All tool specs in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.spec.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_method() -> HostMethod {
        HostMethod::exposed("add", "add two numbers together")
            .param(HostParameter::new("a", "float", ""))
            .param(HostParameter::new("b", "float", ""))
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(ParamType::from_source_type("int"), ParamType::Integer);
        assert_eq!(ParamType::from_source_type("u64"), ParamType::Integer);
        assert_eq!(ParamType::from_source_type("float"), ParamType::Number);
        assert_eq!(ParamType::from_source_type("f64"), ParamType::Number);
        assert_eq!(ParamType::from_source_type("bool"), ParamType::Boolean);
        assert_eq!(ParamType::from_source_type("Vec<String>"), ParamType::Array);
        assert_eq!(ParamType::from_source_type("HashMap<String, i32>"), ParamType::Object);
        assert_eq!(ParamType::from_source_type("DateTime"), ParamType::String);
        assert_eq!(ParamType::from_source_type(""), ParamType::String);
    }

    #[test]
    fn test_resolve_keeps_declaration_order_and_skips_hidden() {
        let hidden = HostMethod {
            name: "internal".into(),
            exposed: false,
            description: None,
            parameters: vec![],
        };
        let date = HostMethod::exposed("current_date", "Gets the current date").param(
            HostParameter::new("offset", "int", "hours to offset").optional(),
        );

        let specs = resolve(&[add_method(), hidden, date]).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "add");
        assert_eq!(specs[0].required, vec!["a", "b"]);
        assert_eq!(specs[0].parameters[1].param_type, ParamType::Number);
        assert_eq!(specs[1].name, "current_date");
        assert!(specs[1].required.is_empty());
        assert_eq!(specs[1].parameters[0].param_type, ParamType::Integer);
    }

    #[test]
    fn test_resolve_rejects_missing_description() {
        let mut method = add_method();
        method.description = None;
        let err = resolve(&[method]).unwrap_err();
        assert!(matches!(err, AgentError::MalformedToolMetadata(msg) if msg.contains("add")));
    }

    #[test]
    fn test_decode_string_object_and_positional_payloads() {
        let spec = add_method().to_spec().unwrap();

        let args = ToolArguments::decode(&json!("{\"a\": 2, \"b\": 3}"), &spec).unwrap();
        assert!((args.f64("a").unwrap() - 2.0).abs() < f64::EPSILON);

        let args = ToolArguments::decode(&json!({"a": "2.5", "b": 1}), &spec).unwrap();
        assert!((args.f64("a").unwrap() - 2.5).abs() < f64::EPSILON);

        let args = ToolArguments::decode(&json!([4, 5]), &spec).unwrap();
        assert_eq!(args.get("b"), Some(&json!(5)));
    }

    #[test]
    fn test_decode_reports_missing_required() {
        let spec = add_method().to_spec().unwrap();
        let err = ToolArguments::decode(&json!({"a": 1}), &spec).unwrap_err();
        assert!(err.to_string().contains("Missing required parameter: b"));

        let err = ToolArguments::decode(&json!("not json"), &spec).unwrap_err();
        assert!(matches!(err, AgentError::Json(_)));
    }

    #[test]
    fn test_render_result() {
        assert_eq!(render_result(&Value::Null), "");
        assert_eq!(render_result(&json!("five")), "five");
        assert_eq!(render_result(&json!(5.0)), "5.0");
        assert_eq!(render_result(&json!({"temp": 70})), "{\"temp\":70}");
    }

    #[tokio::test]
    async fn test_registry_invoke() {
        let mut registry = ToolRegistry::new();
        registry
            .register_method(&add_method(), |args| Ok(json!(args.f64("a")? + args.f64("b")?)))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("add"));
        assert!(registry.get("unknown").is_none());

        let (_, value) = registry.invoke("add", &json!("{\"a\":2,\"b\":3}")).await.unwrap();
        assert_eq!(value, json!(5.0));

        let err = registry.invoke("nope", &Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }

    #[test]
    fn test_registry_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new(ToolSpec::new("a", "first"), |_| Ok(Value::Null)));
        registry.register(FnTool::new(ToolSpec::new("b", "second"), |_| Ok(Value::Null)));
        registry.register(FnTool::new(ToolSpec::new("a", "replaced"), |_| Ok(Value::Null)));

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.spec("a").unwrap().description, "replaced");
    }
}
