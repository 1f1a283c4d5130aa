//! JSON-schema tool descriptors

use agent_core::tool::ToolSpec;
use serde_json::{Map, Value, json};

/// Object schema with named properties and a required list
pub fn parameters_schema(spec: &ToolSpec) -> Value {
    let properties: Map<String, Value> = spec
        .parameters
        .iter()
        .map(|p| {
            (
                p.name.clone(),
                json!({ "type": p.param_type.as_str(), "description": p.description }),
            )
        })
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": spec.required,
    })
}

/// `{name, description, parameters}` descriptor used by OpenAI-style APIs
pub fn function_descriptor(spec: &ToolSpec) -> Value {
    json!({
        "name": spec.name,
        "description": spec.description,
        "parameters": parameters_schema(spec),
    })
}

/// Tool call arguments as a JSON string, the way OpenAI transmits them
pub fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        Value::Null => "{}".into(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::ParamType;

    #[test]
    fn test_descriptor_shape() {
        let spec = ToolSpec::new("add", "add two numbers together")
            .param("a", ParamType::Number, "first", true)
            .param("b", ParamType::Number, "second", false);

        let descriptor = function_descriptor(&spec);
        assert_eq!(descriptor["name"], "add");
        assert_eq!(descriptor["parameters"]["type"], "object");
        assert_eq!(descriptor["parameters"]["properties"]["a"]["type"], "number");
        assert_eq!(descriptor["parameters"]["required"], json!(["a"]));

        // identical specs give byte-identical output
        assert_eq!(descriptor.to_string(), function_descriptor(&spec.clone()).to_string());
    }

    #[test]
    fn test_empty_parameters_serialize_as_object() {
        let descriptor = function_descriptor(&ToolSpec::new("complete_task", "done"));
        assert_eq!(descriptor["parameters"]["properties"], json!({}));
    }

    #[test]
    fn test_arguments_string() {
        assert_eq!(arguments_string(&json!("{\"a\":1}")), "{\"a\":1}");
        assert_eq!(arguments_string(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(arguments_string(&Value::Null), "{}");
    }
}
