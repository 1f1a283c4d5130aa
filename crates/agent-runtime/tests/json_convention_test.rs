use agent_core::builtin::register_math;
use agent_core::{AgentBuilder, AgentConfig, ChatModel, ChatSession, ToolRegistry};
use agent_runtime::{JsonConventionBackend, JsonConventionConfig};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> JsonConventionBackend {
    JsonConventionBackend::new(JsonConventionConfig {
        api_key: "octo-key".into(),
        url: format!("{}/v1/chat/completions", server.uri()),
        ..JsonConventionConfig::default()
    })
    .unwrap()
}

fn completion(content: &str) -> Value {
    json!({
        "id": "cmpl-1",
        "model": "llama-2-70b-chat-fp16",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn test_forced_call_uses_instruction() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer octo-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(r#"{"function": "add", "parameters": {"a": 1, "b": 2}}"#)),
        )
        .mount(&server)
        .await;

    let mut tools = ToolRegistry::new();
    register_math(&mut tools).unwrap();

    let mut session = ChatSession::new(backend(&server), "You are a calculator.");
    session.set_functions(&tools.specs());
    let envelope = session.send_function_call("add").await.unwrap();
    assert_eq!(envelope.tool_calls[0].name, "add");

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert!(body.get("tools").is_none());
    assert_eq!(body["temperature"].as_f64().map(|t| (t * 10.0).round()), Some(1.0));

    let messages = body["messages"].as_array().unwrap();
    let system = messages[0]["content"].as_str().unwrap();
    assert!(system.contains("\"source\":\"instructions\""));
    assert!(system.contains("\"name\":\"add\""));

    let instruction: Value = serde_json::from_str(messages[1]["content"].as_str().unwrap()).unwrap();
    assert_eq!(instruction["data"]["message"], "Call the function add");
}

#[tokio::test]
async fn test_agent_runs_json_convention_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(r#"{"function": "subtract", "parameters": {"a": 10, "b": 4}}"#)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("The difference is 6.")))
        .mount(&server)
        .await;

    let mut tools = ToolRegistry::new();
    register_math(&mut tools).unwrap();
    let mut agent = AgentBuilder::new()
        .model(ChatSession::new(backend(&server), ""))
        .tools(tools)
        .config(AgentConfig::functions())
        .build()
        .unwrap();

    let answer = agent.ask("What is 10 minus 4?").await.unwrap();
    assert_eq!(answer, "The difference is 6.");

    let requests = server.received_requests().await.unwrap();
    let second: Value = requests[1].body_json().unwrap();
    let messages = second["messages"].as_array().unwrap();
    let result: Value = serde_json::from_str(messages.last().unwrap()["content"].as_str().unwrap()).unwrap();
    assert_eq!(
        result,
        json!({"source": "function_result", "data": {"function_name": "subtract", "result": "6"}})
    );
}
