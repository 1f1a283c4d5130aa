//! HTTP plumbing shared by every provider

use std::time::Duration;

use agent_core::error::{AgentError, Result};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

/// Build an HTTP client with a request timeout
pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))
}

/// Send a prepared request and decode the JSON reply.
///
/// Network failures and non-2xx statuses become `ProviderTransport` errors
/// carrying the raw response body; an undecodable body is a `Protocol` error.
pub async fn send_json(provider: &str, request: RequestBuilder) -> Result<Value> {
    let response = request.send().await.map_err(|e| {
        AgentError::transport(e.status().map(|s| s.as_u16()), format!("{provider} request failed: {e}"))
    })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| {
        AgentError::transport(Some(status.as_u16()), format!("{provider} response unreadable: {e}"))
    })?;

    if !status.is_success() {
        tracing::warn!(provider, status = status.as_u16(), "Provider returned an error status");
        return Err(AgentError::transport(
            Some(status.as_u16()),
            format!("{provider} API error ({status}): {body}"),
        ));
    }

    serde_json::from_str(&body)
        .map_err(|e| AgentError::Protocol(format!("{provider} returned invalid JSON ({e}): {body}")))
}

/// Read a required value from the environment
pub fn required_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AgentError::Config(format!("{name} is not set")))
}

/// Read an optional value from the environment
pub fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Message of a provider error object (`{"error": {"message": ...}}` or a bare string)
pub fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map_or_else(|| error.to_string(), str::to_string)
}
