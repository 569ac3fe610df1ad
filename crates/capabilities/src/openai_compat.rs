//! OpenAI-compatible chat-completions backend exposed as a model tier.
//!
//! Works with any server speaking `POST {base_url}/chat/completions`
//! (OpenAI, vLLM, llama.cpp, Ollama's compat endpoint, ...).

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use sy_domain::capability::{
    CapabilityError, CapabilityErrorKind, CapabilityResult, Invocation, InvocationOutput, Usage,
};
use sy_domain::config::ModelTierConfig;
use sy_domain::error::{Error, Result};

use crate::traits::Capability;

pub struct OpenAiCompatCapability {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatCapability {
    pub fn from_config(cfg: &ModelTierConfig) -> Result<Self> {
        let api_key = match &cfg.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.is_empty() => Some(key),
                _ => {
                    tracing::warn!(capability = %cfg.name, env = %var, "API key env var not set, sending unauthenticated requests");
                    None
                }
            },
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            name: cfg.name.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
            client,
        })
    }

    fn build_body(&self, input: &Value) -> std::result::Result<Value, CapabilityError> {
        let mut body = json!({
            "model": self.model,
            "messages": build_messages(input)?,
        });
        if let Some(t) = input.get("temperature").and_then(Value::as_f64) {
            body["temperature"] = json!(t);
        }
        if let Some(m) = input.get("max_tokens").and_then(Value::as_u64) {
            body["max_tokens"] = json!(m);
        }
        if input.get("json_mode").and_then(Value::as_bool) == Some(true) {
            body["response_format"] = json!({ "type": "json_object" });
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl Capability for OpenAiCompatCapability {
    async fn invoke(&self, invocation: Invocation) -> CapabilityResult {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&invocation.input)?;
        let started = Instant::now();

        tracing::debug!(capability = %self.name, url = %url, "chat completion request");

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(idem) = &invocation.idempotency_key {
            req = req.header("Idempotency-Key", idem);
        }

        let resp = req.send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            let message = format!("HTTP {} - {}", status.as_u16(), truncate(&text, 500));
            // Auth and request-shape errors will not improve on retry.
            let kind = if status.is_server_error() || status.as_u16() == 429 {
                CapabilityErrorKind::Failed
            } else {
                CapabilityErrorKind::InvalidInput
            };
            return Err(CapabilityError::new(kind, message));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| CapabilityError::failed(format!("invalid JSON from backend: {e}")))?;
        let output = parse_chat_response(&json)?;
        Ok(InvocationOutput::new(output)
            .with_usage(Usage::new(0.0, started.elapsed().as_secs_f64())))
    }
}

fn from_reqwest(e: reqwest::Error) -> CapabilityError {
    if e.is_timeout() {
        CapabilityError::timeout(e.to_string())
    } else {
        CapabilityError::failed(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Map our structured input to chat messages.
///
/// Explicit `messages` win; otherwise a system prompt, optional tool
/// results, and the query are assembled.
fn build_messages(input: &Value) -> std::result::Result<Vec<Value>, CapabilityError> {
    if let Some(messages) = input.get("messages").and_then(Value::as_array) {
        if !messages.is_empty() && input.get("query").is_none() {
            return Ok(messages.clone());
        }
    }

    let mut messages = Vec::new();
    if let Some(system) = input.get("system_prompt").and_then(Value::as_str) {
        messages.push(json!({ "role": "system", "content": system }));
    }
    if let Some(history) = input.get("messages").and_then(Value::as_array) {
        for m in history {
            let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
            // The backend only knows system/user/assistant; fold tool output
            // into assistant context.
            let role = if role == "tool" { "assistant" } else { role };
            let content = m.get("content").and_then(Value::as_str).unwrap_or_default();
            messages.push(json!({ "role": role, "content": content }));
        }
    }
    if let Some(results) = input.get("tool_results").and_then(Value::as_array) {
        if !results.is_empty() {
            let rendered = serde_json::to_string_pretty(results).unwrap_or_default();
            messages.push(json!({
                "role": "system",
                "content": format!("Tool results for this turn:\n{rendered}"),
            }));
        }
    }
    let query = input
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::invalid_input("expected 'query' or 'messages'"))?;
    messages.push(json!({ "role": "user", "content": query }));
    Ok(messages)
}

fn parse_chat_response(body: &Value) -> std::result::Result<Value, CapabilityError> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .ok_or_else(|| CapabilityError::failed("no choices in response"))?;
    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let model = body.get("model").and_then(Value::as_str).unwrap_or("unknown");
    let finish_reason = choice.get("finish_reason").cloned().unwrap_or(Value::Null);

    Ok(json!({
        "text": content,
        "model": model,
        "finish_reason": finish_reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> OpenAiCompatCapability {
        OpenAiCompatCapability::from_config(&ModelTierConfig {
            name: "llm_service".into(),
            base_url: "http://localhost:9/v1/".into(),
            model: "test-model".into(),
            api_key_env: None,
            tier: "standard".into(),
            http_timeout_ms: 1_000,
        })
        .unwrap()
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(tier().base_url, "http://localhost:9/v1");
    }

    #[test]
    fn body_carries_decoding_settings() {
        let body = tier()
            .build_body(&json!({
                "system_prompt": "route",
                "query": "hi",
                "temperature": 0.1,
                "max_tokens": 512,
                "json_mode": true
            }))
            .unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["response_format"]["type"], "json_object");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
    }

    #[test]
    fn tool_results_become_context() {
        let messages = build_messages(&json!({
            "query": "What is 25 * 17?",
            "messages": [{"role": "user", "content": "What is 25 * 17?"}, {"role": "tool", "content": "425"}],
            "tool_results": [{"capability": "math_solver", "output": {"result": 425}}]
        }))
        .unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["role"], "assistant");
        assert!(messages[2]["content"].as_str().unwrap().contains("425"));
    }

    #[test]
    fn missing_query_is_invalid_input() {
        let err = build_messages(&json!({})).unwrap_err();
        assert_eq!(err.kind, CapabilityErrorKind::InvalidInput);
    }

    #[test]
    fn parses_choice_content() {
        let body = json!({
            "model": "m",
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}]
        });
        let out = parse_chat_response(&body).unwrap();
        assert_eq!(out["text"], "hello");
        assert_eq!(out["finish_reason"], "stop");
        assert!(parse_chat_response(&json!({"choices": []})).is_err());
    }
}
