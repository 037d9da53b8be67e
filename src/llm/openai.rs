//! OpenAI-compatible chat completions over `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ChatMessage, ChatModel, ModelProvider, DEFAULT_MODEL};
use crate::spec::LlmSpec;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// A chat completions client for one model.
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    client: reqwest::Client,
    model: String,
    temperature: Option<f64>,
    api_key: Option<String>,
    base_url: String,
    max_retries: u32,
}

impl OpenAiChatModel {
    pub fn new(model: impl Into<String>, api_key: Option<String>, base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            client,
            model: model.into(),
            temperature: None,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: 2,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Build the request body for the chat completions endpoint.
    pub fn build_request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(temp) = self.temperature {
            body["temperature"] = json!(temp);
        }
        body
    }

    fn parse_completion(response: &Value) -> anyhow::Result<String> {
        let message = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| anyhow!("no message in chat completion response"))?;

        if let Some(usage) = response.get("usage") {
            log::debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0),
                usage.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0),
                usage.get("total_tokens").and_then(Value::as_i64).unwrap_or(0),
            );
        }

        Ok(message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .context("OPENAI_API_KEY is not set")?;
        let endpoint = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(messages);

        let mut last_error = anyhow!("chat completion failed after all retries");
        let mut retry_delay = Duration::from_millis(500);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!("Chat completion retry {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match self
                .client
                .post(&endpoint)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.into();
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = anyhow!("chat completion endpoint returned {}", status);
                continue;
            }

            let text = response.text().await?;
            if status.is_client_error() {
                bail!("chat completion error ({}): {}", status, text);
            }

            let json: Value = serde_json::from_str(&text).with_context(|| {
                format!(
                    "invalid chat completion response: {}",
                    &text[..text.len().min(500)]
                )
            })?;
            return Self::parse_completion(&json);
        }

        Err(last_error)
    }
}

/// Builds [`OpenAiChatModel`]s from agent settings, falling back to a
/// service-wide default model.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    default_model: String,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl OpenAiProvider {
    pub fn new(
        default_model: Option<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            base_url,
        }
    }
}

impl ModelProvider for OpenAiProvider {
    fn model_for(&self, spec: Option<&LlmSpec>) -> anyhow::Result<Arc<dyn ChatModel>> {
        let model = spec
            .and_then(|s| s.model.clone())
            .unwrap_or_else(|| self.default_model.clone());
        let base_url = spec
            .and_then(|s| s.extra.get("base_url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.base_url.clone());
        Ok(Arc::new(
            OpenAiChatModel::new(model, self.api_key.clone(), base_url)
                .with_temperature(spec.and_then(|s| s.temperature)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    #[test]
    fn test_request_body_includes_temperature() {
        let model = OpenAiChatModel::new("gpt-4o-mini", None, None).with_temperature(Some(0.2));
        let body = model.build_request_body(&[ChatMessage::user("hi")]);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["temperature"], 0.2);
    }

    #[test]
    fn test_provider_prefers_agent_model() {
        let provider = OpenAiProvider::new(None, None, None);
        let spec = LlmSpec {
            model: Some("gpt-4o".into()),
            ..LlmSpec::default()
        };
        assert_eq!(provider.model_for(Some(&spec)).unwrap().model(), "gpt-4o");
        assert_eq!(provider.model_for(None).unwrap().model(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_fast() {
        let model = OpenAiChatModel::new("gpt-4o-mini", None, None);
        let err = model.invoke(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::BAD_GATEWAY, Json(json!({})))
                    } else {
                        (
                            StatusCode::OK,
                            Json(json!({"choices": [{"message": {"content": "Final Answer: 42"}}]})),
                        )
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let model = OpenAiChatModel::new("m", Some("key".into()), Some(url));
        let text = model.invoke(&[ChatMessage::user("q")]).await.unwrap();
        assert_eq!(text, "Final Answer: 42");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
