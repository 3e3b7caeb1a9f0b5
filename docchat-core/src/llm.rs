//! Language model interface and the OpenAI-compatible chat client.
//!
//! The pipeline treats the model as an opaque `complete(prompt) -> text`
//! function. Any endpoint that speaks the chat completions API works,
//! including Ollama, vLLM and LM Studio.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{RagError, Result};

/// Text-in, text-out model call.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Chat completions client sending the prompt as a single user message.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl std::fmt::Debug for OpenAiChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatModel")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OpenAiChatModel {
    pub fn new(
        api_key: String,
        model: impl Into<String>,
        base_url: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::invalid_config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            temperature,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| RagError::invalid_config(format!("{} is not set", config.api_key_env)))?;
        Self::new(
            api_key,
            config.chat_model.clone(),
            config.base_url.clone(),
            config.temperature,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn parse_response(json: &Value) -> Result<String> {
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RagError::generation("Response has no message content"))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "stream": false,
        });

        debug!(url = %url, model = %self.model, prompt_chars = prompt.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::generation(format!("Request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RagError::generation(format!("Failed to read response body: {e}")))?;
        if !status.is_success() {
            return Err(RagError::generation(format!("HTTP {status}: {text}")));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| RagError::generation(format!("Invalid JSON: {e}")))?;
        Self::parse_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted model for tests and offline runs.
///
/// Returns queued responses in order; once the queue is empty every call
/// returns the fallback text. Prompts are recorded for inspection.
#[derive(Debug, Default)]
pub struct MockLanguageModel {
    responses: Mutex<VecDeque<Result<String>>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model that answers every prompt with `text`.
    pub fn with_response(text: impl Into<String>) -> Self {
        Self {
            fallback: text.into(),
            ..Self::default()
        }
    }

    pub fn queue_response(&self, text: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(text.into()));
        }
    }

    pub fn queue_error(&self, error: RagError) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let queued = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        queued.unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Construct the chat model described by `config`.
pub fn create_language_model(config: &ProviderConfig) -> Result<Arc<dyn LanguageModel>> {
    Ok(Arc::new(OpenAiChatModel::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion_body(content: &str) -> String {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_chat_model_returns_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("The sky is blue."))
            .create_async()
            .await;

        let model = OpenAiChatModel::new(
            "sk-test".into(),
            "gpt-4o",
            server.url(),
            0.0,
            Duration::from_secs(5),
        )
        .unwrap();
        let answer = model.complete("What color is the sky?").await.unwrap();
        assert_eq!(answer, "The sky is blue.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_model_http_error_is_generation_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Rate limit"}}"#)
            .create_async()
            .await;

        let model =
            OpenAiChatModel::new("k".into(), "gpt-4o", server.url(), 0.0, Duration::from_secs(5))
                .unwrap();
        let err = model.complete("hi").await.unwrap_err();
        assert!(matches!(err, RagError::Generation { .. }));
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn test_parse_response_missing_content() {
        let err = OpenAiChatModel::parse_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, RagError::Generation { .. }));
    }

    #[tokio::test]
    async fn test_mock_model_queue_then_fallback() {
        let model = MockLanguageModel::with_response("fallback");
        model.queue_response("first");
        model.queue_error(RagError::generation("down"));

        assert_eq!(model.complete("p1").await.unwrap(), "first");
        assert!(model.complete("p2").await.is_err());
        assert_eq!(model.complete("p3").await.unwrap(), "fallback");
        assert_eq!(model.prompts(), vec!["p1", "p2", "p3"]);
    }
}
