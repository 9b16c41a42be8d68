//! Streaming OpenAI-compatible HTTP backend, grounded in `CloudLLM`'s
//! `clients/openai.rs` (Chat Completions request/response shape,
//! usage capture) and `client_wrapper.rs`'s streaming-chunk handling via
//! `futures_util`.

use crate::{BackendAdapter, BackendError, InferOptions, InferResponse, Usage};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    stream: bool,
}

impl OpenAiBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            stream: false,
        }
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    async fn infer_complete(
        &self,
        prompt: &str,
        options: &InferOptions,
    ) -> Result<InferResponse, BackendError> {
        let body = self.request_body(prompt, options, false);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        let text = payload
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BackendError::Protocol("no choices in response".into()))?;

        Ok(InferResponse {
            text,
            usage: Usage {
                prompt_tokens: payload.usage.prompt_tokens,
                completion_tokens: payload.usage.completion_tokens,
            },
        })
    }

    /// Consume a server-sent-events stream to completion before
    /// returning: streaming is optional infrastructure, never a
    /// token-at-a-time contract the executor has to understand.
    async fn infer_streaming(
        &self,
        prompt: &str,
        options: &InferOptions,
    ) -> Result<InferResponse, BackendError> {
        let body = self.request_body(prompt, options, true);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut text = String::new();
        let mut prompt_tokens = 0u32;
        let mut completion_tokens = 0u32;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BackendError::Network(e.to_string()))?;
            for line in String::from_utf8_lossy(&chunk).lines() {
                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                if payload.trim() == "[DONE]" {
                    continue;
                }
                if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(payload) {
                    if let Some(choice) = chunk.choices.first() {
                        if let Some(delta) = &choice.delta.content {
                            text.push_str(delta);
                        }
                    }
                    if let Some(usage) = chunk.usage {
                        prompt_tokens = usage.prompt_tokens;
                        completion_tokens = usage.completion_tokens;
                    }
                }
            }
        }

        Ok(InferResponse {
            text,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
            },
        })
    }

    fn request_body(&self, prompt: &str, options: &InferOptions, stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stop": options.stop_sequences,
            "stream": stream,
        })
    }
}

#[async_trait]
impl BackendAdapter for OpenAiBackend {
    fn kind(&self) -> &'static str {
        "openai_http"
    }

    async fn infer(&self, prompt: &str, options: &InferOptions) -> Result<InferResponse, BackendError> {
        if self.stream {
            self.infer_streaming(prompt, options).await
        } else {
            self.infer_complete(prompt, options).await
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChatChunkChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkChoice {
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}
