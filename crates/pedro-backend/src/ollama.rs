//! Local Ollama-style HTTP backend, the non-streaming local variant.
//! Shares the `BackendAdapter` shape with `openai.rs`; Ollama's
//! `/api/generate` endpoint returns a single JSON object rather than a
//! chat-message array, so the request/response shapes diverge from the
//! OpenAI client while the trait contract stays
//! identical.

use crate::{BackendAdapter, BackendError, InferOptions, InferResponse, Usage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl BackendAdapter for OllamaBackend {
    fn kind(&self) -> &'static str {
        "ollama_http"
    }

    async fn infer(&self, prompt: &str, options: &InferOptions) -> Result<InferResponse, BackendError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
                "stop": options.stop_sequences,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        Ok(InferResponse {
            text: payload.response,
            usage: Usage {
                prompt_tokens: payload.prompt_eval_count.unwrap_or(0),
                completion_tokens: payload.eval_count.unwrap_or(0),
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_is_stable() {
        let backend = OllamaBackend::new("http://localhost:11434", "llama3");
        assert_eq!(backend.kind(), "ollama_http");
    }
}
