//! Model backend.
//!
//! `infer(prompt, options) -> {text, usage}`. Two variants — streaming
//! OpenAI-compatible HTTP and local Ollama-style HTTP — tagged by an
//! explicit `kind` field rather than distinguished by downcasting a
//! trait object.

mod backoff;
mod ollama;
mod openai;

pub use backoff::infer_with_backoff;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferResponse {
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Backends are assumed concurrent-safe thin HTTP clients with their own
/// connection pool; implementations must not serialize calls across jobs.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn infer(&self, prompt: &str, options: &InferOptions) -> Result<InferResponse, BackendError>;
}

/// Scripted backend for exercising the executor and CLI without network
/// I/O. Not behind `#[cfg(test)]` because it is also used as a
/// dev-dependency from other crates' integration tests.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// A scripted backend for exercising the executor without network I/O.
    /// Each call to `infer` returns the next scripted response in order.
    pub struct MockBackend {
        responses: Mutex<std::collections::VecDeque<Result<InferResponse, BackendError>>>,
    }

    impl MockBackend {
        pub fn new(responses: Vec<Result<InferResponse, BackendError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
            }
        }

        pub fn text_sequence(texts: Vec<&str>) -> Self {
            Self::new(
                texts
                    .into_iter()
                    .map(|t| {
                        Ok(InferResponse {
                            text: t.to_string(),
                            usage: Usage {
                                prompt_tokens: 10,
                                completion_tokens: 10,
                            },
                        })
                    })
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl BackendAdapter for MockBackend {
        fn kind(&self) -> &'static str {
            "mock"
        }

        async fn infer(&self, _prompt: &str, _options: &InferOptions) -> Result<InferResponse, BackendError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Protocol("mock exhausted".into())))
        }
    }
}
