//! Capped exponential backoff around a backend call. Retries up to a
//! small cap; on exhaustion the job fails with `backend_exhausted`.

use crate::{BackendAdapter, BackendError, InferOptions, InferResponse};
use std::time::Duration;
use tracing::warn;

const BACKOFF_INITIAL_MS: u64 = 100;
const BACKOFF_MAX_MS: u64 = 10_000;

/// Long timeout for a single backend call: a backend is an HTTP round
/// trip that may legitimately take minutes, but must not hang forever.
const BACKEND_CALL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

async fn infer_once(
    backend: &dyn BackendAdapter,
    prompt: &str,
    options: &InferOptions,
) -> Result<InferResponse, BackendError> {
    match tokio::time::timeout(BACKEND_CALL_TIMEOUT, backend.infer(prompt, options)).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Network(format!(
            "backend call exceeded {}s timeout",
            BACKEND_CALL_TIMEOUT.as_secs()
        ))),
    }
}

pub async fn infer_with_backoff(
    backend: &dyn BackendAdapter,
    prompt: &str,
    options: &InferOptions,
    max_retries: u32,
) -> Result<InferResponse, BackendError> {
    let mut delay_ms = BACKOFF_INITIAL_MS;
    let mut attempt = 0;
    loop {
        match infer_once(backend, prompt, options).await {
            Ok(response) => return Ok(response),
            Err(err) if attempt < max_retries => {
                warn!(attempt, error = %err, delay_ms, "backend call failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(BACKOFF_MAX_MS);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::Usage;

    #[tokio::test]
    async fn retries_then_succeeds() {
        let backend = MockBackend::new(vec![
            Err(BackendError::Network("timeout".into())),
            Err(BackendError::Network("timeout".into())),
            Ok(InferResponse {
                text: "ok".into(),
                usage: Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                },
            }),
        ]);
        let result = infer_with_backoff(&backend, "hi", &InferOptions::default(), 5).await;
        assert_eq!(result.unwrap().text, "ok");
    }

    #[tokio::test]
    async fn exhausts_and_returns_error() {
        let backend = MockBackend::new(vec![
            Err(BackendError::Network("a".into())),
            Err(BackendError::Network("b".into())),
        ]);
        let result = infer_with_backoff(&backend, "hi", &InferOptions::default(), 1).await;
        assert!(result.is_err());
    }
}
