//! Embedding provider seam and its OpenAI-compatible implementation.

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::ProviderError;

pub mod openai;

pub use openai::OpenAiEmbedder;

/// Turns text into fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    /// Embeds `inputs`, returning one vector per input in the same order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Largest batch a single call accepts.
    fn max_batch_size(&self) -> usize;

    /// Embeds a single string.
    fn embed_one(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_batch(&[input])?
            .pop()
            .ok_or_else(|| ProviderError::Malformed("empty embedding response".into()))
    }
}

pub(crate) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

/// 500 ms doubled per attempt, capped at 2^5.
pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2000));
        assert_eq!(retry_backoff(9), Duration::from_millis(16000));
    }

    #[test]
    fn retries_rate_limits_and_server_errors_only() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
    }
}
