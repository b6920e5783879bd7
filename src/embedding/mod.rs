// src/embedding/mod.rs
//! Embedding provider contract, retry policy, and the persistent vector cache.

pub mod codec;
pub mod openai;
pub mod vector_cache;
pub mod vector_store;

use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;

use crate::error::DedupeError;
use crate::models::matching::Vector;

pub use openai::OpenAiEmbedder;
pub use vector_cache::{VectorCache, VectorCacheStats};
pub use vector_store::{MemoryVectorStore, PgVectorStore, StoredVector, VectorStore};

/// Maps normalized text to a dense vector. Implementations must be
/// deterministic for identical input within one model version.
///
/// `embed` reports retryable failures as `DedupeError::TransientProvider` and
/// permanent rejections as `DedupeError::Provider`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identity; cached vectors from any other model are stale.
    fn model_id(&self) -> &str;

    /// Declared dimensionality, when the provider knows it up front.
    fn dimensions(&self) -> Option<usize>;

    async fn embed(&self, text: &str) -> Result<Vector, DedupeError>;
}

/// Bounded exponential backoff around each embedding call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): initial, 2x, 4x, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(10);
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Calls the provider, retrying transient failures up to `policy.max_attempts`
/// times in total. Permanent failures return immediately.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Vector, DedupeError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match provider.embed(text).await {
            Ok(vector) => {
                if attempt > 1 {
                    debug!("Embedding succeeded on attempt {}", attempt);
                }
                return Ok(vector);
            }
            Err(DedupeError::TransientProvider { message, .. }) => {
                if attempt >= max_attempts {
                    return Err(DedupeError::TransientProvider {
                        attempts: attempt,
                        message,
                    });
                }
                let delay = policy.backoff(attempt);
                warn!(
                    "Transient embedding failure (attempt {}/{}): {}. Retrying in {:?}",
                    attempt, max_attempts, message, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider returning fixed vectors per text, with an optional number of
    /// transient failures before each text succeeds.
    pub struct StubProvider {
        pub model: String,
        pub dims: usize,
        pub declared_dimensions: Option<usize>,
        pub vectors: HashMap<String, Vector>,
        pub failures_before_success: usize,
        pub always_fail: Vec<String>,
        pub calls: AtomicUsize,
        failures_seen: Mutex<HashMap<String, usize>>,
    }

    impl StubProvider {
        pub fn new(dims: usize) -> Self {
            Self {
                model: "stub-model".to_string(),
                dims,
                declared_dimensions: Some(dims),
                vectors: HashMap::new(),
                failures_before_success: 0,
                always_fail: Vec::new(),
                calls: AtomicUsize::new(0),
                failures_seen: Mutex::new(HashMap::new()),
            }
        }

        pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.vectors.insert(text.to_string(), vector);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn model_id(&self) -> &str {
            &self.model
        }

        fn dimensions(&self) -> Option<usize> {
            self.declared_dimensions
        }

        async fn embed(&self, text: &str) -> Result<Vector, DedupeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.always_fail.iter().any(|t| t == text) {
                return Err(DedupeError::TransientProvider {
                    attempts: 1,
                    message: "service unavailable".to_string(),
                });
            }
            {
                let mut seen = self.failures_seen.lock().unwrap();
                let count = seen.entry(text.to_string()).or_insert(0);
                if *count < self.failures_before_success {
                    *count += 1;
                    return Err(DedupeError::TransientProvider {
                        attempts: 1,
                        message: "rate limited".to_string(),
                    });
                }
            }
            Ok(self
                .vectors
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0; self.dims]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubProvider;
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let mut provider = StubProvider::new(2).with("paper plane", vec![1.0, 0.0]);
        provider.failures_before_success = 2;

        let vector = embed_with_retry(&provider, "paper plane", &fast_policy(3))
            .await
            .unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let mut provider = StubProvider::new(2);
        provider.always_fail.push("volcano".to_string());

        let err = embed_with_retry(&provider, "volcano", &fast_policy(3))
            .await
            .unwrap_err();
        match err {
            DedupeError::TransientProvider { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(provider.calls(), 3);
    }
}
