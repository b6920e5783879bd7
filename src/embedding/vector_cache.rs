// src/embedding/vector_cache.rs
use anyhow::Result;
use log::{debug, info, warn};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::embedding::codec::{decode_vector, encode_vector};
use crate::embedding::vector_store::{StoredVector, VectorStore};
use crate::embedding::{embed_with_retry, EmbeddingProvider, RetryPolicy};
use crate::error::DedupeError;
use crate::models::activity::{ActivityField, ActivityId};
use crate::models::matching::Vector;

const DEFAULT_CACHE_SIZE: usize = 20000;

/// Identifies the text a vector was computed from. Includes the model and the
/// requested dimensionality, so changing either makes every stored entry stale.
pub fn text_signature(model_id: &str, dimensions: Option<usize>, normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update(b"\x1f");
    match dimensions {
        Some(dims) => hasher.update(dims.to_string().as_bytes()),
        None => hasher.update(b"native"),
    }
    hasher.update(b"\x1f");
    hasher.update(normalized_text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorCacheStats {
    pub memory_hits: usize,
    pub store_hits: usize,
    pub misses: usize,
    pub stale: usize,
    pub corrupt_recomputed: usize,
}

struct MemoryEntry {
    signature: String,
    vector: Vector,
}

/// Embedding lookups keyed by (activity id, field): an in-process LRU in front
/// of a persistent [`VectorStore`], falling back to the provider.
///
/// A stored entry is reused only when its signature matches the current text
/// and model. Unreadable entries are recomputed and overwritten.
pub struct VectorCache {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    retry: RetryPolicy,
    memory: LruCache<(ActivityId, ActivityField), MemoryEntry>,
    stats: VectorCacheStats,
}

impl VectorCache {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        retry: RetryPolicy,
        capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CACHE_SIZE))
            .unwrap_or(NonZeroUsize::MIN);
        info!(
            "Initializing VectorCache for model {} with in-memory capacity {}",
            provider.model_id(),
            capacity
        );
        Self {
            provider,
            store,
            retry,
            memory: LruCache::new(capacity),
            stats: VectorCacheStats::default(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn stats(&self) -> VectorCacheStats {
        self.stats
    }

    /// Returns the vector for `normalized_text`, or `None` when the text is
    /// empty and there is nothing to embed.
    ///
    /// Errors: `DedupeError::TransientProvider` once retries are exhausted,
    /// `DedupeError::Provider` for permanent rejections,
    /// `DedupeError::DimensionMismatch` when the provider returns a vector of
    /// the wrong size, and store failures on load.
    pub async fn get_or_compute(
        &mut self,
        activity_id: ActivityId,
        field: ActivityField,
        normalized_text: &str,
    ) -> Result<Option<Vector>> {
        if normalized_text.trim().is_empty() {
            return Ok(None);
        }

        let model_id = self.provider.model_id().to_string();
        let signature = text_signature(&model_id, self.provider.dimensions(), normalized_text);
        let key = (activity_id, field);

        if let Some(entry) = self.memory.get(&key) {
            if entry.signature == signature {
                self.stats.memory_hits += 1;
                return Ok(Some(entry.vector.clone()));
            }
        }

        match self.store.load(activity_id, field).await? {
            Some(stored) if stored.model_id == model_id && stored.text_signature == signature => {
                match self.decode_checked(&stored.blob) {
                    Ok(vector) => {
                        self.stats.store_hits += 1;
                        self.memory.put(
                            key,
                            MemoryEntry {
                                signature,
                                vector: vector.clone(),
                            },
                        );
                        return Ok(Some(vector));
                    }
                    Err(reason) => {
                        let err = DedupeError::CacheCorruption {
                            activity_id,
                            field,
                            reason,
                        };
                        warn!("{}; recomputing", err);
                        self.stats.corrupt_recomputed += 1;
                    }
                }
            }
            Some(_) => {
                debug!(
                    "Cached {} vector for activity {} is stale; recomputing",
                    field, activity_id
                );
                self.stats.stale += 1;
            }
            None => {
                self.stats.misses += 1;
            }
        }

        let vector = embed_with_retry(self.provider.as_ref(), normalized_text, &self.retry).await?;
        if let Some(expected) = self.provider.dimensions() {
            if vector.len() != expected {
                return Err(DedupeError::DimensionMismatch {
                    activity_id,
                    field,
                    expected,
                    found: vector.len(),
                }
                .into());
            }
        }

        let entry = StoredVector {
            model_id,
            text_signature: signature.clone(),
            blob: encode_vector(&vector),
        };
        if let Err(e) = self.store.save(activity_id, field, &entry).await {
            // The vector is still valid for this run; it is recomputed next time.
            warn!(
                "Failed to persist {} vector for activity {}: {:#}",
                field, activity_id, e
            );
        }

        self.memory.put(
            key,
            MemoryEntry {
                signature,
                vector: vector.clone(),
            },
        );
        Ok(Some(vector))
    }

    fn decode_checked(&self, blob: &[u8]) -> Result<Vector, String> {
        let vector = decode_vector(blob)?;
        if let Some(expected) = self.provider.dimensions() {
            if vector.len() != expected {
                return Err(format!(
                    "stored vector has {} dimension(s), provider declares {}",
                    vector.len(),
                    expected
                ));
            }
        }
        Ok(vector)
    }
}
