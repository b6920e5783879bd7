// src/utils/dedupe_config.rs
use log::{info, warn};
use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DedupeError;
use crate::models::activity::ActivityField;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_EMBEDDING_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_VECTOR_CACHE_SIZE: usize = 20000;

/// Settings for the embedding client and its retry policy.
#[derive(Clone)]
pub struct EmbeddingConfig {
    pub model_id: String,
    pub dimensions: Option<usize>,
    pub api_base: String,
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: None,
            api_base: DEFAULT_EMBEDDING_API_BASE.to_string(),
            api_key: None,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

// Keeps the API key out of debug output.
impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[hidden]"))
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DedupeConfig {
    /// Inclusive lower bound on cosine similarity for a pair to be retained.
    pub similarity_threshold: f64,
    /// Number of id1 rows compared per batch.
    pub batch_size: usize,
    /// A pair is retained when any of these fields meets the threshold.
    pub compared_fields: BTreeSet<ActivityField>,
    pub embedding: EmbeddingConfig,
    pub vector_cache_size: usize,
    pub output_dir: PathBuf,
    pub clear_stale_relations: bool,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            compared_fields: BTreeSet::from([ActivityField::Title]),
            embedding: EmbeddingConfig::default(),
            vector_cache_size: DEFAULT_VECTOR_CACHE_SIZE,
            output_dir: PathBuf::from("data"),
            clear_stale_relations: false,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable value '{}' for {}", raw, key);
                default
            }
        },
        Err(_) => default,
    }
}

/// Parses a comma separated field list such as "title, description".
pub fn parse_compared_fields(raw: &str) -> Result<BTreeSet<ActivityField>, DedupeError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ActivityField::from_str)
        .collect()
}

impl DedupeConfig {
    pub fn from_env() -> Result<Self, DedupeError> {
        let defaults = Self::default();

        let compared_fields = match env::var("DEDUPE_COMPARED_FIELDS") {
            Ok(raw) => parse_compared_fields(&raw)?,
            Err(_) => defaults.compared_fields,
        };

        let dimensions = env::var("EMBEDDING_DIMENSIONS")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok());

        let embedding = EmbeddingConfig {
            model_id: env::var("EMBEDDING_MODEL_ID")
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string()),
            dimensions,
            api_base: env::var("EMBEDDING_API_BASE")
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_API_BASE.to_string()),
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            max_attempts: env_or("EMBEDDING_MAX_ATTEMPTS", 3),
            retry_backoff: Duration::from_millis(env_or("EMBEDDING_RETRY_BACKOFF_MS", 500)),
            timeout: Duration::from_secs(env_or("EMBEDDING_TIMEOUT_SECS", 30)),
        };

        Ok(Self {
            similarity_threshold: env_or("DEDUPE_SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD),
            batch_size: env_or("DEDUPE_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            compared_fields,
            embedding,
            vector_cache_size: env_or("VECTOR_CACHE_SIZE", DEFAULT_VECTOR_CACHE_SIZE),
            output_dir: env::var("DEDUPE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            clear_stale_relations: env_or("DEDUPE_CLEAR_STALE_RELATIONS", false),
        })
    }

    pub fn validate(&self) -> Result<(), DedupeError> {
        // A threshold of 0 or below would retain pairs that carry no signal at all.
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(DedupeError::InvalidConfig(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(DedupeError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.compared_fields.is_empty() {
            return Err(DedupeError::InvalidConfig(
                "compared_fields must name at least one field".to_string(),
            ));
        }
        if self.embedding.model_id.trim().is_empty() {
            return Err(DedupeError::InvalidConfig(
                "embedding_model_id must not be empty".to_string(),
            ));
        }
        if self.embedding.max_attempts == 0 {
            return Err(DedupeError::InvalidConfig(
                "EMBEDDING_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimensions == Some(0) {
            return Err(DedupeError::InvalidConfig(
                "EMBEDDING_DIMENSIONS must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn compared_fields_label(&self) -> String {
        self.compared_fields
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn log_config(&self) {
        info!("🔍 Duplicate detection configuration");
        info!("   Similarity threshold: {}", self.similarity_threshold);
        info!("   Batch size: {}", self.batch_size);
        info!("   Compared fields: {}", self.compared_fields_label());
        info!(
            "   Embedding model: {} (dimensions: {})",
            self.embedding.model_id,
            self.embedding
                .dimensions
                .map(|d| d.to_string())
                .unwrap_or_else(|| "provider default".to_string())
        );
        info!(
            "   Embedding retries: {} attempt(s), {:?} initial backoff",
            self.embedding.max_attempts, self.embedding.retry_backoff
        );
        info!("   Output directory: {}", self.output_dir.display());
        if self.clear_stale_relations {
            info!("   Stale related_ids will be cleared");
        }
        if self.embedding.api_key.is_none() {
            warn!("   OPENAI_API_KEY is not set; the embedding provider cannot be reached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DedupeConfig::default();
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.compared_fields_label(), "title");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_compared_fields() {
        let fields = parse_compared_fields("instructions, Title,,title").unwrap();
        assert_eq!(
            fields.into_iter().collect::<Vec<_>>(),
            vec![ActivityField::Title, ActivityField::Instructions]
        );
        assert!(parse_compared_fields("title,colour").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DedupeConfig::default();
        config.similarity_threshold = 0.0;
        assert!(config.validate().is_err());
        config.similarity_threshold = 1.2;
        assert!(config.validate().is_err());
        config.similarity_threshold = 1.0;
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(config.validate().is_err());
        config.batch_size = 1;

        config.compared_fields.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_config() {
        env::set_var("DEDUPE_SIMILARITY_THRESHOLD", "0.9");
        env::set_var("DEDUPE_BATCH_SIZE", "not-a-number");
        env::set_var("DEDUPE_COMPARED_FIELDS", "title,supplies");
        env::set_var("EMBEDDING_DIMENSIONS", "1536");

        let config = DedupeConfig::from_env().unwrap();
        assert_eq!(config.similarity_threshold, 0.9);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.compared_fields_label(), "title,supplies");
        assert_eq!(config.embedding.dimensions, Some(1536));

        // Clean up
        env::remove_var("DEDUPE_SIMILARITY_THRESHOLD");
        env::remove_var("DEDUPE_BATCH_SIZE");
        env::remove_var("DEDUPE_COMPARED_FIELDS");
        env::remove_var("EMBEDDING_DIMENSIONS");
    }

    #[test]
    fn test_debug_hides_api_key() {
        let embedding = EmbeddingConfig {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", embedding);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[hidden]"));
    }
}
