// src/error.rs
use thiserror::Error;

use crate::models::activity::{ActivityField, ActivityId};

/// Failure kinds the duplicate pipeline distinguishes. Everything else
/// (database, IO, HTTP plumbing) travels as a plain `anyhow::Error`.
#[derive(Debug, Error)]
pub enum DedupeError {
    /// Network or rate-limit failure that survived every retry attempt.
    #[error("embedding provider failed after {attempts} attempt(s): {message}")]
    TransientProvider { attempts: u32, message: String },

    /// The provider rejected the request outright (bad key, bad model, bad input).
    #[error("embedding provider rejected the request: {0}")]
    Provider(String),

    #[error(
        "vector dimension mismatch for activity {activity_id} ({field}): expected {expected}, found {found}. \
         Vectors from different embedding models cannot be compared; check EMBEDDING_MODEL_ID / \
         EMBEDDING_DIMENSIONS or clear the activity_embeddings cache"
    )]
    DimensionMismatch {
        activity_id: ActivityId,
        field: ActivityField,
        expected: usize,
        found: usize,
    },

    #[error("cached vector for activity {activity_id} ({field}) is unreadable: {reason}")]
    CacheCorruption {
        activity_id: ActivityId,
        field: ActivityField,
        reason: String,
    },

    #[error("activity {0} is not present in the record store")]
    MissingRecord(ActivityId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "run interrupted during {phase} after {processed}/{total} activities ({pairs_found} pair(s) found so far)"
    )]
    Interrupted {
        phase: &'static str,
        processed: usize,
        total: usize,
        pairs_found: usize,
    },
}

impl DedupeError {
    /// Errors that end the run instead of being recovered locally.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DedupeError::TransientProvider { .. }
                | DedupeError::CacheCorruption { .. }
                | DedupeError::MissingRecord(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds_are_not_fatal() {
        let transient = DedupeError::TransientProvider {
            attempts: 3,
            message: "timeout".to_string(),
        };
        assert!(!transient.is_fatal());
        assert!(!DedupeError::MissingRecord(7).is_fatal());
        assert!(DedupeError::Provider("401".to_string()).is_fatal());
        assert!(DedupeError::InvalidConfig("batch".to_string()).is_fatal());
    }

    #[test]
    fn test_dimension_mismatch_message_names_the_record() {
        let err = DedupeError::DimensionMismatch {
            activity_id: 42,
            field: ActivityField::Title,
            expected: 3072,
            found: 1536,
        };
        let msg = err.to_string();
        assert!(msg.contains("activity 42"));
        assert!(msg.contains("title"));
        assert!(msg.contains("expected 3072, found 1536"));
    }
}
