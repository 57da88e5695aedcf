//! Error types for neurosim
//!
//! One error enum covers every layer. Variants fall into four groups:
//!
//! - **Data errors**: a single item is bad (malformed diagram, missing source
//!   entity, empty batch). Callers usually log these and skip the item.
//! - **Remote failures**: the entity store or scoring index is unreachable,
//!   or a write reported failure. These abort the current pipeline stage.
//! - **Configuration errors**: a required collaborator or setting is missing.
//!   Raised before any work begins.
//! - **Plumbing**: I/O and (de)serialization.
//!
//! Ambiguous find-or-create matches are not errors; they are logged as
//! warnings and the first match wins.

use std::io;
use thiserror::Error;

/// Result type alias for neurosim operations
pub type SimilarityResult<T> = Result<T, SimilarityError>;

/// Errors raised by vectorization, registration and scoring
#[derive(Debug, Error)]
pub enum SimilarityError {
    /// A persistence diagram has points that are not (birth, death) pairs
    #[error("Malformed persistence diagram for {key}: {reason}")]
    MalformedDiagram {
        /// Encoded entity key
        key: String,
        /// What is wrong with the diagram
        reason: String,
    },

    /// A persistence diagram has no points left to vectorize
    #[error("Empty persistence diagram for {key}")]
    EmptyDiagram {
        /// Encoded entity key
        key: String,
    },

    /// A vectorization routine failed numerically for one entity
    #[error("Vectorization failed for {key}: {reason}")]
    Vectorization {
        /// Encoded entity key
        key: String,
        /// Failure description
        reason: String,
    },

    /// An entity could not be retrieved from the store
    #[error("Entity not found: {id}")]
    EntityNotFound {
        /// Entity identifier
        id: String,
    },

    /// A batch operation was called with nothing to do
    #[error("Nothing to register: empty {what} batch")]
    EmptyBatch {
        /// What the batch was supposed to contain
        what: String,
    },

    /// Vector dimension doesn't match the rest of the batch or the index
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        got: usize,
    },

    /// The entity store is unreachable or rejected the request
    #[error("Store error: {0}")]
    Store(String),

    /// The scoring index is unreachable or rejected the query
    #[error("Index error: {0}")]
    Index(String),

    /// A bulk write or tag reported per-member failures
    #[error("Failed to {action} {failed} of {total} {what}")]
    PersistFailed {
        /// "create", "update" or "tag"
        action: String,
        /// What was being written ("embeddings", "boosting factors", ...)
        what: String,
        /// Number of members that failed
        failed: usize,
        /// Number of members in the sub-batch
        total: usize,
        /// Per-member error messages
        errors: Vec<String>,
    },

    /// A collaborator required for the requested work was not provided
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(String),

    /// Configuration value is missing or invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error (cache files, artifacts)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SimilarityError {
    /// Bad input for a single item; the batch can continue without it
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            SimilarityError::MalformedDiagram { .. }
                | SimilarityError::EmptyDiagram { .. }
                | SimilarityError::Vectorization { .. }
                | SimilarityError::EntityNotFound { .. }
                | SimilarityError::EmptyBatch { .. }
                | SimilarityError::DimensionMismatch { .. }
        )
    }

    /// A remote collaborator failed; the current stage must abort
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            SimilarityError::Store(_)
                | SimilarityError::Index(_)
                | SimilarityError::PersistFailed { .. }
        )
    }

    /// Raised before any work begins
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SimilarityError::MissingCollaborator(_) | SimilarityError::InvalidConfig(_)
        )
    }
}

impl From<serde_json::Error> for SimilarityError {
    fn from(e: serde_json::Error) -> Self {
        SimilarityError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SimilarityError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SimilarityError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SimilarityError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SimilarityError::Serialization(e.to_string())
    }
}
