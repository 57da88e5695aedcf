//! Core types and collaborator contracts for neurosim
//!
//! This crate defines the foundational types used throughout the system:
//! - EntityKey / Revision: opaque identity + revision of source entities
//! - Bucket: an org/project pair where entities and views live
//! - Entity / EntityBody: stored records with derivation and generation
//! - SimilarityFormula: scoring formulas in script and native form
//! - Statistic: score population summaries
//! - SimilarityError: error type hierarchy
//! - Traits: EntityStore, ScoringIndex, ViewService

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod error;
pub mod formula;
pub mod statistic;
pub mod traits;
pub mod types;

pub use entity::{
    CatalogPart, Distribution, Entity, EntityBody, EntityFilter, EntityRef, Generation,
    SeriesEntry, SoftwareAgent, StoreMetadata,
};
pub use error::{SimilarityError, SimilarityResult};
pub use formula::SimilarityFormula;
pub use statistic::Statistic;
pub use traits::{
    ActionResult, EntityStore, IndexedVector, Neighbor, ScoringIndex, StoreProvider, ViewDefinition,
    ViewMapping, ViewRef, ViewService, DENSE_VECTOR_LIMIT, DISTRIBUTION_FIELD,
};
pub use types::{last_segment, Bucket, EntityKey, EntityType, FeatureVector, Revision};
