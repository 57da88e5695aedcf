//! Embedding, boosting and statistics registration for neurosim
//!
//! This crate turns model runs into registered, discoverable entities:
//! - persist / fetch: the find-or-create plus tag-after-write protocol
//! - model / catalog: embedding models and their cross-bucket catalog
//! - embedding: EmbeddingRegistry
//! - boosting: BoostingFactorCalculator and boosting factor registration
//! - stats: StatisticsAggregator and statistic registration
//! - views: similarity, boosting and statistic views
//! - pipeline: the twelve-stage RegistrationPipeline
//! - config: `neurosim.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agents;
pub mod boosting;
pub mod catalog;
pub mod config;
pub mod embedding;
pub mod fetch;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod stats;
pub mod views;

pub use boosting::{
    boosting_from_documents, register_boosting_factors, score_deviation,
    BoostingFactorCalculator, DEFAULT_NEIGHBORHOOD_SIZE,
};
pub use catalog::{build_has_part, catalog_name, push_catalog};
pub use config::{
    BoostingConfig, PipelineConfig, SimilarityConfig, TechniqueKind, VectorizationConfig,
    CONFIG_FILE_NAME,
};
pub use embedding::{embedding_name, embedding_tag, model_tag, EmbeddingRegistry, TagTransformer};
pub use model::{fetch_model, push_model, require_model, ModelDescription};
pub use persist::{persist_batch, PersistAction};
pub use pipeline::{
    DiagramModel, EmbeddingModelRunner, EmbeddingRequest, PipelineOutput, RegistrationPipeline,
    Stage,
};
pub use stats::{fetch_stats, register_stats, StatisticsAggregator};
