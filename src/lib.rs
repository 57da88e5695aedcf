//! neurosim - topological similarity for neuron morphologies
//!
//! neurosim turns persistence diagrams of neuron morphologies into feature
//! vectors, registers them as embeddings, and registers the boosting factors
//! and score statistics that make neighbor scores comparable across a
//! corpus.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use neurosim::{
//!     Bucket, DiagramModel, MemoryDeployment, ModelDescription, NeuriteType,
//!     RegistrationPipeline, SimilarityConfig, VectorizationTechnique,
//! };
//!
//! let deployment = Arc::new(MemoryDeployment::new());
//! let pipeline = RegistrationPipeline::new(deployment.clone(), deployment, SimilarityConfig::default())?;
//!
//! let bucket = Bucket::new("https://kg.example.org/v1", "bbp", "mmb");
//! let runner = DiagramModel::new(VectorizationTechnique::persistence_image(), "data", NeuriteType::BasalDendrite);
//! let output = pipeline.register_all(&runner, &ModelDescription::new("TMD", "tmd"), &bucket)?;
//! ```
//!
//! # Architecture
//!
//! - `neurosim-core`: identities, entities, formulas, statistics, errors and
//!   the collaborator traits
//! - `neurosim-vectorize`: persistence-diagram vectorization
//! - `neurosim-engine`: in-memory store, views and scoring index
//! - `neurosim-registration`: the registration protocol and pipeline

pub use neurosim_core::{
    Bucket, Entity, EntityBody, EntityFilter, EntityKey, EntityRef, EntityStore, EntityType,
    FeatureVector, IndexedVector, Revision, ScoringIndex, SimilarityError, SimilarityFormula,
    SimilarityResult, Statistic, StoreProvider, ViewRef, ViewService,
};
pub use neurosim_engine::{BruteForceIndex, MemoryDeployment, MemoryStore};
pub use neurosim_registration::*;
pub use neurosim_vectorize::{
    DiagramCache, DiagramSource, NeuriteType, RequestedKey, VectorArtifact, VectorEncoding,
    VectorizationEngine, VectorizationTechnique,
};
