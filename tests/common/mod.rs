//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

pub use neurosim::{
    Bucket, DiagramCache, DiagramModel, EmbeddingModelRunner, EmbeddingRegistry, EmbeddingRequest,
    Entity, EntityBody, EntityFilter, EntityKey, EntityRef, EntityStore, EntityType, FeatureVector,
    MemoryDeployment, MemoryStore, ModelDescription, NeuriteType, RegistrationPipeline,
    RequestedKey, SimilarityConfig, SimilarityError, SimilarityFormula, Stage, Statistic,
    TechniqueKind, VectorArtifact, VectorEncoding, VectorizationTechnique, ViewRef, ViewService,
};
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route pipeline logs through the test writer (shown with --nocapture).
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

pub const ENDPOINT: &str = "https://kg.test/v1";
pub const SOURCE_TYPE: &str = "NeuronMorphology";
pub const MODEL_NAME: &str = "TMD";

// ============================================================================
// TestDeployment - in-memory deployment in a temp directory
// ============================================================================

/// In-memory deployment with one working bucket and a scratch directory.
pub struct TestDeployment {
    pub deployment: Arc<MemoryDeployment>,
    pub dir: TempDir,
    pub bucket: Bucket,
}

impl TestDeployment {
    pub fn new() -> Self {
        init_tracing();
        TestDeployment {
            deployment: Arc::new(MemoryDeployment::new()),
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
            bucket: Bucket::new(ENDPOINT, "bbp", "mmb"),
        }
    }

    /// Store of the working bucket.
    pub fn store(&self) -> Arc<MemoryStore> {
        self.deployment.memory_store(&self.bucket)
    }

    /// Store of another bucket of the same deployment.
    pub fn store_of(&self, bucket: &Bucket) -> Arc<MemoryStore> {
        self.deployment.memory_store(bucket)
    }

    /// Directory holding the diagram caches.
    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("diagrams")
    }

    /// Config writing under the temp directory.
    pub fn config(&self) -> SimilarityConfig {
        let mut config = SimilarityConfig::default();
        config.pipeline.data_dir = self.dir.path().join("data");
        config.vectorization.resolution = 4;
        config
    }

    pub fn pipeline(&self) -> RegistrationPipeline {
        self.pipeline_with(self.config())
    }

    pub fn pipeline_with(&self, config: SimilarityConfig) -> RegistrationPipeline {
        RegistrationPipeline::new(self.deployment.clone(), self.deployment.clone(), config)
            .expect("Failed to create pipeline")
    }

    /// Register source entities, returning their keys at revision 1.
    pub fn seed_sources(&self, ids: &[&str]) -> Vec<EntityKey> {
        let mut entities: Vec<Entity> = ids
            .iter()
            .map(|id| Entity::source(*id, SOURCE_TYPE))
            .collect();
        let results = self.store().register(&mut entities).unwrap();
        assert!(results.iter().all(|r| r.succeeded));
        entities.iter().map(|e| e.key().unwrap()).collect()
    }

    /// Write the basal dendrite diagram cache of the working bucket.
    pub fn write_diagrams(&self, diagrams: &[(EntityKey, Vec<Vec<f64>>)]) {
        let cache = DiagramCache::for_bucket(&self.cache_dir(), NeuriteType::BasalDendrite, &self.bucket);
        let raw: BTreeMap<EntityKey, Vec<Vec<f64>>> = diagrams.iter().cloned().collect();
        cache.save(&raw).unwrap();
    }

    /// Runner over the diagram caches, vectorizing as `config()` says.
    pub fn runner(&self) -> DiagramModel {
        self.runner_with(&self.config())
    }

    pub fn runner_with(&self, config: &SimilarityConfig) -> DiagramModel {
        DiagramModel::from_config(config, self.cache_dir(), NeuriteType::BasalDendrite)
            .expect("Failed to build runner")
    }

    /// Register an embedding model whose artifact holds `vectors`.
    pub fn push_model_with(&self, vectors: &BTreeMap<EntityKey, FeatureVector>) -> Entity {
        let path = self.dir.path().join("artifacts").join("model.json");
        VectorArtifact::new(None, vectors)
            .save(&path, VectorEncoding::Plain)
            .unwrap();
        neurosim::push_model(self.store().as_ref(), &ModelDescription::new(MODEL_NAME, "model"), &path)
            .unwrap()
    }

    /// Entities of `entity_type` carrying `tag`.
    pub fn tagged(&self, entity_type: EntityType, tag: &str) -> Vec<Entity> {
        self.store()
            .search_tagged(&EntityFilter::of_type(entity_type), tag)
            .unwrap()
    }

    /// Latest non-deprecated entities of `entity_type`.
    pub fn all_of(&self, entity_type: EntityType) -> Vec<Entity> {
        self.store()
            .search(&EntityFilter::of_type(entity_type).active())
            .unwrap()
    }
}

/// Diagrams of four distinct morphologies.
pub fn four_diagrams(keys: &[EntityKey]) -> Vec<(EntityKey, Vec<Vec<f64>>)> {
    let diagrams = vec![
        vec![vec![0.0, 1.0], vec![2.0, 5.0]],
        vec![vec![1.0, 1.5]],
        vec![vec![0.0, 3.0], vec![1.0, 4.0], vec![0.5, 0.75]],
        vec![vec![3.0, 5.0], vec![0.0, 2.0]],
    ];
    keys.iter().cloned().zip(diagrams).collect()
}

/// Pinned reference to a registered model.
pub fn model_ref(model: &Entity) -> EntityRef {
    EntityRef::pinned(model.id.clone(), model.rev().unwrap(), EntityType::EmbeddingModel.as_str())
}

/// Value of a boosting factor entity.
pub fn factor_value(entity: &Entity) -> f64 {
    match &entity.body {
        EntityBody::BoostingFactor { value, .. } => *value,
        other => panic!("not a boosting factor: {:?}", other),
    }
}
