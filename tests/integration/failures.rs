//! Failure Tests
//!
//! Missing inputs, unreachable collaborators and partial writes. A failed
//! stage must leave nothing tagged that was not written.

use std::collections::BTreeMap;
use std::sync::Arc;

use neurosim::DiagramSource;

use crate::common::*;

/// Diagram source computing every entity but the ones listed in `broken`
struct FixedSource {
    diagrams: BTreeMap<EntityKey, Vec<Vec<f64>>>,
    broken: Vec<String>,
}

impl DiagramSource for FixedSource {
    fn entities(&self) -> Result<Vec<EntityKey>, SimilarityError> {
        Ok(self.diagrams.keys().cloned().collect())
    }

    fn compute(
        &self,
        key: &EntityKey,
        _neurite: NeuriteType,
    ) -> Result<Option<Vec<Vec<f64>>>, SimilarityError> {
        if self.broken.contains(&key.id) {
            return Ok(None);
        }
        Ok(self.diagrams.get(key).cloned())
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn recompute_without_source_is_configuration_error() {
    let test = TestDeployment::new();
    let runner = test.runner().with_recompute(true);

    let err = test
        .pipeline()
        .save_local(&runner, &ModelDescription::new(MODEL_NAME, "tmd"), &test.bucket)
        .unwrap_err();
    assert!(err.is_configuration_error());
}

#[test]
fn recompute_drops_entities_the_source_cannot_compute() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a", "urn:morph:b", "urn:morph:c", "urn:morph:d"]);
    let source = FixedSource {
        diagrams: four_diagrams(&keys).into_iter().collect(),
        broken: vec!["urn:morph:c".to_string()],
    };
    let runner = test.runner().recompute_with(Arc::new(source));

    let path = test
        .pipeline()
        .save_local(&runner, &ModelDescription::new(MODEL_NAME, "tmd"), &test.bucket)
        .unwrap()
        .unwrap();

    let vectors = VectorArtifact::load(&path).unwrap().vectors().unwrap();
    assert_eq!(vectors.len(), 3);
    assert!(vectors.keys().all(|k| k.id != "urn:morph:c"));

    // the cache was rewritten without the broken entity
    let cache = DiagramCache::for_bucket(&test.cache_dir(), NeuriteType::BasalDendrite, &test.bucket);
    assert_eq!(cache.load().unwrap().len(), 3);
}

#[test]
fn neighborhood_of_one_is_rejected() {
    let test = TestDeployment::new();
    let mut config = test.config();
    config.boosting.neighborhood_size = 1;

    let Err(err) = RegistrationPipeline::new(test.deployment.clone(), test.deployment.clone(), config)
    else {
        panic!("pipeline accepted a neighborhood of one");
    };
    assert!(err.is_configuration_error());
}

// ============================================================================
// Missing inputs
// ============================================================================

#[test]
fn boosting_factors_need_non_boosted_stats() {
    let test = TestDeployment::new();
    let missing = test.bucket.mint_id();

    let err = test
        .pipeline()
        .register_boosting_factors(&test.bucket, &test.bucket, &missing, "urn:view:none", "t")
        .unwrap_err();
    assert!(matches!(err, SimilarityError::EntityNotFound { ref id } if *id == missing));
    assert!(test.all_of(EntityType::SimilarityBoostingFactor).is_empty());
}

#[test]
fn embeddings_need_a_registered_model() {
    let test = TestDeployment::new();
    test.seed_sources(&["urn:morph:a"]);

    let err = test
        .pipeline()
        .register_embeddings(&EmbeddingRequest::new(test.bucket.clone(), "missing"))
        .unwrap_err();
    assert!(matches!(err, SimilarityError::EntityNotFound { .. }));
    assert!(test.all_of(EntityType::Embedding).is_empty());
}

// ============================================================================
// Remote failures
// ============================================================================

#[test]
fn unreachable_push_store_aborts_without_tags() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a", "urn:morph:b"]);
    let vectors: BTreeMap<_, _> = keys.iter().map(|k| (k.clone(), vec![1.0, 0.0])).collect();
    test.push_model_with(&vectors);

    let push = Bucket::new(ENDPOINT, "bbp", "embeddings");
    test.store_of(&push).set_unreachable(true);
    let mut request = EmbeddingRequest::new(test.bucket.clone(), MODEL_NAME);
    request.push_bucket = push.clone();
    request.tag = Some("down".to_string());

    let err = test.pipeline().register_embeddings(&request).unwrap_err();
    assert!(err.is_remote_failure());

    test.store_of(&push).clear_faults();
    let tagged = test
        .store_of(&push)
        .search_tagged(&EntityFilter::of_type(EntityType::Embedding), "down")
        .unwrap();
    assert!(tagged.is_empty());
    assert!(test.store_of(&push).is_empty());
}

#[test]
fn unreachable_index_fails_view_stages() {
    let test = TestDeployment::new();
    test.deployment.set_index_unreachable(true);
    let pipeline = test.pipeline();

    let err = pipeline
        .register_similarity_view(&test.bucket, "t", 16)
        .unwrap_err();
    assert!(err.is_remote_failure());

    let err = pipeline
        .register_non_boosted_stats(&test.bucket, "urn:view:any", "t")
        .unwrap_err();
    assert!(matches!(err, SimilarityError::Index(_)));
    assert!(test.all_of(EntityType::ElasticSearchViewStatistics).is_empty());
}

#[test]
fn partial_write_failure_tags_written_members_only() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a", "urn:morph:b"]);
    let vectors: BTreeMap<_, _> = keys
        .iter()
        .zip([vec![0.0, 1.0], vec![1.0, 0.0]])
        .map(|(k, v)| (k.clone(), v))
        .collect();
    let model = test.push_model_with(&vectors);
    let registry = EmbeddingRegistry::new(test.store(), test.store());
    registry.register_batch(&vectors, &model_ref(&model), "v1").unwrap();

    let rejected = registry
        .find_existing("urn:morph:b", &model.id)
        .unwrap()
        .unwrap();
    test.store().fail_writes_for(rejected.id.clone());

    let err = registry
        .register_batch(&vectors, &model_ref(&model), "v2")
        .unwrap_err();
    assert!(matches!(err, SimilarityError::PersistFailed { failed: 1, .. }));
    assert!(err.is_remote_failure());

    let under_v2 = test.tagged(EntityType::Embedding, "v2");
    assert_eq!(under_v2.len(), 1);
    assert!(under_v2[0].derives_from("urn:morph:a"));
    assert!(!test.store().tags_of(&rejected.id).contains_key("v2"));
    assert_eq!(test.store().revision_count(&rejected.id), 1);
}
