//! Boosting and Statistics Tests
//!
//! Stages E through K over embeddings registered directly, so each test
//! controls the exact vectors behind the views.

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::*;

/// Register `vectors` as embeddings, create the similarity views, and
/// return (tag, aggregated similarity view).
fn embed(test: &TestDeployment, vectors: &BTreeMap<EntityKey, FeatureVector>) -> (String, String) {
    let model = test.push_model_with(vectors);
    let registry = EmbeddingRegistry::new(test.store(), test.store());
    let (tag, dimension) = registry
        .register_batch(vectors, &model_ref(&model), "emb")
        .unwrap();

    let pipeline = test.pipeline();
    let view = pipeline
        .register_similarity_view(&test.bucket, &tag, dimension)
        .unwrap();
    let aggregated = pipeline
        .register_aggregated_similarity_view(&test.bucket, &[ViewRef::new(test.bucket.clone(), view)])
        .unwrap();
    (tag, aggregated)
}

fn corpus(test: &TestDeployment, vectors: Vec<FeatureVector>) -> BTreeMap<EntityKey, FeatureVector> {
    let ids: Vec<String> = (0..vectors.len()).map(|i| format!("urn:morph:{}", i)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    test.seed_sources(&refs).into_iter().zip(vectors).collect()
}

#[test]
fn identical_vectors_have_unit_boosting_factors() {
    let test = TestDeployment::new();
    let vectors = corpus(&test, vec![vec![0.25, 0.75, 0.5]; 5]);
    let (tag, aggregated) = embed(&test, &vectors);
    let pipeline = test.pipeline();

    let stats = pipeline
        .register_non_boosted_stats(&test.bucket, &aggregated, &tag)
        .unwrap();
    let boosting_tag = pipeline
        .register_boosting_factors(&test.bucket, &test.bucket, &stats, &aggregated, &tag)
        .unwrap();

    let factors = test.tagged(EntityType::SimilarityBoostingFactor, &boosting_tag);
    assert_eq!(factors.len(), 5);
    for factor in &factors {
        assert_eq!(factor_value(factor), 1.0);
    }
}

#[test]
fn random_corpus_factors_at_least_one_and_boost_scores() {
    let test = TestDeployment::new();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let vectors: Vec<FeatureVector> = (0..12)
        .map(|_| (0..6).map(|_| rng.gen_range(0.0..1.0)).collect())
        .collect();
    let vectors = corpus(&test, vectors);
    let (tag, aggregated) = embed(&test, &vectors);
    let pipeline = test.pipeline();

    let plain_id = pipeline
        .register_non_boosted_stats(&test.bucket, &aggregated, &tag)
        .unwrap();
    pipeline
        .register_boosting_factors(&test.bucket, &test.bucket, &plain_id, &aggregated, &tag)
        .unwrap();

    let factors = test.tagged(EntityType::SimilarityBoostingFactor, &tag);
    assert_eq!(factors.len(), 12);
    assert!(factors.iter().all(|f| factor_value(f) >= 1.0));
    assert!(factors.iter().any(|f| factor_value(f) > 1.0));

    let boosting_view = pipeline.register_boosting_view(&test.bucket, &tag).unwrap();
    let aggregated_boosting = pipeline
        .register_aggregated_boosting_view(&test.bucket, &[ViewRef::new(test.bucket.clone(), boosting_view)])
        .unwrap();
    let boosted_id = pipeline
        .register_boosted_stats(&test.bucket, &aggregated, &aggregated_boosting, &tag)
        .unwrap();
    assert_ne!(plain_id, boosted_id);

    let plain = neurosim::fetch_stats(test.store().as_ref(), &plain_id).unwrap().unwrap();
    let boosted = neurosim::fetch_stats(test.store().as_ref(), &boosted_id).unwrap().unwrap();
    // 12 documents, 11 non-self neighbors each
    assert_eq!(plain.count, 132);
    assert_eq!(boosted.count, 132);
    assert!(boosted.max >= plain.max);
    assert!(boosted.mean > plain.mean);
}

#[test]
fn single_vector_corpus_has_empty_statistics() {
    let test = TestDeployment::new();
    let vectors = corpus(&test, vec![vec![1.0, 0.0]]);
    let (tag, aggregated) = embed(&test, &vectors);

    let id = test
        .pipeline()
        .register_non_boosted_stats(&test.bucket, &aggregated, &tag)
        .unwrap();

    let stat = neurosim::fetch_stats(test.store().as_ref(), &id).unwrap().unwrap();
    assert_eq!(stat.count, 0);
    assert!(stat.is_empty());
}

#[test]
fn stats_rerun_updates_same_entity() {
    let test = TestDeployment::new();
    let vectors = corpus(&test, vec![vec![0.0, 0.0], vec![3.0, 4.0]]);
    let (tag, aggregated) = embed(&test, &vectors);
    let pipeline = test.pipeline();

    let first = pipeline
        .register_non_boosted_stats(&test.bucket, &aggregated, &tag)
        .unwrap();
    let second = pipeline
        .register_non_boosted_stats(&test.bucket, &aggregated, &tag)
        .unwrap();
    assert_eq!(first, second);

    let stat = neurosim::fetch_stats(test.store().as_ref(), &first).unwrap().unwrap();
    assert_eq!(stat.count, 2);
    // Euclidean distance 5 both ways
    assert_relative_eq!(stat.mean, 1.0 / 6.0);
    assert_relative_eq!(stat.std, 0.0);
    assert_eq!(test.all_of(EntityType::ElasticSearchViewStatistics).len(), 1);
}
