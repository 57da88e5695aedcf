//! Pipeline Tests
//!
//! The twelve stages end to end over cached persistence diagrams, and
//! stage by stage with the stage outputs threaded by hand.

use crate::common::*;

fn seeded(test: &TestDeployment) -> Vec<EntityKey> {
    let keys = test.seed_sources(&["urn:morph:a", "urn:morph:b", "urn:morph:c", "urn:morph:d"]);
    test.write_diagrams(&four_diagrams(&keys));
    keys
}

/// Runner whose model produces nothing
struct EmptyRunner;

impl EmbeddingModelRunner for EmptyRunner {
    fn run(&self, _bucket: &Bucket) -> Result<Option<VectorArtifact>, SimilarityError> {
        Ok(None)
    }
}

// ============================================================================
// register_all
// ============================================================================

#[test]
fn register_all_registers_every_stage() {
    let test = TestDeployment::new();
    seeded(&test);
    let description = ModelDescription::new(MODEL_NAME, "tmd");

    let output = test
        .pipeline()
        .register_all(&test.runner(), &description, &test.bucket)
        .unwrap();

    assert!(output.artifact_path.exists());
    assert_eq!(output.artifact_path.extension().unwrap(), "zst");
    assert_eq!(output.dimension, 16);

    let embeddings = test.tagged(EntityType::Embedding, &output.embedding_tag);
    assert_eq!(embeddings.len(), 4);
    assert!(embeddings.iter().all(|e| e.embedding().map(Vec::len) == Some(16)));

    let factors = test.tagged(EntityType::SimilarityBoostingFactor, &output.boosting_tag);
    assert_eq!(factors.len(), 4);
    assert!(factors.iter().all(|f| factor_value(f) >= 1.0));

    let stats = test.tagged(EntityType::ElasticSearchViewStatistics, &output.embedding_tag);
    assert_eq!(stats.len(), 2);

    let plain = neurosim::fetch_stats(test.store().as_ref(), &output.non_boosted_stats)
        .unwrap()
        .unwrap();
    let boosted = neurosim::fetch_stats(test.store().as_ref(), &output.boosted_stats)
        .unwrap()
        .unwrap();
    assert_eq!(plain.count, 12);
    assert_eq!(boosted.count, 12);
    assert!(boosted.max >= plain.max);

    // similarity, boosting and stats views plus two aggregates
    assert_eq!(test.deployment.view_count(), 5);
    assert_eq!(
        test.deployment.view_members(&output.aggregated_similarity_view).unwrap(),
        vec![ViewRef::new(test.bucket.clone(), output.similarity_view.clone())]
    );
}

#[test]
fn register_all_rerun_keeps_one_entity_per_source() {
    let test = TestDeployment::new();
    seeded(&test);
    let description = ModelDescription::new(MODEL_NAME, "tmd");
    let pipeline = test.pipeline();

    let first = pipeline
        .register_all(&test.runner(), &description, &test.bucket)
        .unwrap();
    let second = pipeline
        .register_all(&test.runner(), &description, &test.bucket)
        .unwrap();

    assert_eq!(first.model_id, second.model_id);
    assert_eq!(first.catalog_id, second.catalog_id);
    assert_ne!(first.embedding_tag, second.embedding_tag);

    let model = test.all_of(EntityType::EmbeddingModel);
    assert_eq!(model.len(), 1);
    assert_eq!(model[0].rev(), Some(2));
    assert_eq!(test.all_of(EntityType::EmbeddingModelDataCatalog).len(), 1);

    assert_eq!(test.all_of(EntityType::Embedding).len(), 4);
    assert_eq!(test.all_of(EntityType::SimilarityBoostingFactor).len(), 4);
    assert!(test
        .all_of(EntityType::Embedding)
        .iter()
        .all(|e| e.rev() == Some(2)));

    // the first run's tag still resolves to revision 1
    let old = test.tagged(EntityType::Embedding, &first.embedding_tag);
    assert_eq!(old.len(), 4);
    assert!(old.iter().all(|e| e.rev() == Some(1)));
}

// ============================================================================
// Stage by stage
// ============================================================================

#[test]
fn stages_run_one_by_one_across_buckets() {
    let test = TestDeployment::new();
    seeded(&test);
    let stats_bucket = Bucket::new(ENDPOINT, "bbp", "stats");
    let pipeline = test.pipeline();
    let description = ModelDescription::new(MODEL_NAME, "tmd");

    let path = pipeline
        .save_local(&test.runner(), &description, &test.bucket)
        .unwrap()
        .unwrap();
    let model = pipeline.register_model(&test.bucket, &description, &path).unwrap();
    let catalog = pipeline
        .register_catalog(&stats_bucket, MODEL_NAME, &[(test.bucket.clone(), None)])
        .unwrap();
    assert!(catalog.id.contains("/bbp/stats/"));

    let (tag, dimension) = pipeline
        .register_embeddings(&EmbeddingRequest::new(test.bucket.clone(), MODEL_NAME))
        .unwrap();
    assert_eq!(tag, neurosim::model_tag(&model.id, 1));

    let view = pipeline
        .register_similarity_view(&test.bucket, &tag, dimension)
        .unwrap();
    let aggregated = pipeline
        .register_aggregated_similarity_view(&stats_bucket, &[ViewRef::new(test.bucket.clone(), view)])
        .unwrap();

    let plain = pipeline
        .register_non_boosted_stats(&stats_bucket, &aggregated, &tag)
        .unwrap();
    assert!(test.store().retrieve(&plain, None).unwrap().is_none());
    assert!(test.store_of(&stats_bucket).retrieve(&plain, None).unwrap().is_some());

    let boosting_tag = pipeline
        .register_boosting_factors(&test.bucket, &stats_bucket, &plain, &aggregated, &tag)
        .unwrap();
    assert_eq!(test.tagged(EntityType::SimilarityBoostingFactor, &boosting_tag).len(), 4);

    let boosting_view = pipeline.register_boosting_view(&test.bucket, &boosting_tag).unwrap();
    let aggregated_boosting = pipeline
        .register_aggregated_boosting_view(
            &stats_bucket,
            &[ViewRef::new(test.bucket.clone(), boosting_view)],
        )
        .unwrap();
    let boosted = pipeline
        .register_boosted_stats(&stats_bucket, &aggregated, &aggregated_boosting, &tag)
        .unwrap();
    assert_ne!(plain, boosted);

    let stats_view = pipeline.register_stats_view(&stats_bucket, &tag).unwrap();
    let documents = test.deployment.documents(&stats_view).unwrap();
    assert_eq!(documents.len(), 2);
}

#[test]
fn save_local_without_vectors_returns_none() {
    let test = TestDeployment::new();
    let description = ModelDescription::new(MODEL_NAME, "empty");
    let pipeline = test.pipeline();

    let saved = pipeline
        .save_local(&EmptyRunner, &description, &test.bucket)
        .unwrap();
    assert!(saved.is_none());

    let err = pipeline
        .register_all(&EmptyRunner, &description, &test.bucket)
        .unwrap_err();
    assert!(matches!(err, SimilarityError::EmptyBatch { .. }));
    assert!(test.store().is_empty());
}

#[test]
fn uncompressed_artifacts_are_json() {
    let test = TestDeployment::new();
    seeded(&test);
    let mut config = test.config();
    config.pipeline.compress_artifacts = false;
    let pipeline = test.pipeline_with(config);

    let output = pipeline
        .register_all(&test.runner(), &ModelDescription::new(MODEL_NAME, "tmd"), &test.bucket)
        .unwrap();
    assert_eq!(output.artifact_path.extension().unwrap(), "json");

    let model = test.store().retrieve(&output.model_id, None).unwrap().unwrap();
    match &model.body {
        EntityBody::Model { distribution: Some(d), .. } => {
            assert_eq!(d.content_type, "application/json")
        }
        other => panic!("not a model: {:?}", other),
    }
}

#[test]
fn configured_technique_drives_vector_length() {
    let test = TestDeployment::new();
    seeded(&test);
    let path = test.dir.path().join(neurosim::CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "[vectorization]\ntechnique = \"betti_curve\"\nnum_bins = 7\n",
    )
    .unwrap();
    let mut config = SimilarityConfig::from_file(&path).unwrap();
    assert_eq!(config.vectorization.technique, TechniqueKind::BettiCurve);
    config.pipeline.data_dir = test.dir.path().join("data");

    let output = test
        .pipeline_with(config.clone())
        .register_all(&test.runner_with(&config), &ModelDescription::new(MODEL_NAME, "betti"), &test.bucket)
        .unwrap();

    assert_eq!(output.dimension, 7);
    let embeddings = test.tagged(EntityType::Embedding, &output.embedding_tag);
    assert_eq!(embeddings.len(), 4);
    assert!(embeddings.iter().all(|e| e.embedding().map(Vec::len) == Some(7)));
}
