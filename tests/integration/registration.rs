//! Embedding Registration Tests
//!
//! Find-or-create by (source entity, model) identity, tag-after-write,
//! and subset registration.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::*;

fn one_vector(key: &EntityKey, v: Vec<f64>) -> BTreeMap<EntityKey, FeatureVector> {
    let mut vectors = BTreeMap::new();
    vectors.insert(key.clone(), v);
    vectors
}

// ============================================================================
// Idempotence and tags
// ============================================================================

#[test]
fn same_vector_twice_gives_one_embedding() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a"]);
    let vectors = one_vector(&keys[0], vec![0.1, 0.2, 0.3]);
    let model = test.push_model_with(&vectors);

    let registry = EmbeddingRegistry::new(test.store(), test.store());
    registry.register_batch(&vectors, &model_ref(&model), "t").unwrap();
    registry.register_batch(&vectors, &model_ref(&model), "t").unwrap();

    assert_eq!(test.all_of(EntityType::Embedding).len(), 1);
}

#[test]
fn embedding_discoverable_under_both_tags() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a"]);
    let vectors = one_vector(&keys[0], vec![0.5, 0.5]);
    let model = test.push_model_with(&vectors);

    let registry = EmbeddingRegistry::new(test.store(), test.store());
    registry.register_batch(&vectors, &model_ref(&model), "t1").unwrap();
    registry.register_batch(&vectors, &model_ref(&model), "t2").unwrap();

    let all = test.all_of(EntityType::Embedding);
    assert_eq!(all.len(), 1);

    let under_t1 = test.tagged(EntityType::Embedding, "t1");
    let under_t2 = test.tagged(EntityType::Embedding, "t2");
    assert_eq!(under_t1.len(), 1);
    assert_eq!(under_t2.len(), 1);
    assert_eq!(under_t1[0].id, all[0].id);
    assert_eq!(under_t2[0].id, all[0].id);
    assert_eq!(under_t1[0].rev(), Some(1));
    assert_eq!(under_t2[0].rev(), Some(2));
}

#[test]
fn embedding_records_derivation_and_default_tag() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a", "urn:morph:b"]);
    let vectors: BTreeMap<_, _> = keys.iter().map(|k| (k.clone(), vec![1.0, 2.0])).collect();
    test.push_model_with(&vectors);

    let (tag, dimension) = test
        .pipeline()
        .register_embeddings(&EmbeddingRequest::new(test.bucket.clone(), MODEL_NAME))
        .unwrap();

    let model = test.all_of(EntityType::EmbeddingModel).remove(0);
    assert_eq!(tag, neurosim::model_tag(&model.id, 1));
    assert_eq!(dimension, 2);

    let embeddings = test.tagged(EntityType::Embedding, &tag);
    assert_eq!(embeddings.len(), 2);
    for embedding in &embeddings {
        let source = embedding.derivation_of(SOURCE_TYPE).unwrap();
        assert_eq!(source.rev, Some(1));
        assert!(embedding.generated_using(&model.id));
        let name = embedding.name.as_deref().unwrap();
        assert!(name.starts_with("Embedding of urn:morph:"));
        assert!(name.ends_with(" at revision 1"));
    }
}

// ============================================================================
// Request options
// ============================================================================

#[test]
fn subset_registers_requested_entities_only() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a", "urn:morph:b", "urn:morph:c"]);
    let vectors: BTreeMap<_, _> = keys.iter().map(|k| (k.clone(), vec![0.0, 1.0])).collect();
    test.push_model_with(&vectors);

    let mut request = EmbeddingRequest::new(test.bucket.clone(), MODEL_NAME);
    request.subset = Some(vec![
        RequestedKey::any("urn:morph:b"),
        RequestedKey::pinned("urn:morph:c", 7),
    ]);
    request.tag = Some("subset".to_string());

    test.pipeline().register_embeddings(&request).unwrap();

    let embeddings = test.tagged(EntityType::Embedding, "subset");
    assert_eq!(embeddings.len(), 1);
    assert!(embeddings[0].derives_from("urn:morph:b"));
}

#[test]
fn tag_transformer_rewrites_tag() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a"]);
    test.push_model_with(&one_vector(&keys[0], vec![3.0]));

    let mut request = EmbeddingRequest::new(test.bucket.clone(), MODEL_NAME);
    request.tag = Some("base".to_string());
    request.tag_transformer = Some(Arc::new(|t: &str| format!("{}-scaled", t)));

    let (tag, _) = test.pipeline().register_embeddings(&request).unwrap();
    assert_eq!(tag, "base-scaled");
    assert_eq!(test.tagged(EntityType::Embedding, "base-scaled").len(), 1);
    assert!(test.tagged(EntityType::Embedding, "base").is_empty());
}

#[test]
fn embeddings_written_to_push_bucket() {
    let test = TestDeployment::new();
    let keys = test.seed_sources(&["urn:morph:a"]);
    test.push_model_with(&one_vector(&keys[0], vec![1.0, 1.0]));

    let push = Bucket::new(ENDPOINT, "bbp", "embeddings");
    let mut request = EmbeddingRequest::new(test.bucket.clone(), MODEL_NAME);
    request.push_bucket = push.clone();
    let (tag, _) = test.pipeline().register_embeddings(&request).unwrap();

    assert!(test.all_of(EntityType::Embedding).is_empty());
    let pushed = test
        .store_of(&push)
        .search_tagged(&EntityFilter::of_type(EntityType::Embedding), &tag)
        .unwrap();
    assert_eq!(pushed.len(), 1);
    assert!(pushed[0].id.contains("/bbp/embeddings/"));
}
