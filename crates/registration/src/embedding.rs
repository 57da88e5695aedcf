//! Embedding registration
//!
//! [`EmbeddingRegistry`] owns the lifecycle of embedding entities. For each
//! vector it looks for the non-deprecated embedding derived from the same
//! (source entity, model) pair, matching on identity and ignoring
//! revisions, and either writes a new revision of it or creates a new one.
//! Created and updated embeddings are persisted as two sub-batches and
//! tagged after the write (see [`crate::persist`]).
//!
//! # Known race
//!
//! The lookup and the create are two separate calls and the store offers
//! no compare-and-set on create. Two registrations of the same pair running
//! concurrently can both find nothing and both create. Later lookups then
//! warn and use the first match.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use neurosim_core::{
    last_segment, Entity, EntityBody, EntityFilter, EntityKey, EntityRef, EntityStore, EntityType,
    FeatureVector, Generation, Revision, SimilarityError, SimilarityResult, SoftwareAgent,
};

use crate::agents;
use crate::fetch::fetch_one;
use crate::persist::{persist_batch, PersistAction};

/// Caller-supplied rewrite of the default embedding tag
pub type TagTransformer = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Default embedding tag of a model revision: `"{model uuid}?rev={rev}"`
pub fn model_tag(model_id: &str, model_rev: Revision) -> String {
    format!("{}?rev={}", last_segment(model_id), model_rev)
}

/// The tag to apply, after the optional transformation
pub fn embedding_tag(
    model_id: &str,
    model_rev: Revision,
    transformer: Option<&TagTransformer>,
) -> String {
    let tag = model_tag(model_id, model_rev);
    match transformer {
        Some(transform) => transform(&tag),
        None => tag,
    }
}

/// Name of the embedding of one source entity revision
pub fn embedding_name(key: &EntityKey) -> String {
    format!("Embedding of {} at revision {}", key.uuid(), key.rev)
}

/// Create-or-update of embedding entities
pub struct EmbeddingRegistry {
    /// Where the embedded source entities live
    data: Arc<dyn EntityStore>,
    /// Where the embeddings are written
    push: Arc<dyn EntityStore>,
    agents: Vec<SoftwareAgent>,
}

impl EmbeddingRegistry {
    /// Registry reading sources from `data` and writing embeddings to `push`
    pub fn new(data: Arc<dyn EntityStore>, push: Arc<dyn EntityStore>) -> Self {
        EmbeddingRegistry {
            data,
            push,
            agents: agents::was_associated_with(true),
        }
    }

    /// Replace the agents recorded on embedding generations
    pub fn with_agents(mut self, agents: Vec<SoftwareAgent>) -> Self {
        self.agents = agents;
        self
    }

    /// Register a batch of vectors produced by `model`, tagging them with `tag`
    ///
    /// `model` must be pinned to a revision. Returns the tag and the vector
    /// dimension, the length most vectors share. A vector whose source
    /// entity can't be retrieved, or whose dimension differs from the batch,
    /// is logged and skipped. When the batch holds several revisions of one
    /// entity, only the highest is registered.
    pub fn register_batch(
        &self,
        vectors: &BTreeMap<EntityKey, FeatureVector>,
        model: &EntityRef,
        tag: &str,
    ) -> SimilarityResult<(String, usize)> {
        let model_rev = model.rev.ok_or_else(|| {
            SimilarityError::InvalidConfig(format!(
                "Embedding model {} must be pinned to a revision",
                model.id
            ))
        })?;
        let dimension = batch_dimension(vectors).ok_or_else(|| SimilarityError::EmptyBatch {
            what: "embedding".to_string(),
        })?;

        let mut created = Vec::new();
        let mut updated = Vec::new();
        let mut skipped = 0usize;

        for (key, vector) in latest_per_entity(vectors) {
            if vector.len() != dimension {
                let e = SimilarityError::DimensionMismatch {
                    expected: dimension,
                    got: vector.len(),
                };
                error!(target: "neurosim::registry", entity = %key, error = %e, "Skipping embedding");
                skipped += 1;
                continue;
            }

            let source = match self.data.retrieve(&key.id, None)? {
                Some(source) => source,
                None => {
                    let e = SimilarityError::EntityNotFound { id: key.id.clone() };
                    error!(target: "neurosim::registry", entity = %key, error = %e, "Skipping embedding");
                    skipped += 1;
                    continue;
                }
            };

            match self.find_existing(&key.id, &model.id)? {
                Some(existing) => {
                    updated.push(self.update(existing, key, &source.entity_type, vector, &model.id, model_rev))
                }
                None => created.push(self.create(key, &source.entity_type, vector, &model.id, model_rev)),
            }
        }

        info!(
            target: "neurosim::registry",
            created = created.len(),
            updated = updated.len(),
            skipped,
            tag,
            "Prepared embeddings"
        );

        let created_result =
            persist_batch(self.push.as_ref(), &mut created, PersistAction::Create, Some(tag), "embeddings");
        let updated_result =
            persist_batch(self.push.as_ref(), &mut updated, PersistAction::Update, Some(tag), "embeddings");
        created_result?;
        updated_result?;

        Ok((tag.to_string(), dimension))
    }

    /// The embedding of `entity_id` by `model_id`, whatever their revisions
    pub fn find_existing(&self, entity_id: &str, model_id: &str) -> SimilarityResult<Option<Entity>> {
        let filter = EntityFilter::of_type(EntityType::Embedding)
            .derived_from(entity_id)
            .generated_using(model_id)
            .active();
        fetch_one(self.push.as_ref(), &filter, "embedding")
    }

    fn provenance(
        &self,
        key: &EntityKey,
        entity_type: &str,
        model_id: &str,
        model_rev: Revision,
    ) -> (Vec<EntityRef>, Generation) {
        let entity = EntityRef::pinned(key.id.clone(), key.rev, entity_type);
        let model = EntityRef::pinned(model_id, model_rev, EntityType::EmbeddingModel.as_str());
        (
            vec![entity.clone(), model.clone()],
            Generation {
                used: vec![model, entity],
                was_associated_with: self.agents.clone(),
            },
        )
    }

    fn create(
        &self,
        key: &EntityKey,
        entity_type: &str,
        vector: &FeatureVector,
        model_id: &str,
        model_rev: Revision,
    ) -> Entity {
        let (derivation, generation) = self.provenance(key, entity_type, model_id, model_rev);
        let mut embedding = Entity::new(
            self.push.bucket().mint_id(),
            EntityType::Embedding.as_str(),
            EntityBody::Embedding {
                vector: vector.clone(),
            },
        )
        .with_name(embedding_name(key));
        embedding.derivation = derivation;
        embedding.generation = Some(generation);
        embedding
    }

    fn update(
        &self,
        mut existing: Entity,
        key: &EntityKey,
        entity_type: &str,
        vector: &FeatureVector,
        model_id: &str,
        model_rev: Revision,
    ) -> Entity {
        if existing.derivation_of(entity_type).and_then(|d| d.rev) == Some(key.rev) {
            warn!(target: "neurosim::registry", entity = %key, "Rewriting embedding of an unchanged revision");
        }
        let (derivation, generation) = self.provenance(key, entity_type, model_id, model_rev);
        existing.name = Some(embedding_name(key));
        existing.body = EntityBody::Embedding {
            vector: vector.clone(),
        };
        existing.derivation = derivation;
        existing.generation = Some(generation);
        existing
    }
}

/// Length shared by most vectors of the batch
///
/// Ties go to the length of the earliest key.
fn batch_dimension(vectors: &BTreeMap<EntityKey, FeatureVector>) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for vector in vectors.values() {
        *counts.entry(vector.len()).or_default() += 1;
    }
    let most = counts.values().copied().max()?;
    vectors
        .values()
        .map(Vec::len)
        .find(|len| counts.get(len) == Some(&most))
}

/// One vector per source entity, the highest revision winning
///
/// An embedding identity ignores source revisions, so two revisions of one
/// entity in the same batch would otherwise both be created.
fn latest_per_entity(
    vectors: &BTreeMap<EntityKey, FeatureVector>,
) -> Vec<(&EntityKey, &FeatureVector)> {
    let mut latest: BTreeMap<&str, (&EntityKey, &FeatureVector)> = BTreeMap::new();
    for (key, vector) in vectors {
        match latest.get(key.id.as_str()).map(|(kept, _)| *kept) {
            Some(kept) if kept.rev >= key.rev => {
                warn!(target: "neurosim::registry", entity = %key, kept = kept.rev, "Dropping older revision from batch");
            }
            Some(kept) => {
                warn!(target: "neurosim::registry", entity = %kept, kept = key.rev, "Dropping older revision from batch");
                latest.insert(key.id.as_str(), (key, vector));
            }
            None => {
                latest.insert(key.id.as_str(), (key, vector));
            }
        }
    }
    latest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurosim_core::Bucket;
    use neurosim_engine::MemoryStore;

    const MODEL: &str = "https://kg.test/resources/org/proj/_/model-uuid";

    fn setup() -> (Arc<MemoryStore>, EmbeddingRegistry) {
        let store = Arc::new(MemoryStore::new(Bucket::new("https://kg.test/v1", "org", "proj")));
        store
            .register(&mut [
                Entity::source("urn:morph:a", "NeuronMorphology"),
                Entity::source("urn:morph:b", "NeuronMorphology"),
            ])
            .unwrap();
        let registry = EmbeddingRegistry::new(store.clone(), store.clone());
        (store, registry)
    }

    fn vectors(entries: &[(&str, Revision, Vec<f64>)]) -> BTreeMap<EntityKey, FeatureVector> {
        entries
            .iter()
            .map(|(id, rev, v)| (EntityKey::new(*id, *rev), v.clone()))
            .collect()
    }

    fn embeddings(store: &MemoryStore) -> Vec<Entity> {
        store
            .search(&EntityFilter::of_type(EntityType::Embedding))
            .unwrap()
    }

    #[test]
    fn test_model_tag() {
        assert_eq!(model_tag(MODEL, 3), "model-uuid?rev=3");
        let transformer: TagTransformer = Arc::new(|t: &str| format!("{}_2", t));
        assert_eq!(embedding_tag(MODEL, 3, Some(&transformer)), "model-uuid?rev=3_2");
        assert_eq!(embedding_tag(MODEL, 3, None), "model-uuid?rev=3");
    }

    #[test]
    fn test_register_creates_with_provenance() {
        let (store, registry) = setup();
        let model = EntityRef::pinned(MODEL, 1, EntityType::EmbeddingModel.as_str());
        let (tag, dim) = registry
            .register_batch(&vectors(&[("urn:morph:a", 1, vec![0.1, 0.2, 0.3])]), &model, "t1")
            .unwrap();

        assert_eq!(tag, "t1");
        assert_eq!(dim, 3);

        let all = embeddings(&store);
        assert_eq!(all.len(), 1);
        let e = &all[0];
        assert_eq!(e.name.as_deref(), Some("Embedding of urn:morph:a at revision 1"));
        assert_eq!(e.derivation[0], EntityRef::pinned("urn:morph:a", 1, "NeuronMorphology"));
        assert_eq!(e.derivation[1], model);
        let generation = e.generation.as_ref().unwrap();
        assert_eq!(generation.used[0], model);
        assert_eq!(generation.was_associated_with.len(), 2);
        assert!(e.id.starts_with("https://kg.test/resources/org/proj/_/"));
    }

    #[test]
    fn test_register_twice_updates_in_place() {
        let (store, registry) = setup();
        let model = EntityRef::pinned(MODEL, 1, EntityType::EmbeddingModel.as_str());
        let batch = vectors(&[("urn:morph:a", 1, vec![1.0, 0.0])]);

        registry.register_batch(&batch, &model, "t1").unwrap();
        registry.register_batch(&batch, &model, "t1").unwrap();

        let all = embeddings(&store);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].rev(), Some(2));
    }

    #[test]
    fn test_new_source_revision_updates_same_identity() {
        let (store, registry) = setup();
        let model_v1 = EntityRef::pinned(MODEL, 1, EntityType::EmbeddingModel.as_str());
        let model_v2 = EntityRef::pinned(MODEL, 2, EntityType::EmbeddingModel.as_str());

        registry
            .register_batch(&vectors(&[("urn:morph:a", 1, vec![1.0])]), &model_v1, "v1")
            .unwrap();
        registry
            .register_batch(&vectors(&[("urn:morph:a", 4, vec![2.0])]), &model_v2, "v2")
            .unwrap();

        let all = embeddings(&store);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].derivation[0].rev, Some(4));
        assert_eq!(all[0].derivation[1].rev, Some(2));
        assert_eq!(all[0].embedding(), Some(&vec![2.0]));

        let old = store.retrieve_tagged(&all[0].id, "v1").unwrap().unwrap();
        assert_eq!(old.embedding(), Some(&vec![1.0]));
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let (store, registry) = setup();
        let model = EntityRef::pinned(MODEL, 1, EntityType::EmbeddingModel.as_str());
        registry
            .register_batch(
                &vectors(&[("urn:morph:a", 1, vec![1.0]), ("urn:morph:gone", 1, vec![2.0])]),
                &model,
                "t",
            )
            .unwrap();
        assert_eq!(embeddings(&store).len(), 1);
    }

    #[test]
    fn test_mismatched_dimension_is_skipped() {
        let (store, registry) = setup();
        let model = EntityRef::pinned(MODEL, 1, EntityType::EmbeddingModel.as_str());
        let (_, dim) = registry
            .register_batch(
                &vectors(&[("urn:morph:a", 1, vec![1.0, 2.0]), ("urn:morph:b", 1, vec![2.0])]),
                &model,
                "t",
            )
            .unwrap();
        assert_eq!(dim, 2);
        assert_eq!(embeddings(&store).len(), 1);
    }

    #[test]
    fn test_odd_first_vector_does_not_set_dimension() {
        let (store, registry) = setup();
        store
            .register(&mut [Entity::source("urn:morph:c", "NeuronMorphology")])
            .unwrap();
        let model = EntityRef::pinned(MODEL, 1, EntityType::EmbeddingModel.as_str());
        let (_, dim) = registry
            .register_batch(
                &vectors(&[
                    ("urn:morph:a", 1, vec![1.0]),
                    ("urn:morph:b", 1, vec![1.0, 2.0]),
                    ("urn:morph:c", 1, vec![3.0, 4.0]),
                ]),
                &model,
                "t",
            )
            .unwrap();
        assert_eq!(dim, 2);
        let all = embeddings(&store);
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.embedding().map(Vec::len) == Some(2)));
    }

    #[test]
    fn test_batch_dimension_ties_go_to_first_key() {
        let batch = vectors(&[("urn:morph:a", 1, vec![1.0, 2.0]), ("urn:morph:b", 1, vec![2.0])]);
        assert_eq!(batch_dimension(&batch), Some(2));
        assert_eq!(batch_dimension(&BTreeMap::new()), None);
    }

    #[test]
    fn test_latest_per_entity_keeps_highest_revision() {
        let batch = vectors(&[
            ("urn:morph:a", 1, vec![1.0]),
            ("urn:morph:a", 3, vec![3.0]),
            ("urn:morph:b", 2, vec![2.0]),
        ]);
        let kept = latest_per_entity(&batch);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, &EntityKey::new("urn:morph:a", 3));
        assert_eq!(kept[0].1, &vec![3.0]);
        assert_eq!(kept[1].0, &EntityKey::new("urn:morph:b", 2));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let (_, registry) = setup();
        let model = EntityRef::pinned(MODEL, 1, EntityType::EmbeddingModel.as_str());
        let err = registry
            .register_batch(&BTreeMap::new(), &model, "t")
            .unwrap_err();
        assert!(err.is_data_error());
    }

    #[test]
    fn test_unpinned_model_rejected() {
        let (_, registry) = setup();
        let model = EntityRef::latest(MODEL, EntityType::EmbeddingModel.as_str());
        let err = registry
            .register_batch(&vectors(&[("urn:morph:a", 1, vec![1.0])]), &model, "t")
            .unwrap_err();
        assert!(err.is_configuration_error());
    }
}
