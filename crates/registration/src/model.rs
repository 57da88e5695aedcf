//! Embedding model registration
//!
//! A model is found by name among non-deprecated `EmbeddingModel`
//! entities. Re-registering an existing model attaches the new artifact
//! and dimension as a new revision of the same entity.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use neurosim_core::{
    Distribution, Entity, EntityBody, EntityStore, EntityType, Generation, Revision,
    SimilarityError, SimilarityResult,
};
use neurosim_vectorize::artifact::{COMPRESSED_EXTENSION, JSON_EXTENSION};
use neurosim_vectorize::VectorArtifact;

use crate::agents;
use crate::fetch::fetch_by_name;
use crate::persist::{persist_batch, PersistAction};

/// Content type of compressed artifacts
pub const COMPRESSED_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type of JSON vector maps
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// What to register a model as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Model name, the lookup key
    pub name: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Base file name of the model's artifacts
    pub filename: String,
    /// Preferred label
    #[serde(default)]
    pub label: String,
    /// Similarity metric name
    #[serde(default = "default_distance")]
    pub distance: String,
    /// Model revision to use when reading the model back, latest if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
}

fn default_distance() -> String {
    "euclidean".to_string()
}

impl ModelDescription {
    /// Description with default label, metric and revision
    pub fn new(name: impl Into<String>, filename: impl Into<String>) -> Self {
        let name = name.into();
        ModelDescription {
            label: name.clone(),
            name,
            description: String::new(),
            filename: filename.into(),
            distance: default_distance(),
            rev: None,
        }
    }
}

/// The model called `name`, at `rev` when given
pub fn fetch_model(
    store: &dyn EntityStore,
    name: &str,
    rev: Option<Revision>,
) -> SimilarityResult<Option<Entity>> {
    fetch_by_name(store, EntityType::EmbeddingModel, name, rev, "embedding model")
}

/// Like [`fetch_model`], but a missing model is an error
pub fn require_model(
    store: &dyn EntityStore,
    name: &str,
    rev: Option<Revision>,
) -> SimilarityResult<Entity> {
    fetch_model(store, name, rev)?.ok_or_else(|| SimilarityError::EntityNotFound {
        id: match rev {
            Some(rev) => format!("{}?rev={}", name, rev),
            None => name.to_string(),
        },
    })
}

fn content_type(path: &Path) -> SimilarityResult<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(JSON_EXTENSION) => Ok(JSON_CONTENT_TYPE),
        Some(COMPRESSED_EXTENSION) => Ok(COMPRESSED_CONTENT_TYPE),
        _ => Err(SimilarityError::InvalidConfig(format!(
            "Unsupported artifact file '{}'",
            path.display()
        ))),
    }
}

/// Create or update the model entity for `description`, attaching the artifact
///
/// The vector dimension is read from the artifact. Returns the persisted
/// model.
pub fn push_model(
    store: &dyn EntityStore,
    description: &ModelDescription,
    artifact_path: &Path,
) -> SimilarityResult<Entity> {
    let content_type = content_type(artifact_path)?;
    let artifact = VectorArtifact::load(artifact_path)?;
    let vector_dimension = artifact.vector_dimension().ok_or_else(|| SimilarityError::EmptyBatch {
        what: "model artifact".to_string(),
    })?;

    let distribution = Distribution {
        name: artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| description.filename.clone()),
        content_type: content_type.to_string(),
        content_url: artifact_path.to_path_buf(),
    };
    let generation = Generation {
        used: Vec::new(),
        was_associated_with: agents::was_associated_with(content_type == COMPRESSED_CONTENT_TYPE),
    };

    let (mut batch, action) = match fetch_model(store, &description.name, None)? {
        Some(mut model) => {
            if let EntityBody::Model {
                vector_dimension: dim,
                distribution: dist,
                ..
            } = &mut model.body
            {
                *dim = vector_dimension;
                *dist = Some(distribution);
            }
            model.generation = Some(generation);
            (vec![model], PersistAction::Update)
        }
        None => {
            let mut model = Entity::new(
                store.bucket().mint_id(),
                EntityType::EmbeddingModel.as_str(),
                EntityBody::Model {
                    description: description.description.clone(),
                    pref_label: description.label.clone(),
                    similarity: description.distance.clone(),
                    vector_dimension,
                    distribution: Some(distribution),
                },
            )
            .with_name(description.name.clone());
            model.generation = Some(generation);
            (vec![model], PersistAction::Create)
        }
    };

    persist_batch(store, &mut batch, action, None, "embedding models")?;
    let model = batch.swap_remove(0);
    info!(
        target: "neurosim::registry",
        model = %model.id,
        rev = ?model.rev(),
        vector_dimension,
        "Registered embedding model"
    );
    Ok(model)
}
