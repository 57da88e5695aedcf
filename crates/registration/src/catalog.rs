//! Catalog of one embedding model across buckets

use tracing::info;

use neurosim_core::{
    Bucket, CatalogPart, Entity, EntityBody, EntityRef, EntityStore, EntityType, Revision,
    SimilarityResult, StoreProvider,
};

use crate::fetch::fetch_by_name;
use crate::model::require_model;
use crate::persist::{persist_batch, PersistAction};

/// Name of the catalog of `model_name`
pub fn catalog_name(model_name: &str) -> String {
    format!("Catalog of {} models", model_name)
}

/// One part per bucket: the model called `model_name` in that bucket
///
/// A bucket without that model (at the requested revision) is an error.
/// The same model revision listed twice yields one part.
pub fn build_has_part(
    provider: &dyn StoreProvider,
    model_name: &str,
    buckets: &[(Bucket, Option<Revision>)],
) -> SimilarityResult<Vec<CatalogPart>> {
    let mut parts: Vec<CatalogPart> = Vec::with_capacity(buckets.len());
    for (bucket, rev) in buckets {
        let store = provider.store(bucket)?;
        let model = require_model(store.as_ref(), model_name, *rev)?;
        let model_ref = EntityRef {
            id: model.id.clone(),
            rev: model.rev(),
            entity_type: EntityType::EmbeddingModel.as_str().to_string(),
        };
        if parts.iter().any(|p| p.model.id == model_ref.id && p.model.rev == model_ref.rev) {
            continue;
        }
        parts.push(CatalogPart {
            model: model_ref,
            bucket: bucket.clone(),
        });
    }
    Ok(parts)
}

/// Create or update the catalog of `model_name` in `store`
pub fn push_catalog(
    store: &dyn EntityStore,
    provider: &dyn StoreProvider,
    model_name: &str,
    buckets: &[(Bucket, Option<Revision>)],
    target_type: &str,
) -> SimilarityResult<Entity> {
    let name = catalog_name(model_name);
    let has_part = build_has_part(provider, model_name, buckets)?;
    let parts = has_part.len();
    let body = EntityBody::Catalog {
        about: EntityType::EmbeddingModel.as_str().to_string(),
        pref_label: name.clone(),
        target_type: target_type.to_string(),
        has_part,
    };

    let existing = fetch_by_name(
        store,
        EntityType::EmbeddingModelDataCatalog,
        &name,
        None,
        "embedding model catalog",
    )?;
    let (mut batch, action) = match existing {
        Some(mut catalog) => {
            catalog.body = body;
            (vec![catalog], PersistAction::Update)
        }
        None => {
            let catalog = Entity::new(
                store.bucket().mint_id(),
                EntityType::EmbeddingModelDataCatalog.as_str(),
                body,
            )
            .with_name(name);
            (vec![catalog], PersistAction::Create)
        }
    };

    persist_batch(store, &mut batch, action, None, "catalogs")?;
    let catalog = batch.swap_remove(0);
    info!(target: "neurosim::registry", catalog = %catalog.id, parts, "Registered model catalog");
    Ok(catalog)
}
