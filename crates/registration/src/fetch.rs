//! Single-entity lookups for find-or-create
//!
//! Find-or-create expects at most one match. More than one is a
//! consistency problem of the store (for instance two concurrent
//! registrations that both created), never an error: it is logged and the
//! first match is used.

use tracing::{info, warn};

use neurosim_core::{Entity, EntityFilter, EntityStore, EntityType, Revision, SimilarityResult};

/// The single entity matching `filter`, if any
pub fn fetch_one(
    store: &dyn EntityStore,
    filter: &EntityFilter,
    what: &str,
) -> SimilarityResult<Option<Entity>> {
    let mut found = store.search(filter)?;

    if found.is_empty() {
        info!(target: "neurosim::registry", "{} does not exist", capitalize(what));
        return Ok(None);
    }
    if found.len() > 1 {
        warn!(
            target: "neurosim::registry",
            matches = found.len(),
            "More than one {} match, returning first one",
            what
        );
    }
    Ok(Some(found.swap_remove(0)))
}

/// Non-deprecated entity of a type by exact name, optionally at a revision
///
/// The name is matched on the latest revision; a requested revision is
/// then read back from the entity's history.
pub fn fetch_by_name(
    store: &dyn EntityStore,
    entity_type: EntityType,
    name: &str,
    rev: Option<Revision>,
    what: &str,
) -> SimilarityResult<Option<Entity>> {
    let filter = EntityFilter::of_type(entity_type).named(name).active();
    let Some(latest) = fetch_one(store, &filter, what)? else {
        return Ok(None);
    };
    match rev {
        Some(rev) if latest.rev() != Some(rev) => {
            let found = store.retrieve(&latest.id, Some(rev))?;
            if found.is_none() {
                info!(target: "neurosim::registry", rev, "{} has no revision {}", capitalize(what), rev);
            }
            Ok(found)
        }
        _ => Ok(Some(latest)),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
