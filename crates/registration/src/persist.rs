//! Bulk persistence with tag-after-write
//!
//! Every registration step writes through [`persist_batch`]: one bulk
//! create or update per sub-batch, then a tag over the members that were
//! written. A reader filtering by tag therefore never sees a member before
//! its write was confirmed.
//!
//! A member whose write fails is logged and left untagged. The members that
//! did get written are still tagged, and the call then returns
//! [`SimilarityError::PersistFailed`] so the stage aborts.

use tracing::{error, info};

use neurosim_core::{ActionResult, Entity, EntityStore, SimilarityError, SimilarityResult};

/// Kind of bulk write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistAction {
    /// Register new entities
    Create,
    /// Write new revisions of existing entities
    Update,
}

impl PersistAction {
    fn verbs(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            PersistAction::Create => ("Creating", "Created", "create"),
            PersistAction::Update => ("Updating", "Updated", "update"),
        }
    }
}

/// Write a sub-batch, then tag what was written
///
/// Returns the number of members written. `what` names the members in logs
/// and errors ("embeddings", "boosting factors", ...).
pub fn persist_batch(
    store: &dyn EntityStore,
    entities: &mut [Entity],
    action: PersistAction,
    tag: Option<&str>,
    what: &str,
) -> SimilarityResult<usize> {
    let (doing, done, verb) = action.verbs();

    if entities.is_empty() {
        info!(target: "neurosim::registry", "No {} to {}", what, verb);
        return Ok(0);
    }

    info!(target: "neurosim::registry", count = entities.len(), "{} {}", doing, what);
    let results = match action {
        PersistAction::Create => store.register(entities)?,
        PersistAction::Update => store.update(entities)?,
    };

    let written: Vec<Entity> = entities
        .iter()
        .zip(results.iter())
        .filter(|(_, r)| r.succeeded)
        .map(|(e, _)| e.clone())
        .collect();
    let write_errors = failures(&results);

    info!(target: "neurosim::registry", count = written.len(), "{} {}", done, what);

    if let Some(tag) = tag {
        if !written.is_empty() {
            info!(target: "neurosim::registry", tag, count = written.len(), "Tagging {} {}", done.to_lowercase(), what);
            let tag_results = store.tag(&written, tag)?;
            let tag_errors = failures(&tag_results);
            if !tag_errors.is_empty() {
                for e in &tag_errors {
                    error!(target: "neurosim::registry", tag, error = %e, "Tagging failed");
                }
                return Err(SimilarityError::PersistFailed {
                    action: "tag".to_string(),
                    what: what.to_string(),
                    failed: tag_errors.len(),
                    total: written.len(),
                    errors: tag_errors,
                });
            }
        }
    }

    if !write_errors.is_empty() {
        for e in &write_errors {
            error!(target: "neurosim::registry", action = verb, error = %e, "Write failed");
        }
        return Err(SimilarityError::PersistFailed {
            action: verb.to_string(),
            what: what.to_string(),
            failed: write_errors.len(),
            total: entities.len(),
            errors: write_errors,
        });
    }

    Ok(written.len())
}

fn failures(results: &[ActionResult]) -> Vec<String> {
    results
        .iter()
        .filter(|r| !r.succeeded)
        .map(|r| match &r.error {
            Some(e) => format!("{}: {}", r.id, e),
            None => r.id.clone(),
        })
        .collect()
}
