//! Revisioned in-memory entity store
//!
//! One [`MemoryStore`] holds the entities of one bucket. Every write keeps
//! the full revision history of an entity, so revision-pinned and tagged
//! reads see exactly what was written at that point.
//!
//! ## Revisions
//!
//! - `register` creates revision 1 and fails for an id that already exists.
//! - `update` requires the caller to hold the current revision and appends
//!   revision `current + 1`. A stale revision is a per-member conflict.
//! - `tag` points a label at the current revision; re-tagging moves it.
//!
//! ## Fault injection
//!
//! Tests drive the remote-failure paths with [`MemoryStore::fail_writes_for`]
//! (per-member write failures) and [`MemoryStore::set_unreachable`]
//! (every call fails).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use neurosim_core::{
    ActionResult, Bucket, Entity, EntityBody, EntityFilter, EntityStore, Revision,
    SimilarityError, SimilarityResult, StoreMetadata, DISTRIBUTION_FIELD,
};

/// All revisions of one entity plus its tags
#[derive(Debug, Default)]
struct History {
    /// `revisions[i]` is revision `i + 1`
    revisions: Vec<Entity>,
    tags: BTreeMap<String, Revision>,
}

impl History {
    fn current_rev(&self) -> Revision {
        self.revisions.len() as Revision
    }

    fn latest(&self) -> Option<&Entity> {
        self.revisions.last()
    }

    fn at(&self, rev: Revision) -> Option<&Entity> {
        if rev == 0 {
            return None;
        }
        self.revisions.get(rev as usize - 1)
    }

    fn tagged(&self, tag: &str) -> Option<&Entity> {
        self.tags.get(tag).and_then(|rev| self.at(*rev))
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    failing: BTreeSet<String>,
}

/// In-memory entity store for one bucket
#[derive(Debug)]
pub struct MemoryStore {
    bucket: Bucket,
    entities: RwLock<BTreeMap<String, History>>,
    faults: RwLock<Faults>,
}

impl MemoryStore {
    /// Empty store for `bucket`
    pub fn new(bucket: Bucket) -> Self {
        MemoryStore {
            bucket,
            entities: RwLock::new(BTreeMap::new()),
            faults: RwLock::new(Faults::default()),
        }
    }

    /// Number of entities, all types and revisions collapsed
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Whether the store holds no entity
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Number of revisions written for `id` (0 if unknown)
    pub fn revision_count(&self, id: &str) -> usize {
        self.entities
            .read()
            .get(id)
            .map(|h| h.revisions.len())
            .unwrap_or(0)
    }

    /// Tags currently applied to `id`, with the revision each points at
    pub fn tags_of(&self, id: &str) -> BTreeMap<String, Revision> {
        self.entities
            .read()
            .get(id)
            .map(|h| h.tags.clone())
            .unwrap_or_default()
    }

    /// Make every write or tag of `id` report a per-member failure
    pub fn fail_writes_for(&self, id: impl Into<String>) {
        self.faults.write().failing.insert(id.into());
    }

    /// Make every call fail as if the store were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.write().unreachable = unreachable;
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        *self.faults.write() = Faults::default();
    }

    fn check_reachable(&self) -> SimilarityResult<()> {
        if self.faults.read().unreachable {
            return Err(SimilarityError::Store(format!(
                "bucket {} is unreachable",
                self.bucket
            )));
        }
        Ok(())
    }

    fn injected_failure(&self, id: &str) -> bool {
        self.faults.read().failing.contains(id)
    }
}

impl EntityStore for MemoryStore {
    fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    fn search(&self, filter: &EntityFilter) -> SimilarityResult<Vec<Entity>> {
        self.check_reachable()?;
        Ok(self
            .entities
            .read()
            .values()
            .filter_map(History::latest)
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    fn search_tagged(&self, filter: &EntityFilter, tag: &str) -> SimilarityResult<Vec<Entity>> {
        self.check_reachable()?;
        Ok(self
            .entities
            .read()
            .values()
            .filter_map(|h| h.tagged(tag))
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    fn retrieve(&self, id: &str, rev: Option<Revision>) -> SimilarityResult<Option<Entity>> {
        self.check_reachable()?;
        let entities = self.entities.read();
        let Some(history) = entities.get(id) else {
            return Ok(None);
        };
        Ok(match rev {
            Some(rev) => history.at(rev).cloned(),
            None => history.latest().cloned(),
        })
    }

    fn retrieve_tagged(&self, id: &str, tag: &str) -> SimilarityResult<Option<Entity>> {
        self.check_reachable()?;
        Ok(self
            .entities
            .read()
            .get(id)
            .and_then(|h| h.tagged(tag))
            .cloned())
    }

    fn register(&self, entities: &mut [Entity]) -> SimilarityResult<Vec<ActionResult>> {
        self.check_reachable()?;
        let now = Utc::now();
        let mut stored = self.entities.write();
        let mut results = Vec::with_capacity(entities.len());

        for entity in entities.iter_mut() {
            if self.injected_failure(&entity.id) {
                results.push(ActionResult::failed(entity.id.as_str(), "write rejected"));
                continue;
            }
            if stored.contains_key(&entity.id) {
                results.push(ActionResult::failed(
                    entity.id.as_str(),
                    format!("resource '{}' already exists", entity.id),
                ));
                continue;
            }

            entity.meta = Some(StoreMetadata {
                rev: 1,
                created_at: now,
                updated_at: now,
            });
            stored.insert(
                entity.id.clone(),
                History {
                    revisions: vec![entity.clone()],
                    tags: BTreeMap::new(),
                },
            );
            results.push(ActionResult::ok(entity.id.as_str()));
        }

        debug!(target: "neurosim::store", bucket = %self.bucket, count = entities.len(), "register");
        Ok(results)
    }

    fn update(&self, entities: &mut [Entity]) -> SimilarityResult<Vec<ActionResult>> {
        self.check_reachable()?;
        let now = Utc::now();
        let mut stored = self.entities.write();
        let mut results = Vec::with_capacity(entities.len());

        for entity in entities.iter_mut() {
            if self.injected_failure(&entity.id) {
                results.push(ActionResult::failed(entity.id.as_str(), "write rejected"));
                continue;
            }
            let Some(history) = stored.get_mut(&entity.id) else {
                results.push(ActionResult::failed(
                    entity.id.as_str(),
                    format!("resource '{}' not found", entity.id),
                ));
                continue;
            };

            let current = history.current_rev();
            let created_at = match &entity.meta {
                Some(meta) if meta.rev == current => meta.created_at,
                Some(meta) => {
                    results.push(ActionResult::failed(
                        entity.id.as_str(),
                        format!(
                            "incorrect revision {} provided, expected {}",
                            meta.rev, current
                        ),
                    ));
                    continue;
                }
                None => {
                    results.push(ActionResult::failed(
                        entity.id.as_str(),
                        "no revision provided",
                    ));
                    continue;
                }
            };

            entity.meta = Some(StoreMetadata {
                rev: current + 1,
                created_at,
                updated_at: now,
            });
            history.revisions.push(entity.clone());
            results.push(ActionResult::ok(entity.id.as_str()));
        }

        debug!(target: "neurosim::store", bucket = %self.bucket, count = entities.len(), "update");
        Ok(results)
    }

    fn tag(&self, entities: &[Entity], tag: &str) -> SimilarityResult<Vec<ActionResult>> {
        self.check_reachable()?;
        let mut stored = self.entities.write();

        let results = entities
            .iter()
            .map(|entity| {
                if self.injected_failure(&entity.id) {
                    return ActionResult::failed(entity.id.as_str(), "tag rejected");
                }
                match stored.get_mut(&entity.id) {
                    Some(history) => {
                        let rev = history.current_rev();
                        history.tags.insert(tag.to_string(), rev);
                        ActionResult::ok(entity.id.as_str())
                    }
                    None => ActionResult::failed(
                        entity.id.as_str(),
                        format!("resource '{}' not found", entity.id),
                    ),
                }
            })
            .collect();

        debug!(target: "neurosim::store", bucket = %self.bucket, tag, count = entities.len(), "tag");
        Ok(results)
    }

    fn download(&self, entity: &Entity, field: &str, dir: &Path) -> SimilarityResult<PathBuf> {
        self.check_reachable()?;
        if field != DISTRIBUTION_FIELD {
            return Err(SimilarityError::Store(format!(
                "unknown attachment field '{}'",
                field
            )));
        }
        let distribution = match &entity.body {
            EntityBody::Model {
                distribution: Some(d),
                ..
            } => d,
            _ => {
                return Err(SimilarityError::Store(format!(
                    "entity '{}' has no {}",
                    entity.id, DISTRIBUTION_FIELD
                )))
            }
        };

        fs::create_dir_all(dir)?;
        let target = dir.join(&distribution.name);
        if !same_file(&distribution.content_url, &target) {
            fs::copy(&distribution.content_url, &target)?;
        }
        debug!(target: "neurosim::store", entity = %entity.id, path = %target.display(), "download");
        Ok(target)
    }
}

/// Whether two paths name the same existing file
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
