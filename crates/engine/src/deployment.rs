//! In-memory deployment: stores per bucket plus views over them
//!
//! Views are live: their documents are resolved from the stores on every
//! read, so an entity becomes visible through a view as soon as it carries
//! the view's tag, at the tagged revision.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use neurosim_core::{
    Bucket, Entity, EntityBody, EntityFilter, EntityStore, IndexedVector, ScoringIndex,
    SimilarityError, SimilarityResult, StoreProvider, ViewDefinition, ViewRef, ViewService,
};

use crate::index::BruteForceIndex;
use crate::store::MemoryStore;

/// Aggregated views may nest at most this deep
const MAX_VIEW_DEPTH: usize = 8;

#[derive(Debug, Clone)]
enum View {
    Single {
        bucket: Bucket,
        definition: ViewDefinition,
    },
    Aggregated {
        members: Vec<ViewRef>,
    },
}

/// Stores and views of one deployment
#[derive(Debug, Default)]
pub struct MemoryDeployment {
    stores: RwLock<BTreeMap<Bucket, Arc<MemoryStore>>>,
    views: RwLock<BTreeMap<String, View>>,
    index_unreachable: RwLock<bool>,
}

impl MemoryDeployment {
    /// Empty deployment
    pub fn new() -> Self {
        MemoryDeployment::default()
    }

    /// Concrete store of a bucket, created on first use
    pub fn memory_store(&self, bucket: &Bucket) -> Arc<MemoryStore> {
        if let Some(store) = self.stores.read().get(bucket) {
            return Arc::clone(store);
        }
        let mut stores = self.stores.write();
        Arc::clone(
            stores
                .entry(bucket.clone())
                .or_insert_with(|| Arc::new(MemoryStore::new(bucket.clone()))),
        )
    }

    /// Definition of a single-bucket view
    pub fn view_definition(&self, view_id: &str) -> Option<ViewDefinition> {
        match self.views.read().get(view_id) {
            Some(View::Single { definition, .. }) => Some(definition.clone()),
            _ => None,
        }
    }

    /// Members of an aggregated view
    pub fn view_members(&self, view_id: &str) -> Option<Vec<ViewRef>> {
        match self.views.read().get(view_id) {
            Some(View::Aggregated { members }) => Some(members.clone()),
            _ => None,
        }
    }

    /// Number of views defined
    pub fn view_count(&self) -> usize {
        self.views.read().len()
    }

    /// Make every view read fail as if the index were down
    pub fn set_index_unreachable(&self, unreachable: bool) {
        *self.index_unreachable.write() = unreachable;
    }

    fn check_index(&self) -> SimilarityResult<()> {
        if *self.index_unreachable.read() {
            return Err(SimilarityError::Index("index is unreachable".to_string()));
        }
        Ok(())
    }

    fn collect(&self, view_id: &str, depth: usize, out: &mut Vec<Entity>) -> SimilarityResult<()> {
        if depth > MAX_VIEW_DEPTH {
            return Err(SimilarityError::Index(format!(
                "view '{}' nests deeper than {} levels",
                view_id, MAX_VIEW_DEPTH
            )));
        }
        let view = self
            .views
            .read()
            .get(view_id)
            .cloned()
            .ok_or_else(|| SimilarityError::Index(format!("unknown view '{}'", view_id)))?;

        match view {
            View::Single { bucket, definition } => {
                let filter = EntityFilter::of_type_name(definition.resource_type).active();
                out.extend(self.memory_store(&bucket).search_tagged(&filter, &definition.tag)?);
            }
            View::Aggregated { members } => {
                for member in &members {
                    self.collect(&member.view_id, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}

impl StoreProvider for MemoryDeployment {
    fn store(&self, bucket: &Bucket) -> SimilarityResult<Arc<dyn EntityStore>> {
        Ok(self.memory_store(bucket))
    }
}

impl ViewService for MemoryDeployment {
    fn create_view(
        &self,
        bucket: &Bucket,
        view_id: &str,
        definition: &ViewDefinition,
    ) -> SimilarityResult<String> {
        self.check_index()?;
        self.views.write().insert(
            view_id.to_string(),
            View::Single {
                bucket: bucket.clone(),
                definition: definition.clone(),
            },
        );
        info!(
            target: "neurosim::views",
            view = view_id,
            bucket = %bucket,
            resource_type = %definition.resource_type,
            tag = %definition.tag,
            "Created view"
        );
        Ok(view_id.to_string())
    }

    fn create_aggregated_view(
        &self,
        bucket: &Bucket,
        view_id: &str,
        views: &[ViewRef],
    ) -> SimilarityResult<String> {
        self.check_index()?;
        let mut defined = self.views.write();
        for member in views {
            if !defined.contains_key(&member.view_id) {
                return Err(SimilarityError::Index(format!(
                    "cannot aggregate unknown view '{}' of {}",
                    member.view_id, member.bucket
                )));
            }
        }
        defined.insert(
            view_id.to_string(),
            View::Aggregated {
                members: views.to_vec(),
            },
        );
        info!(target: "neurosim::views", view = view_id, bucket = %bucket, members = views.len(), "Created aggregated view");
        Ok(view_id.to_string())
    }

    fn documents(&self, view_id: &str) -> SimilarityResult<Vec<Entity>> {
        self.check_index()?;
        let mut docs = Vec::new();
        self.collect(view_id, 0, &mut docs)?;
        debug!(target: "neurosim::views", view = view_id, count = docs.len(), "Resolved view documents");
        Ok(docs)
    }

    fn scoring_index(&self, view_id: &str) -> SimilarityResult<Arc<dyn ScoringIndex>> {
        let docs = self.documents(view_id)?;
        let index = BruteForceIndex::from_documents(docs.into_iter().filter_map(|doc| {
            let rev = doc.rev().unwrap_or_default();
            match doc.body {
                EntityBody::Embedding { vector } => Some(IndexedVector {
                    id: doc.id,
                    rev,
                    vector,
                }),
                _ => None,
            }
        }))?;
        Ok(Arc::new(index))
    }
}
