//! Collaborator contracts
//!
//! The registration layer talks to three external collaborators, all of
//! them remote in production and in-memory in tests:
//!
//! - [`EntityStore`]: revisioned, taggable entity persistence for one bucket
//! - [`ScoringIndex`]: ranked neighbor queries over indexed embeddings
//! - [`ViewService`]: creation of the views that feed scoring indexes
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync). Neighbor queries fan out across
//! a thread pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityFilter};
use crate::error::SimilarityResult;
use crate::formula::SimilarityFormula;
use crate::types::{Bucket, EntityType, FeatureVector, Revision};

/// Outcome of one member of a bulk write or tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Entity identifier
    pub id: String,
    /// Whether the write succeeded
    pub succeeded: bool,
    /// Error message when it didn't
    pub error: Option<String>,
}

impl ActionResult {
    /// Successful outcome
    pub fn ok(id: impl Into<String>) -> Self {
        ActionResult {
            id: id.into(),
            succeeded: true,
            error: None,
        }
    }

    /// Failed outcome
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        ActionResult {
            id: id.into(),
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

/// Entity persistence for one bucket
///
/// Writes are bulk and report one [`ActionResult`] per member, in input
/// order. An `Err` from any method means the store itself failed (remote
/// failure); per-member failures are reported through the results.
///
/// There is no compare-and-set on create: two writers that both find
/// nothing and both register will produce two entities.
pub trait EntityStore: Send + Sync {
    /// The bucket this store writes to
    fn bucket(&self) -> &Bucket;

    /// All current entities matching the filter
    fn search(&self, filter: &EntityFilter) -> SimilarityResult<Vec<Entity>>;

    /// Entities matching the filter, as they were when `tag` was applied
    ///
    /// Only entities carrying the tag are returned.
    fn search_tagged(&self, filter: &EntityFilter, tag: &str) -> SimilarityResult<Vec<Entity>>;

    /// Retrieve an entity, at a given revision or the latest one
    ///
    /// Returns `Ok(None)` if the entity or revision doesn't exist.
    fn retrieve(&self, id: &str, rev: Option<Revision>) -> SimilarityResult<Option<Entity>>;

    /// Retrieve an entity at the revision a tag points to
    fn retrieve_tagged(&self, id: &str, tag: &str) -> SimilarityResult<Option<Entity>>;

    /// Create new entities
    ///
    /// Successful members get their store metadata set in place.
    fn register(&self, entities: &mut [Entity]) -> SimilarityResult<Vec<ActionResult>>;

    /// Write new content for existing entities
    ///
    /// Each member must carry the revision it was read at; successful
    /// members get the new revision set in place.
    fn update(&self, entities: &mut [Entity]) -> SimilarityResult<Vec<ActionResult>>;

    /// Point `tag` at the current revision of every member
    ///
    /// Re-applying a tag moves it; other tags are untouched.
    fn tag(&self, entities: &[Entity], tag: &str) -> SimilarityResult<Vec<ActionResult>>;

    /// Fetch a file attached to an entity into `dir`
    ///
    /// `field` names the attachment; only [`DISTRIBUTION_FIELD`] is defined.
    fn download(&self, entity: &Entity, field: &str, dir: &Path) -> SimilarityResult<PathBuf>;
}

/// Field name of the model artifact attachment
pub const DISTRIBUTION_FIELD: &str = "distribution";

/// Hands out stores for buckets of one deployment
pub trait StoreProvider: Send + Sync {
    /// Store for the given bucket
    fn store(&self, bucket: &Bucket) -> SimilarityResult<Arc<dyn EntityStore>>;
}

/// One ranked neighbor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Identifier of the matched embedding entity
    pub id: String,
    /// Score under the query formula (higher = more similar)
    pub score: f64,
}

/// One document of a scoring index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    /// Embedding entity identifier
    pub id: String,
    /// Embedding entity revision
    pub rev: Revision,
    /// Indexed vector
    pub vector: FeatureVector,
}

/// Ranked neighbor queries
///
/// Results are sorted by (score desc, id asc) and include the query's own
/// document when it is indexed. Callers exclude self-matches.
pub trait ScoringIndex: Send + Sync {
    /// At most `size` neighbors of `vector` under `formula`
    fn query(
        &self,
        vector: &[f64],
        formula: SimilarityFormula,
        size: usize,
    ) -> SimilarityResult<Vec<Neighbor>>;

    /// Every indexed document, in id order
    fn documents(&self) -> SimilarityResult<Vec<IndexedVector>>;

    /// Number of indexed documents
    fn len(&self) -> SimilarityResult<usize>;

    /// Whether nothing is indexed
    fn is_empty(&self) -> SimilarityResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Index mapping of a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ViewMapping {
    /// Dense vector field of the given dimension
    DenseVector {
        /// Vector dimension
        dimension: usize,
    },
    /// Binary-encoded vector field, for dimensions the dense mapping can't hold
    BinaryVector,
    /// Boosting factor documents
    BoostingFactor,
    /// Statistic documents
    Statistics,
}

/// Dimension from which similarity views switch to the binary mapping
pub const DENSE_VECTOR_LIMIT: usize = 4096;

impl ViewMapping {
    /// Mapping for a similarity view over vectors of `dimension`
    pub fn for_dimension(dimension: usize) -> Self {
        if dimension < DENSE_VECTOR_LIMIT {
            ViewMapping::DenseVector { dimension }
        } else {
            ViewMapping::BinaryVector
        }
    }
}

/// What a view indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    /// Type name of the indexed entities
    pub resource_type: String,
    /// Only entities carrying this tag are indexed, at the tagged revision
    pub tag: String,
    /// Index mapping
    pub mapping: ViewMapping,
}

impl ViewDefinition {
    /// Definition for one of the entity types written here
    pub fn new(resource_type: EntityType, tag: impl Into<String>, mapping: ViewMapping) -> Self {
        ViewDefinition {
            resource_type: resource_type.as_str().to_string(),
            tag: tag.into(),
            mapping,
        }
    }
}

/// A view to be aggregated, with the bucket it lives in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRef {
    /// Bucket of the view
    pub bucket: Bucket,
    /// View identifier
    pub view_id: String,
}

impl ViewRef {
    /// Reference a view
    pub fn new(bucket: Bucket, view_id: impl Into<String>) -> Self {
        ViewRef {
            bucket,
            view_id: view_id.into(),
        }
    }
}

/// View creation and access
pub trait ViewService: Send + Sync {
    /// Create (or redefine) a view in `bucket`, returning its id
    fn create_view(
        &self,
        bucket: &Bucket,
        view_id: &str,
        definition: &ViewDefinition,
    ) -> SimilarityResult<String>;

    /// Create a view over the union of other views, returning its id
    fn create_aggregated_view(
        &self,
        bucket: &Bucket,
        view_id: &str,
        views: &[ViewRef],
    ) -> SimilarityResult<String>;

    /// Every entity currently visible through a view
    fn documents(&self, view_id: &str) -> SimilarityResult<Vec<Entity>>;

    /// Scoring index over the embeddings visible through a view
    fn scoring_index(&self, view_id: &str) -> SimilarityResult<Arc<dyn ScoringIndex>>;
}
