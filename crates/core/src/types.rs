//! Identity types
//!
//! Everything crossing a component boundary is addressed by opaque identity
//! plus revision. Nothing holds direct references to remote entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{SimilarityError, SimilarityResult};

/// Store revision of an entity (1 on creation, +1 per update)
pub type Revision = u64;

/// Fixed-length numeric feature vector
pub type FeatureVector = Vec<f64>;

/// Source entity identity + revision
///
/// Textual form is `"{id}?rev={rev}"`, which is also the key format of
/// vector and diagram files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity identifier
    pub id: String,
    /// Entity revision
    pub rev: Revision,
}

impl EntityKey {
    /// Create a key from an id and revision
    pub fn new(id: impl Into<String>, rev: Revision) -> Self {
        EntityKey { id: id.into(), rev }
    }

    /// Encode as `"{id}?rev={rev}"`
    pub fn encode(&self) -> String {
        format!("{}?rev={}", self.id, self.rev)
    }

    /// Parse the textual form produced by [`EntityKey::encode`]
    pub fn parse(s: &str) -> SimilarityResult<Self> {
        let (id, query) = s.split_once('?').ok_or_else(|| {
            SimilarityError::Serialization(format!("Entity key '{}' has no revision", s))
        })?;

        let rev = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == "rev")
            .map(|(_, value)| value)
            .ok_or_else(|| {
                SimilarityError::Serialization(format!("Entity key '{}' has no rev parameter", s))
            })?;

        let rev = rev.parse::<Revision>().map_err(|e| {
            SimilarityError::Serialization(format!("Invalid revision in '{}': {}", s, e))
        })?;

        Ok(EntityKey::new(id, rev))
    }

    /// Last path segment of the id (the uuid part of a minted id)
    pub fn uuid(&self) -> &str {
        last_segment(&self.id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?rev={}", self.id, self.rev)
    }
}

/// Last `/`-separated segment of an identifier
pub fn last_segment(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// An organisation/project pair in a deployment, the unit of storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bucket {
    /// Deployment endpoint (e.g. `https://kg.example.org/v1`)
    pub endpoint: String,
    /// Organisation
    pub org: String,
    /// Project
    pub project: String,
}

impl Bucket {
    /// Create a bucket reference
    pub fn new(
        endpoint: impl Into<String>,
        org: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Bucket {
            endpoint: endpoint.into(),
            org: org.into(),
            project: project.into(),
        }
    }

    fn base(&self) -> &str {
        self.endpoint
            .trim_end_matches('/')
            .trim_end_matches("/v1")
            .trim_end_matches('/')
    }

    /// Mint a fresh resource identifier in this bucket
    pub fn mint_id(&self) -> String {
        format!(
            "{}/resources/{}/{}/_/{}",
            self.base(),
            self.org,
            self.project,
            Uuid::new_v4()
        )
    }

    /// Mint a fresh view identifier in this bucket
    pub fn mint_view_id(&self) -> String {
        format!(
            "{}/views/{}/{}/{}",
            self.base(),
            self.org,
            self.project,
            Uuid::new_v4()
        )
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.project)
    }
}

/// Entity types this system reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// Multiplicative correction for one embedding's scores
    SimilarityBoostingFactor,
    /// Registered embedding model
    EmbeddingModel,
    /// Catalog of the same model across buckets
    EmbeddingModelDataCatalog,
    /// Embedding vector of one source entity
    Embedding,
    /// Score statistics of one scoring view
    ElasticSearchViewStatistics,
}

impl EntityType {
    /// Type name as stored
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::SimilarityBoostingFactor => "SimilarityBoostingFactor",
            EntityType::EmbeddingModel => "EmbeddingModel",
            EntityType::EmbeddingModelDataCatalog => "EmbeddingModelDataCatalog",
            EntityType::Embedding => "Embedding",
            EntityType::ElasticSearchViewStatistics => "ElasticSearchViewStatistics",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
