//! Entity records exchanged with the entity store
//!
//! An [`Entity`] is a typed record with provenance (derivation and
//! generation) and a kind-specific [`EntityBody`]. The store stamps
//! [`StoreMetadata`] on every successful write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::formula::SimilarityFormula;
use crate::types::{Bucket, EntityKey, EntityType, FeatureVector, Revision};

/// Reference to another entity, optionally pinned to a revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity identifier
    pub id: String,
    /// Pinned revision, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    /// Entity type name
    pub entity_type: String,
}

impl EntityRef {
    /// Reference pinned to a revision
    pub fn pinned(id: impl Into<String>, rev: Revision, entity_type: impl Into<String>) -> Self {
        EntityRef {
            id: id.into(),
            rev: Some(rev),
            entity_type: entity_type.into(),
        }
    }

    /// Reference without revision
    pub fn latest(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        EntityRef {
            id: id.into(),
            rev: None,
            entity_type: entity_type.into(),
        }
    }
}

/// Software that took part in producing an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwareAgent {
    /// Agent identifier
    pub id: String,
    /// Display name
    pub name: String,
}

/// Activity that generated an entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Entities used by the activity
    pub used: Vec<EntityRef>,
    /// Software agents associated with the activity
    pub was_associated_with: Vec<SoftwareAgent>,
}

/// One named statistic value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    /// Statistic name (`min`, `max`, `mean`, `standard deviation`, `N`)
    pub statistic: String,
    /// Unit code, always `dimensionless` here
    pub unit_code: String,
    /// Value
    pub value: f64,
}

/// Downloadable file attached to an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// File name
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// Location the store can fetch the bytes from
    pub content_url: PathBuf,
}

/// One entry of a model catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPart {
    /// The model in that bucket
    pub model: EntityRef,
    /// The bucket holding the model
    pub bucket: Bucket,
}

/// Kind-specific payload of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityBody {
    /// A domain entity that gets embedded (e.g. a neuron morphology)
    Source,
    /// Embedding vector
    Embedding {
        /// The vector
        vector: FeatureVector,
    },
    /// Boosting factor of one embedding
    BoostingFactor {
        /// Multiplicative factor (>= 1 when computed here)
        value: f64,
        /// Formula the factor was derived under
        formula: SimilarityFormula,
    },
    /// Score statistics of one view
    Statistics {
        /// Whether scores were multiplied by boosting factors
        boosted: bool,
        /// Formula the scores were computed under
        formula: SimilarityFormula,
        /// Statistic values
        series: Vec<SeriesEntry>,
    },
    /// Embedding model
    Model {
        /// Free-text description
        description: String,
        /// Preferred label
        pref_label: String,
        /// Similarity metric name
        similarity: String,
        /// Dimension of the vectors the model produces
        vector_dimension: usize,
        /// Attached artifact
        distribution: Option<Distribution>,
    },
    /// Catalog of one model across buckets
    Catalog {
        /// Type of the catalogued entities
        about: String,
        /// Preferred label
        pref_label: String,
        /// Type of the entities the models embed
        target_type: String,
        /// One part per bucket
        has_part: Vec<CatalogPart>,
    },
}

/// Store-assigned bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Current revision
    pub rev: Revision,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last write
    pub updated_at: DateTime<Utc>,
}

/// A stored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Identifier
    pub id: String,
    /// Type name
    pub entity_type: String,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Deprecated entities are excluded from find-or-create lookups
    #[serde(default)]
    pub deprecated: bool,
    /// Entities this one was derived from
    #[serde(default)]
    pub derivation: Vec<EntityRef>,
    /// Activity that generated this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,
    /// Payload
    pub body: EntityBody,
    /// Set by the store after a successful write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<StoreMetadata>,
}

impl Entity {
    /// A new, never-persisted entity
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>, body: EntityBody) -> Self {
        Entity {
            id: id.into(),
            entity_type: entity_type.into(),
            name: None,
            deprecated: false,
            derivation: Vec::new(),
            generation: None,
            body,
            meta: None,
        }
    }

    /// A source entity of the given domain type
    pub fn source(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Entity::new(id, entity_type, EntityBody::Source)
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Current revision, if the entity has been persisted
    pub fn rev(&self) -> Option<Revision> {
        self.meta.as_ref().map(|m| m.rev)
    }

    /// Identity + current revision, if persisted
    pub fn key(&self) -> Option<EntityKey> {
        self.rev().map(|rev| EntityKey::new(self.id.clone(), rev))
    }

    /// Whether the entity has the given type
    pub fn is_a(&self, entity_type: EntityType) -> bool {
        self.entity_type == entity_type.as_str()
    }

    /// Embedding vector, for embedding entities
    pub fn embedding(&self) -> Option<&FeatureVector> {
        match &self.body {
            EntityBody::Embedding { vector } => Some(vector),
            _ => None,
        }
    }

    /// Whether any derivation points at `id`
    pub fn derives_from(&self, id: &str) -> bool {
        self.derivation.iter().any(|d| d.id == id)
    }

    /// Whether the generating activity used `id`
    pub fn generated_using(&self, id: &str) -> bool {
        self.generation
            .as_ref()
            .map(|g| g.used.iter().any(|u| u.id == id))
            .unwrap_or(false)
    }

    /// First derivation of the given type
    pub fn derivation_of(&self, entity_type: &str) -> Option<&EntityRef> {
        self.derivation.iter().find(|d| d.entity_type == entity_type)
    }
}

/// Typed search filter
///
/// Every populated field must match. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    /// Type name
    pub entity_type: Option<String>,
    /// Exact name
    pub name: Option<String>,
    /// Deprecation flag
    pub deprecated: Option<bool>,
    /// Current revision
    pub rev: Option<Revision>,
    /// Some derivation references this id
    pub derived_from: Option<String>,
    /// The generating activity used this id
    pub generated_using: Option<String>,
    /// Boosted flag of statistic entities
    pub boosted: Option<bool>,
}

impl EntityFilter {
    /// Filter on entity type
    pub fn of_type(entity_type: EntityType) -> Self {
        EntityFilter {
            entity_type: Some(entity_type.as_str().to_string()),
            ..Default::default()
        }
    }

    /// Filter on an arbitrary type name
    pub fn of_type_name(entity_type: impl Into<String>) -> Self {
        EntityFilter {
            entity_type: Some(entity_type.into()),
            ..Default::default()
        }
    }

    /// Also require this name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Only non-deprecated entities
    pub fn active(mut self) -> Self {
        self.deprecated = Some(false);
        self
    }

    /// Also require this current revision
    pub fn at_rev(mut self, rev: Revision) -> Self {
        self.rev = Some(rev);
        self
    }

    /// Also require a derivation from this id
    pub fn derived_from(mut self, id: impl Into<String>) -> Self {
        self.derived_from = Some(id.into());
        self
    }

    /// Also require generation from this id
    pub fn generated_using(mut self, id: impl Into<String>) -> Self {
        self.generated_using = Some(id.into());
        self
    }

    /// Also require this boosted flag
    pub fn boosted(mut self, boosted: bool) -> Self {
        self.boosted = Some(boosted);
        self
    }

    /// Check an entity against the filter
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(t) = &self.entity_type {
            if &entity.entity_type != t {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if entity.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(deprecated) = self.deprecated {
            if entity.deprecated != deprecated {
                return false;
            }
        }
        if let Some(rev) = self.rev {
            if entity.rev() != Some(rev) {
                return false;
            }
        }
        if let Some(id) = &self.derived_from {
            if !entity.derives_from(id) {
                return false;
            }
        }
        if let Some(id) = &self.generated_using {
            if !entity.generated_using(id) {
                return false;
            }
        }
        if let Some(boosted) = self.boosted {
            match &entity.body {
                EntityBody::Statistics { boosted: b, .. } if *b == boosted => {}
                _ => return false,
            }
        }
        true
    }
}
