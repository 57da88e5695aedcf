//! Persistence diagram store
//!
//! Diagrams move through `Raw → Validated → (optionally) Scaled`:
//!
//! - [`DiagramStore::from_raw`] drops every diagram whose points are not all
//!   (birth, death) pairs. A dropped diagram is logged and excluded, never
//!   fatal.
//! - [`DiagramStore::scaled`] applies a [`ScalingPolicy`]. Min-max scaling
//!   maps each diagram's own (min, max) range to [0, 1] independently.
//!
//! [`DiagramCache`] persists raw diagrams keyed by entity identity and
//! revision, and recomputes them through a [`DiagramSource`] on request.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use neurosim_core::{Bucket, EntityKey, SimilarityError, SimilarityResult};

/// Diagram as read from a cache or a source: points of any length
pub type RawDiagram = Vec<Vec<f64>>;

/// Validated diagram: (birth, death) pairs
pub type Diagram = Vec<[f64; 2]>;

/// Check that every point is a finite (birth, death) pair
///
/// An empty diagram is rejected as well: it has nothing to vectorize.
pub fn validate(key: &EntityKey, raw: &[Vec<f64>]) -> SimilarityResult<Diagram> {
    if raw.is_empty() {
        return Err(SimilarityError::EmptyDiagram { key: key.encode() });
    }

    raw.iter()
        .enumerate()
        .map(|(i, point)| match point.as_slice() {
            [b, d] if b.is_finite() && d.is_finite() => Ok([*b, *d]),
            [_, _] => Err(SimilarityError::MalformedDiagram {
                key: key.encode(),
                reason: format!("point {} is not finite", i),
            }),
            other => Err(SimilarityError::MalformedDiagram {
                key: key.encode(),
                reason: format!("point {} has {} components, expected 2", i, other.len()),
            }),
        })
        .collect()
}

/// Per-diagram rescaling applied before vectorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingPolicy {
    /// Keep original filtration values
    #[default]
    Unscaled,
    /// Map each diagram's own (min, max) to [0, 1]
    MinMax,
}

/// Map a diagram's own value range onto [0, 1]
///
/// A diagram whose values are all equal maps to zeros.
pub fn scale_min_max(diagram: &[[f64; 2]]) -> Diagram {
    let (lo, hi) = diagram
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let range = hi - lo;

    if range > 0.0 {
        diagram
            .iter()
            .map(|[b, d]| [(b - lo) / range, (d - lo) / range])
            .collect()
    } else {
        vec![[0.0, 0.0]; diagram.len()]
    }
}

/// Validated (and optionally scaled) diagrams of a corpus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagramStore {
    diagrams: BTreeMap<EntityKey, Diagram>,
    scaling: ScalingPolicy,
}

impl DiagramStore {
    /// Validate raw diagrams, dropping the malformed ones
    pub fn from_raw(raw: BTreeMap<EntityKey, RawDiagram>) -> Self {
        let total = raw.len();
        let diagrams: BTreeMap<EntityKey, Diagram> = raw
            .into_iter()
            .filter_map(|(key, diagram)| match validate(&key, &diagram) {
                Ok(valid) => Some((key, valid)),
                Err(e) => {
                    warn!(target: "neurosim::vectorize", entity = %key, error = %e, "Dropping diagram");
                    None
                }
            })
            .collect();

        info!(
            target: "neurosim::vectorize",
            kept = diagrams.len(),
            dropped = total - diagrams.len(),
            "Validated persistence diagrams"
        );

        DiagramStore {
            diagrams,
            scaling: ScalingPolicy::Unscaled,
        }
    }

    /// Apply a scaling policy
    ///
    /// Scaling an already scaled store is a no-op.
    pub fn scaled(self, policy: ScalingPolicy) -> Self {
        if policy == ScalingPolicy::Unscaled || self.scaling == policy {
            return self;
        }

        let diagrams = self
            .diagrams
            .into_iter()
            .map(|(key, diagram)| {
                let scaled = scale_min_max(&diagram);
                if !diagram.is_empty() && scaled.iter().flatten().all(|v| *v == 0.0) {
                    warn!(target: "neurosim::vectorize", entity = %key, "Diagram has a zero value range");
                }
                (key, scaled)
            })
            .collect();

        DiagramStore {
            diagrams,
            scaling: policy,
        }
    }

    /// Scaling applied so far
    pub fn scaling(&self) -> ScalingPolicy {
        self.scaling
    }

    /// Validated diagrams by entity key
    pub fn diagrams(&self) -> &BTreeMap<EntityKey, Diagram> {
        &self.diagrams
    }

    /// One diagram
    pub fn get(&self, key: &EntityKey) -> Option<&Diagram> {
        self.diagrams.get(key)
    }

    /// Number of diagrams
    pub fn len(&self) -> usize {
        self.diagrams.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.diagrams.is_empty()
    }

    /// Iterate over (key, diagram)
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &Diagram)> {
        self.diagrams.iter()
    }

    /// Largest value across every diagram, if any
    pub fn max_value(&self) -> Option<f64> {
        self.diagrams
            .values()
            .flatten()
            .flatten()
            .cloned()
            .reduce(f64::max)
    }
}

/// Anatomical compartment a diagram is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuriteType {
    /// Basal dendrites
    BasalDendrite,
    /// Apical dendrites
    ApicalDendrite,
    /// Axon
    Axon,
}

impl NeuriteType {
    /// Name used in file names
    pub fn as_str(&self) -> &'static str {
        match self {
            NeuriteType::BasalDendrite => "basal_dendrite",
            NeuriteType::ApicalDendrite => "apical_dendrite",
            NeuriteType::Axon => "axon",
        }
    }
}

impl fmt::Display for NeuriteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes raw diagrams from source entities
///
/// Returns `None` for an entity whose diagram can't be computed (missing
/// file, unreadable morphology); that entity is dropped.
pub trait DiagramSource: Send + Sync {
    /// Entities the source can compute diagrams for
    fn entities(&self) -> SimilarityResult<Vec<EntityKey>>;

    /// Raw diagram of one entity's compartment
    fn compute(
        &self,
        key: &EntityKey,
        neurite: NeuriteType,
    ) -> SimilarityResult<Option<RawDiagram>>;
}

/// JSON cache of raw diagrams, keyed by `"{id}?rev={rev}"`
#[derive(Debug, Clone)]
pub struct DiagramCache {
    path: PathBuf,
}

impl DiagramCache {
    /// Cache at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DiagramCache { path: path.into() }
    }

    /// Cache location for one compartment of one bucket under `dir`
    pub fn for_bucket(dir: &Path, neurite: NeuriteType, bucket: &Bucket) -> Self {
        DiagramCache::new(dir.join(format!(
            "persistence_diagrams_{}_{}_{}.json",
            neurite, bucket.org, bucket.project
        )))
    }

    /// Path of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached diagrams
    ///
    /// Entries whose key can't be parsed are logged and skipped.
    pub fn load(&self) -> SimilarityResult<BTreeMap<EntityKey, RawDiagram>> {
        let content = fs::read_to_string(&self.path)?;
        let raw: BTreeMap<String, RawDiagram> = serde_json::from_str(&content)?;

        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| match EntityKey::parse(&k) {
                Ok(key) => Some((key, v)),
                Err(e) => {
                    warn!(target: "neurosim::vectorize", key = %k, error = %e, "Skipping cache entry");
                    None
                }
            })
            .collect())
    }

    /// Overwrite the cache
    pub fn save(&self, diagrams: &BTreeMap<EntityKey, RawDiagram>) -> SimilarityResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded: BTreeMap<String, &RawDiagram> =
            diagrams.iter().map(|(k, v)| (k.encode(), v)).collect();
        fs::write(&self.path, serde_json::to_vec(&encoded)?)?;
        Ok(())
    }

    /// Read the cache, or recompute it through `source` when asked to
    ///
    /// Recomputation drops the entities the source can't compute and
    /// rewrites the cache. Asking for recomputation without a source is a
    /// configuration error, raised before any work.
    pub fn load_or_compute(
        &self,
        recompute: bool,
        neurite: NeuriteType,
        source: Option<&dyn DiagramSource>,
    ) -> SimilarityResult<BTreeMap<EntityKey, RawDiagram>> {
        if !recompute {
            return self.load();
        }

        let source = source.ok_or_else(|| {
            SimilarityError::MissingCollaborator(
                "diagram source is required to recompute persistence diagrams".to_string(),
            )
        })?;

        let keys = source.entities()?;
        let mut diagrams = BTreeMap::new();
        for key in keys {
            match source.compute(&key, neurite)? {
                Some(diagram) => {
                    diagrams.insert(key, diagram);
                }
                None => {
                    warn!(target: "neurosim::vectorize", entity = %key, "No persistence diagram computed");
                }
            }
        }

        info!(
            target: "neurosim::vectorize",
            count = diagrams.len(),
            path = %self.path.display(),
            "Recomputed persistence diagrams"
        );

        self.save(&diagrams)?;
        Ok(diagrams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(id: &str) -> EntityKey {
        EntityKey::new(id, 1)
    }

    #[test]
    fn test_validate_rejects_bad_lengths() {
        assert!(validate(&key("a"), &[vec![0.0, 1.0], vec![2.0, 5.0]]).is_ok());
        let err = validate(&key("a"), &[vec![0.0, 1.0], vec![2.0, 5.0, 7.0]]).unwrap_err();
        assert!(matches!(err, SimilarityError::MalformedDiagram { .. }));
        assert!(matches!(
            validate(&key("a"), &[]).unwrap_err(),
            SimilarityError::EmptyDiagram { .. }
        ));
    }

    #[test]
    fn test_from_raw_drops_malformed() {
        let mut raw = BTreeMap::new();
        raw.insert(key("good"), vec![vec![0.0, 1.0]]);
        raw.insert(key("bad"), vec![vec![0.0]]);
        raw.insert(key("empty"), Vec::new());

        let store = DiagramStore::from_raw(raw);
        assert_eq!(store.len(), 1);
        assert!(store.get(&key("good")).is_some());
    }

    #[test]
    fn test_min_max_scaling_is_per_diagram() {
        let mut raw = BTreeMap::new();
        raw.insert(key("a"), vec![vec![0.0, 10.0], vec![5.0, 10.0]]);
        raw.insert(key("b"), vec![vec![100.0, 200.0]]);

        let store = DiagramStore::from_raw(raw).scaled(ScalingPolicy::MinMax);
        assert_eq!(store.scaling(), ScalingPolicy::MinMax);
        assert_eq!(store.get(&key("a")).unwrap(), &vec![[0.0, 1.0], [0.5, 1.0]]);
        assert_eq!(store.get(&key("b")).unwrap(), &vec![[0.0, 1.0]]);
    }

    #[test]
    fn test_scale_constant_diagram() {
        assert_eq!(scale_min_max(&[[3.0, 3.0]]), vec![[0.0, 0.0]]);
    }

    #[test]
    fn test_max_value() {
        let mut raw = BTreeMap::new();
        raw.insert(key("a"), vec![vec![0.0, 3.0]]);
        raw.insert(key("b"), vec![vec![7.0, 1.0]]);
        assert_eq!(DiagramStore::from_raw(raw).max_value(), Some(7.0));
        assert_eq!(DiagramStore::default().max_value(), None);
    }

    #[test]
    fn test_cache_path_for_bucket() {
        let bucket = Bucket::new("https://kg.example.org/v1", "bbp", "mmb");
        let cache = DiagramCache::for_bucket(Path::new("/data"), NeuriteType::Axon, &bucket);
        assert_eq!(
            cache.path(),
            Path::new("/data/persistence_diagrams_axon_bbp_mmb.json")
        );
    }

    #[test]
    fn test_cache_save_load() {
        let dir = TempDir::new().unwrap();
        let cache = DiagramCache::new(dir.path().join("nested").join("pd.json"));

        let mut raw = BTreeMap::new();
        raw.insert(EntityKey::new("urn:x", 4), vec![vec![0.0, 1.0], vec![2.0, 5.0]]);
        cache.save(&raw).unwrap();

        let content = fs::read_to_string(cache.path()).unwrap();
        assert!(content.contains("urn:x?rev=4"));
        assert_eq!(cache.load().unwrap(), raw);
    }

    struct FixedSource;

    impl DiagramSource for FixedSource {
        fn entities(&self) -> SimilarityResult<Vec<EntityKey>> {
            Ok(vec![EntityKey::new("urn:a", 1), EntityKey::new("urn:b", 2)])
        }

        fn compute(
            &self,
            key: &EntityKey,
            _neurite: NeuriteType,
        ) -> SimilarityResult<Option<RawDiagram>> {
            if key.id == "urn:a" {
                Ok(Some(vec![vec![0.0, 1.0]]))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn test_recompute_drops_failures_and_rewrites_cache() {
        let dir = TempDir::new().unwrap();
        let cache = DiagramCache::new(dir.path().join("pd.json"));

        let diagrams = cache
            .load_or_compute(true, NeuriteType::BasalDendrite, Some(&FixedSource))
            .unwrap();
        assert_eq!(diagrams.len(), 1);
        assert_eq!(cache.load().unwrap(), diagrams);
    }

    #[test]
    fn test_recompute_without_source_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let cache = DiagramCache::new(dir.path().join("pd.json"));
        let err = cache
            .load_or_compute(true, NeuriteType::Axon, None)
            .unwrap_err();
        assert!(err.is_configuration_error());
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_load_missing_cache_is_io_error() {
        let dir = TempDir::new().unwrap();
        let cache = DiagramCache::new(dir.path().join("missing.json"));
        assert!(matches!(
            cache.load_or_compute(false, NeuriteType::Axon, None),
            Err(SimilarityError::Io(_))
        ));
    }
}
