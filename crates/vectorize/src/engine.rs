//! Vectorization engine
//!
//! Turns a corpus of validated diagrams into one feature vector per entity.
//! Vectorization is an explicit two-pass algorithm:
//!
//! 1. [`VectorizationEngine::compute_global_limits`] scans the whole corpus
//!    for extrema.
//! 2. [`VectorizationEngine::vectorize_all`] vectorizes each diagram against
//!    those extrema.
//!
//! Per-diagram limits would make vectors incomparable across entities, so
//! pass 2 never looks at a diagram's own extrema. A failure on one entity is
//! logged and the entity is omitted; the rest of the batch continues.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use neurosim_core::{EntityKey, FeatureVector, SimilarityError, SimilarityResult};

use crate::diagram::{DiagramStore, ScalingPolicy};
use crate::math;
use crate::topology::{get_limits, NativeTopology, TopologySummary};

/// Default persistence image resolution
pub const DEFAULT_RESOLUTION: usize = 100;

/// Default number of curve bins
pub const DEFAULT_NUM_BINS: usize = 500;

/// Vectorization technique and its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "technique", rename_all = "snake_case")]
pub enum VectorizationTechnique {
    /// Normalized Gaussian-KDE image, `resolution²` elements
    PersistenceImage {
        /// Grid size per axis
        resolution: usize,
    },
    /// Betti curve, `num_bins` elements
    BettiCurve {
        /// Number of bins
        num_bins: usize,
    },
    /// Life-entropy curve, `num_bins` elements
    LifeEntropyCurve {
        /// Number of bins
        num_bins: usize,
    },
    /// Legacy kernel-density vector, `dim` elements
    KernelDensity {
        /// Vector dimension
        dim: usize,
        /// Gaussian kernel width
        kernel_width: f64,
        /// Carried for compatibility, never applied
        max_height: f64,
        /// Diagram scaling applied before vectorizing
        scaling: ScalingPolicy,
    },
}

impl VectorizationTechnique {
    /// Persistence image at the default resolution
    pub fn persistence_image() -> Self {
        VectorizationTechnique::PersistenceImage {
            resolution: DEFAULT_RESOLUTION,
        }
    }

    /// Betti curve with the default bin count
    pub fn betti_curve() -> Self {
        VectorizationTechnique::BettiCurve {
            num_bins: DEFAULT_NUM_BINS,
        }
    }

    /// Life-entropy curve with the default bin count
    pub fn life_entropy_curve() -> Self {
        VectorizationTechnique::LifeEntropyCurve {
            num_bins: DEFAULT_NUM_BINS,
        }
    }

    /// Legacy vector over unscaled diagrams
    pub fn unscaled_kernel_density() -> Self {
        VectorizationTechnique::KernelDensity {
            dim: 256,
            kernel_width: 120.0,
            max_height: 17000.0,
            scaling: ScalingPolicy::Unscaled,
        }
    }

    /// Legacy vector over min-max scaled diagrams
    pub fn scaled_kernel_density() -> Self {
        VectorizationTechnique::KernelDensity {
            dim: 256,
            kernel_width: 0.02,
            max_height: 7.0,
            scaling: ScalingPolicy::MinMax,
        }
    }

    /// Diagram scaling the technique expects
    pub fn scaling(&self) -> ScalingPolicy {
        match self {
            VectorizationTechnique::KernelDensity { scaling, .. } => *scaling,
            _ => ScalingPolicy::Unscaled,
        }
    }

    /// Length of the vectors the technique produces
    pub fn dimension(&self) -> usize {
        match self {
            VectorizationTechnique::PersistenceImage { resolution } => resolution * resolution,
            VectorizationTechnique::BettiCurve { num_bins }
            | VectorizationTechnique::LifeEntropyCurve { num_bins } => *num_bins,
            VectorizationTechnique::KernelDensity { dim, .. } => *dim,
        }
    }

    /// Check parameters before any work
    pub fn validate(&self) -> SimilarityResult<()> {
        let invalid = |msg: &str| Err(SimilarityError::InvalidConfig(msg.to_string()));
        match self {
            VectorizationTechnique::PersistenceImage { resolution } if *resolution == 0 => {
                invalid("persistence image resolution must be > 0")
            }
            VectorizationTechnique::BettiCurve { num_bins }
            | VectorizationTechnique::LifeEntropyCurve { num_bins }
                if *num_bins == 0 =>
            {
                invalid("curve bin count must be > 0")
            }
            VectorizationTechnique::KernelDensity {
                dim, kernel_width, ..
            } => {
                if *dim == 0 {
                    invalid("kernel density dimension must be > 0")
                } else if kernel_width.is_nan() || *kernel_width <= 0.0 {
                    invalid("kernel width must be > 0")
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Short name
    pub fn name(&self) -> &'static str {
        match self {
            VectorizationTechnique::PersistenceImage { .. } => "persistence_image",
            VectorizationTechnique::BettiCurve { .. } => "betti_curve",
            VectorizationTechnique::LifeEntropyCurve { .. } => "life_entropy_curve",
            VectorizationTechnique::KernelDensity { .. } => "kernel_density",
        }
    }
}

impl fmt::Display for VectorizationTechnique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Corpus-wide extrema computed in pass 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalLimits {
    /// (min, max) of births
    pub xlim: (f64, f64),
    /// (min, max) of deaths
    pub ylim: (f64, f64),
    /// Upper sampling bound of the legacy kernel-density vector
    pub max_time: f64,
}

impl GlobalLimits {
    /// Smallest and largest value on either axis
    pub fn span(&self) -> (f64, f64) {
        (self.xlim.0.min(self.ylim.0), self.xlim.1.max(self.ylim.1))
    }
}

/// Two-pass vectorizer for one technique
#[derive(Clone)]
pub struct VectorizationEngine {
    technique: VectorizationTechnique,
    summary: Arc<dyn TopologySummary>,
}

impl fmt::Debug for VectorizationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorizationEngine")
            .field("technique", &self.technique)
            .finish()
    }
}

impl VectorizationEngine {
    /// Engine using the in-crate topological summaries
    pub fn new(technique: VectorizationTechnique) -> Self {
        VectorizationEngine {
            technique,
            summary: Arc::new(NativeTopology),
        }
    }

    /// Engine using a different summary implementation
    pub fn with_summary(technique: VectorizationTechnique, summary: Arc<dyn TopologySummary>) -> Self {
        VectorizationEngine { technique, summary }
    }

    /// The technique
    pub fn technique(&self) -> &VectorizationTechnique {
        &self.technique
    }

    /// Pass 1: extrema over the whole corpus
    ///
    /// The store must already be scaled the way the technique expects.
    pub fn compute_global_limits(&self, store: &DiagramStore) -> SimilarityResult<GlobalLimits> {
        let limits = get_limits(store.iter().map(|(_, d)| d.as_slice())).ok_or_else(|| {
            SimilarityError::EmptyBatch {
                what: "persistence diagram".to_string(),
            }
        })?;

        let max_time = match self.technique.scaling() {
            ScalingPolicy::MinMax => 1.0,
            ScalingPolicy::Unscaled => store.max_value().unwrap_or(limits.span().1),
        };

        let global = GlobalLimits {
            xlim: limits.xlim,
            ylim: limits.ylim,
            max_time,
        };

        info!(
            target: "neurosim::vectorize",
            diagrams = store.len(),
            xlim = ?global.xlim,
            ylim = ?global.ylim,
            max_time = global.max_time,
            "Computed global limits"
        );

        Ok(global)
    }

    /// Vectorize one diagram against global limits
    pub fn vectorize_one(
        &self,
        key: &EntityKey,
        diagram: &[[f64; 2]],
        limits: &GlobalLimits,
    ) -> SimilarityResult<FeatureVector> {
        if diagram.is_empty() {
            return Err(SimilarityError::EmptyDiagram { key: key.encode() });
        }

        let summary = self.summary.as_ref();
        let vector = match self.technique {
            VectorizationTechnique::PersistenceImage { resolution } => {
                math::persistence_image(summary, diagram, limits.xlim, limits.ylim, resolution)
            }
            VectorizationTechnique::BettiCurve { num_bins } => {
                math::betti_curve(summary, diagram, limits.span(), num_bins)
            }
            VectorizationTechnique::LifeEntropyCurve { num_bins } => {
                math::life_entropy_curve(summary, diagram, limits.span(), num_bins)
            }
            VectorizationTechnique::KernelDensity {
                dim,
                kernel_width,
                max_height,
                ..
            } => math::compute_persistence_vector(
                diagram,
                dim,
                limits.max_time,
                kernel_width,
                max_height,
            ),
        };

        if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
            return Err(SimilarityError::Vectorization {
                key: key.encode(),
                reason: format!("non-finite value at index {}", pos),
            });
        }

        Ok(vector)
    }

    /// Pass 2: vectorize every diagram against the pass-1 limits
    ///
    /// Entities that fail are logged and omitted. Legacy kernel-density
    /// vectors are then divided by the corpus-wide maximum component.
    pub fn vectorize_all(
        &self,
        store: &DiagramStore,
        limits: &GlobalLimits,
    ) -> BTreeMap<EntityKey, FeatureVector> {
        let results: Vec<(EntityKey, SimilarityResult<FeatureVector>)> = store
            .diagrams()
            .par_iter()
            .map(|(key, diagram)| (key.clone(), self.vectorize_one(key, diagram, limits)))
            .collect();

        let mut vectors = BTreeMap::new();
        let mut failed = 0usize;
        for (key, result) in results {
            match result {
                Ok(v) => {
                    vectors.insert(key, v);
                }
                Err(e) => {
                    failed += 1;
                    warn!(target: "neurosim::vectorize", entity = %key, error = %e, "Vectorization failed");
                }
            }
        }

        if matches!(self.technique, VectorizationTechnique::KernelDensity { .. }) {
            let max = math::normalize_by_corpus_max(vectors.values_mut());
            if !(max.is_finite() && max > 0.0) {
                warn!(target: "neurosim::vectorize", max, "Corpus maximum is not positive, vectors left unnormalized");
            }
        }

        info!(
            target: "neurosim::vectorize",
            technique = %self.technique,
            vectorized = vectors.len(),
            failed,
            "Vectorized corpus"
        );

        vectors
    }

    /// Scale, compute global limits, then vectorize
    pub fn vectorize(&self, store: DiagramStore) -> SimilarityResult<BTreeMap<EntityKey, FeatureVector>> {
        self.technique.validate()?;
        let store = store.scaled(self.technique.scaling());
        let limits = self.compute_global_limits(&store)?;
        Ok(self.vectorize_all(&store, &limits))
    }
}
