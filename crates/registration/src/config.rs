//! Registration configuration via `neurosim.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! A default `neurosim.toml` with comments can be written next to the data
//! with [`SimilarityConfig::write_default_if_missing`].

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use neurosim_core::{SimilarityError, SimilarityFormula, SimilarityResult};
use neurosim_vectorize::engine::{DEFAULT_NUM_BINS, DEFAULT_RESOLUTION};
use neurosim_vectorize::{ScalingPolicy, VectorEncoding, VectorizationTechnique};

use crate::boosting::DEFAULT_NEIGHBORHOOD_SIZE;

/// Config file name placed in the working directory.
pub const CONFIG_FILE_NAME: &str = "neurosim.toml";

/// Which vectorization technique to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechniqueKind {
    /// Persistence image
    #[default]
    PersistenceImage,
    /// Betti curve
    BettiCurve,
    /// Life-entropy curve
    LifeEntropyCurve,
    /// Legacy kernel-density vector
    KernelDensity,
}

/// `[vectorization]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizationConfig {
    /// Technique to run
    #[serde(default)]
    pub technique: TechniqueKind,
    /// Persistence image grid size per axis
    #[serde(default = "default_resolution")]
    pub resolution: usize,
    /// Curve bin count
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
    /// Kernel-density vector length
    #[serde(default = "default_dim")]
    pub dim: usize,
    /// Kernel-density Gaussian width
    #[serde(default = "default_kernel_width")]
    pub kernel_width: f64,
    /// Kernel-density height bound, carried but not applied
    #[serde(default = "default_max_height")]
    pub max_height: f64,
    /// Kernel-density diagram scaling
    #[serde(default)]
    pub scaling: ScalingPolicy,
    /// Vector encoding of JSON artifacts
    #[serde(default)]
    pub encoding: VectorEncoding,
}

fn default_resolution() -> usize {
    DEFAULT_RESOLUTION
}

fn default_num_bins() -> usize {
    DEFAULT_NUM_BINS
}

fn default_dim() -> usize {
    256
}

fn default_kernel_width() -> f64 {
    120.0
}

fn default_max_height() -> f64 {
    17000.0
}

impl Default for VectorizationConfig {
    fn default() -> Self {
        Self {
            technique: TechniqueKind::default(),
            resolution: default_resolution(),
            num_bins: default_num_bins(),
            dim: default_dim(),
            kernel_width: default_kernel_width(),
            max_height: default_max_height(),
            scaling: ScalingPolicy::default(),
            encoding: VectorEncoding::default(),
        }
    }
}

impl VectorizationConfig {
    /// The configured technique with its parameters
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is out of range.
    pub fn technique(&self) -> SimilarityResult<VectorizationTechnique> {
        let technique = match self.technique {
            TechniqueKind::PersistenceImage => VectorizationTechnique::PersistenceImage {
                resolution: self.resolution,
            },
            TechniqueKind::BettiCurve => VectorizationTechnique::BettiCurve {
                num_bins: self.num_bins,
            },
            TechniqueKind::LifeEntropyCurve => VectorizationTechnique::LifeEntropyCurve {
                num_bins: self.num_bins,
            },
            TechniqueKind::KernelDensity => VectorizationTechnique::KernelDensity {
                dim: self.dim,
                kernel_width: self.kernel_width,
                max_height: self.max_height,
                scaling: self.scaling,
            },
        };
        technique.validate()?;
        Ok(technique)
    }
}

/// `[boosting]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingConfig {
    /// Neighbors queried per embedding, the embedding itself included
    #[serde(default = "default_neighborhood_size")]
    pub neighborhood_size: usize,
    /// Scoring formula for boosting and statistics
    #[serde(default = "default_formula")]
    pub formula: SimilarityFormula,
}

fn default_neighborhood_size() -> usize {
    DEFAULT_NEIGHBORHOOD_SIZE
}

fn default_formula() -> SimilarityFormula {
    SimilarityFormula::Euclidean
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            neighborhood_size: default_neighborhood_size(),
            formula: default_formula(),
        }
    }
}

/// `[pipeline]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory for local artifacts and downloads
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Save model runs as compressed artifacts instead of JSON maps
    #[serde(default = "default_compress")]
    pub compress_artifacts: bool,
    /// Tag of registered embeddings, derived from the model when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_tag: Option<String>,
    /// Tag of boosting factors, the embedding tag when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boosting_tag: Option<String>,
    /// Tag of statistics, the embedding tag when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_tag: Option<String>,
    /// Type of the entities the models embed
    #[serde(default = "default_target_type")]
    pub target_type: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_compress() -> bool {
    true
}

fn default_target_type() -> String {
    "NeuronMorphology".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            compress_artifacts: default_compress(),
            embedding_tag: None,
            boosting_tag: None,
            stats_tag: None,
            target_type: default_target_type(),
        }
    }
}

impl PipelineConfig {
    /// Directory holding model runs and downloaded artifacts
    pub fn pipelines_dir(&self) -> PathBuf {
        self.data_dir.join("pipelines")
    }

    /// Boosting tag, falling back to the embedding tag
    pub fn boosting_tag_or(&self, embedding_tag: &str) -> String {
        self.boosting_tag
            .clone()
            .unwrap_or_else(|| embedding_tag.to_string())
    }

    /// Statistics tag, falling back to the embedding tag
    pub fn stats_tag_or(&self, embedding_tag: &str) -> String {
        self.stats_tag
            .clone()
            .unwrap_or_else(|| embedding_tag.to_string())
    }
}

/// Configuration loaded from `neurosim.toml`.
///
/// # Example
///
/// ```toml
/// [vectorization]
/// technique = "betti_curve"
/// num_bins = 200
///
/// [boosting]
/// formula = "cosine"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Vectorization technique and parameters
    #[serde(default)]
    pub vectorization: VectorizationConfig,
    /// Boosting neighborhood and formula
    #[serde(default)]
    pub boosting: BoostingConfig,
    /// Pipeline locations and tags
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl SimilarityConfig {
    /// Check every value that can be out of range.
    ///
    /// # Errors
    ///
    /// Returns an error if the technique parameters are invalid or the
    /// neighborhood can't hold a neighbor besides the embedding itself.
    pub fn validate(&self) -> SimilarityResult<()> {
        self.vectorization.technique()?;
        if self.boosting.neighborhood_size < 2 {
            return Err(SimilarityError::InvalidConfig(format!(
                "Invalid neighborhood_size {} in {}. Expected at least 2.",
                self.boosting.neighborhood_size, CONFIG_FILE_NAME
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# neurosim registration configuration

[vectorization]
# "persistence_image" (default), "betti_curve", "life_entropy_curve"
# or the legacy "kernel_density"
technique = "persistence_image"

# Persistence image grid size per axis (vector length = resolution^2)
resolution = 100

# Bin count of Betti and life-entropy curves
num_bins = 500

# Legacy kernel-density parameters
# dim = 256
# kernel_width = 120.0
# max_height = 17000.0
# scaling = "unscaled"      # or "min_max"

# JSON artifact vector encoding: "plain" or "base64"
encoding = "plain"

[boosting]
# Neighbors queried per embedding, the embedding itself included
neighborhood_size = 10

# "euclidean" (default), "cosine" or "poincare"
formula = "euclidean"

[pipeline]
data_dir = "data"
compress_artifacts = true
target_type = "NeuronMorphology"

# Tags default to "{model uuid}?rev={model rev}"
# embedding_tag = "my-tag"
# boosting_tag = "my-tag"
# stats_tag = "my-tag"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> SimilarityResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SimilarityError::InvalidConfig(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: SimilarityConfig = toml::from_str(&content).map_err(|e| {
            SimilarityError::InvalidConfig(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> SimilarityResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to write default config file '{}': {}", path.display(), e),
                )
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> SimilarityResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            SimilarityError::Serialization(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content).map_err(|e| {
            SimilarityError::from(io::Error::new(
                e.kind(),
                format!("Failed to write config file '{}': {}", path.display(), e),
            ))
        })
    }
}
