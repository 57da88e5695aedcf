//! Twelve-stage registration pipeline
//!
//! Stages run in a fixed order, but nothing advances automatically: the
//! caller picks the stage to (re-)run and feeds it the identifiers earlier
//! stages returned. Every stage is idempotent because every write beneath
//! it goes through find-or-create plus tag. A failed stage leaves the side
//! effects of earlier stages in place.
//!
//! | Letter | Stage | Returns |
//! |---|---|---|
//! | A | save a model run locally | artifact path |
//! | B | register the model | model entity |
//! | C | register the model catalog | catalog entity |
//! | D | register embeddings | (tag, dimension) |
//! | E | similarity view | view id |
//! | F | aggregated similarity view | view id |
//! | G | non-boosted statistics | statistic id |
//! | H | boosting factors | boosting tag |
//! | I | boosting view | view id |
//! | J | aggregated boosting view | view id |
//! | K | boosted statistics | statistic id |
//! | L | statistics view | view id |

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use neurosim_core::{
    Bucket, Entity, EntityKey, EntityRef, EntityType, FeatureVector, Revision, SimilarityError,
    SimilarityResult, StoreProvider, ViewRef, ViewService, DISTRIBUTION_FIELD,
};
use neurosim_vectorize::artifact::{COMPRESSED_EXTENSION, JSON_EXTENSION};
use neurosim_vectorize::{
    DiagramCache, DiagramSource, DiagramStore, NeuriteType, RequestedKey, VectorArtifact,
    VectorizationEngine, VectorizationTechnique,
};

use crate::boosting::{boosting_from_documents, register_boosting_factors, BoostingFactorCalculator};
use crate::catalog::push_catalog;
use crate::config::SimilarityConfig;
use crate::embedding::{model_tag, EmbeddingRegistry, TagTransformer};
use crate::model::{push_model, require_model, ModelDescription};
use crate::stats::{fetch_stats, register_stats, StatisticsAggregator};
use crate::views;

/// Pipeline stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Run the model and save its vectors locally
    SaveLocal,
    /// Register the embedding model with its artifact
    RegisterModel,
    /// Register the catalog of the model across buckets
    RegisterCatalog,
    /// Register one embedding per vector
    RegisterEmbeddings,
    /// View over the registered embeddings
    RegisterSimilarityView,
    /// Aggregate of similarity views
    RegisterAggregatedSimilarityView,
    /// Statistics over raw scores
    RegisterNonBoostedStats,
    /// One boosting factor per embedding
    RegisterBoostingFactors,
    /// View over the boosting factors
    RegisterBoostingView,
    /// Aggregate of boosting views
    RegisterAggregatedBoostingView,
    /// Statistics over boosted scores
    RegisterBoostedStats,
    /// View over the statistics
    RegisterStatsView,
}

impl Stage {
    /// Every stage, in order
    pub const ALL: [Stage; 12] = [
        Stage::SaveLocal,
        Stage::RegisterModel,
        Stage::RegisterCatalog,
        Stage::RegisterEmbeddings,
        Stage::RegisterSimilarityView,
        Stage::RegisterAggregatedSimilarityView,
        Stage::RegisterNonBoostedStats,
        Stage::RegisterBoostingFactors,
        Stage::RegisterBoostingView,
        Stage::RegisterAggregatedBoostingView,
        Stage::RegisterBoostedStats,
        Stage::RegisterStatsView,
    ];

    /// 1-based position
    pub fn number(&self) -> usize {
        *self as usize + 1
    }

    /// Letter of the stage in logs, `A` for the first
    pub fn letter(&self) -> char {
        (b'A' + *self as u8) as char
    }

    /// What the stage does, as logged
    pub fn log_message(&self) -> &'static str {
        match self {
            Stage::SaveLocal => "Running and downloading locally",
            Stage::RegisterModel => "Pushing to Nexus",
            Stage::RegisterCatalog => "Register Embedding Model Data Catalog",
            Stage::RegisterEmbeddings => "Registering embeddings",
            Stage::RegisterSimilarityView => "Creating similarity view",
            Stage::RegisterAggregatedSimilarityView => "Creating aggregated similarity view",
            Stage::RegisterNonBoostedStats => "Registering non-boosted statistics",
            Stage::RegisterBoostingFactors => "Registering boosting data",
            Stage::RegisterBoostingView => "Creating boosting view",
            Stage::RegisterAggregatedBoostingView => "Creating aggregated boosting view",
            Stage::RegisterBoostedStats => "Registering boosted statistics",
            Stage::RegisterStatsView => "Creating stat view",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.letter(), self.log_message())
    }
}

/// Produces the vectors of one model run over a bucket
///
/// `Ok(None)` means the model produced nothing for the bucket.
pub trait EmbeddingModelRunner: Send + Sync {
    /// Run over the entities of `bucket`
    fn run(&self, bucket: &Bucket) -> SimilarityResult<Option<VectorArtifact>>;
}

/// Vectorizes the cached persistence diagrams of a bucket
pub struct DiagramModel {
    engine: VectorizationEngine,
    cache_dir: PathBuf,
    neurite: NeuriteType,
    recompute: bool,
    source: Option<Arc<dyn DiagramSource>>,
}

impl DiagramModel {
    /// Model reading diagrams of `neurite` from caches under `cache_dir`
    pub fn new(
        technique: VectorizationTechnique,
        cache_dir: impl Into<PathBuf>,
        neurite: NeuriteType,
    ) -> Self {
        DiagramModel {
            engine: VectorizationEngine::new(technique),
            cache_dir: cache_dir.into(),
            neurite,
            recompute: false,
            source: None,
        }
    }

    /// Model using the technique of the `[vectorization]` section
    ///
    /// # Errors
    ///
    /// Returns an error if the configured technique parameters are invalid.
    pub fn from_config(
        config: &SimilarityConfig,
        cache_dir: impl Into<PathBuf>,
        neurite: NeuriteType,
    ) -> SimilarityResult<Self> {
        let technique = config.vectorization.technique()?;
        Ok(DiagramModel::new(technique, cache_dir, neurite))
    }

    /// Technique the model vectorizes with
    pub fn technique(&self) -> &VectorizationTechnique {
        self.engine.technique()
    }

    /// Recompute diagrams through `source` instead of reading the cache
    pub fn recompute_with(mut self, source: Arc<dyn DiagramSource>) -> Self {
        self.recompute = true;
        self.source = Some(source);
        self
    }

    /// Ask for recomputation without changing the source
    pub fn with_recompute(mut self, recompute: bool) -> Self {
        self.recompute = recompute;
        self
    }
}

impl EmbeddingModelRunner for DiagramModel {
    fn run(&self, bucket: &Bucket) -> SimilarityResult<Option<VectorArtifact>> {
        let cache = DiagramCache::for_bucket(&self.cache_dir, self.neurite, bucket);
        let raw = cache.load_or_compute(self.recompute, self.neurite, self.source.as_deref())?;
        let vectors = self.engine.vectorize(DiagramStore::from_raw(raw))?;
        if vectors.is_empty() {
            return Ok(None);
        }
        Ok(Some(VectorArtifact::new(
            Some(*self.engine.technique()),
            &vectors,
        )))
    }
}

/// Inputs of the embedding registration stage
#[derive(Clone)]
pub struct EmbeddingRequest {
    /// Bucket holding the model
    pub model_bucket: Bucket,
    /// Model name
    pub model_name: String,
    /// Model revision, latest if unset
    pub model_rev: Option<Revision>,
    /// Bucket holding the embedded entities
    pub data_bucket: Bucket,
    /// Bucket the embeddings are written to
    pub push_bucket: Bucket,
    /// Register only these entities
    pub subset: Option<Vec<RequestedKey>>,
    /// Explicit tag, overriding the configured and derived ones
    pub tag: Option<String>,
    /// Rewrite of the tag before it is applied
    pub tag_transformer: Option<TagTransformer>,
}

impl EmbeddingRequest {
    /// Embed the entities of `bucket` into `bucket` with a model of `bucket`
    pub fn new(bucket: Bucket, model_name: impl Into<String>) -> Self {
        EmbeddingRequest {
            model_bucket: bucket.clone(),
            model_name: model_name.into(),
            model_rev: None,
            data_bucket: bucket.clone(),
            push_bucket: bucket,
            subset: None,
            tag: None,
            tag_transformer: None,
        }
    }
}

impl fmt::Debug for EmbeddingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingRequest")
            .field("model_bucket", &self.model_bucket)
            .field("model_name", &self.model_name)
            .field("model_rev", &self.model_rev)
            .field("data_bucket", &self.data_bucket)
            .field("push_bucket", &self.push_bucket)
            .field("subset", &self.subset.as_ref().map(Vec::len))
            .field("tag", &self.tag)
            .field("tag_transformer", &self.tag_transformer.is_some())
            .finish()
    }
}

/// Identifiers produced by a full run over one bucket
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// Saved model run
    pub artifact_path: PathBuf,
    /// Registered model id
    pub model_id: String,
    /// Registered catalog id
    pub catalog_id: String,
    /// Embedding tag
    pub embedding_tag: String,
    /// Vector dimension
    pub dimension: usize,
    /// Similarity view
    pub similarity_view: String,
    /// Aggregated similarity view
    pub aggregated_similarity_view: String,
    /// Non-boosted statistic id
    pub non_boosted_stats: String,
    /// Boosting tag
    pub boosting_tag: String,
    /// Boosting view
    pub boosting_view: String,
    /// Aggregated boosting view
    pub aggregated_boosting_view: String,
    /// Boosted statistic id
    pub boosted_stats: String,
    /// Statistics view
    pub stats_view: String,
}

/// Stage functions over a deployment
pub struct RegistrationPipeline {
    provider: Arc<dyn StoreProvider>,
    views: Arc<dyn ViewService>,
    config: SimilarityConfig,
}

impl RegistrationPipeline {
    /// Pipeline over the stores and views of one deployment
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(
        provider: Arc<dyn StoreProvider>,
        views: Arc<dyn ViewService>,
        config: SimilarityConfig,
    ) -> SimilarityResult<Self> {
        config.validate()?;
        Ok(RegistrationPipeline {
            provider,
            views,
            config,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    fn run_stage<T>(
        &self,
        stage: Stage,
        model: Option<&str>,
        f: impl FnOnce() -> SimilarityResult<T>,
    ) -> SimilarityResult<T> {
        match model {
            Some(name) => info!(target: "neurosim::pipeline", stage = stage.number(), "{} for model {}", stage, name),
            None => info!(target: "neurosim::pipeline", stage = stage.number(), "{}", stage),
        }
        match f() {
            Ok(value) => {
                info!(target: "neurosim::pipeline", stage = stage.number(), "{} done", stage.letter());
                Ok(value)
            }
            Err(e) => {
                error!(target: "neurosim::pipeline", stage = stage.number(), error = %e, "{} failed", stage.letter());
                Err(e)
            }
        }
    }

    /// Where stage A saves the run of `filename` over `bucket`
    pub fn artifact_path(&self, filename: &str, bucket: &Bucket) -> PathBuf {
        let extension = if self.config.pipeline.compress_artifacts {
            COMPRESSED_EXTENSION
        } else {
            JSON_EXTENSION
        };
        self.config.pipeline.pipelines_dir().join(format!(
            "{}_{}_{}.{}",
            filename, bucket.org, bucket.project, extension
        ))
    }

    /// A. Run the model over `bucket` and save its vectors
    ///
    /// Returns `None`, after a warning, when the model produced nothing.
    pub fn save_local(
        &self,
        runner: &dyn EmbeddingModelRunner,
        description: &ModelDescription,
        bucket: &Bucket,
    ) -> SimilarityResult<Option<PathBuf>> {
        self.run_stage(Stage::SaveLocal, Some(&description.name), || {
            let Some(artifact) = runner.run(bucket)? else {
                warn!(target: "neurosim::pipeline", model = %description.name, bucket = %bucket, "Model run produced no vectors");
                return Ok(None);
            };
            let path = self.artifact_path(&description.filename, bucket);
            artifact.save(&path, self.config.vectorization.encoding)?;
            info!(target: "neurosim::pipeline", count = artifact.len(), path = %path.display(), "Saved model run");
            Ok(Some(path))
        })
    }

    /// B. Register the model in `bucket` with the saved artifact
    pub fn register_model(
        &self,
        bucket: &Bucket,
        description: &ModelDescription,
        artifact_path: &Path,
    ) -> SimilarityResult<Entity> {
        self.run_stage(Stage::RegisterModel, Some(&description.name), || {
            let store = self.provider.store(bucket)?;
            push_model(store.as_ref(), description, artifact_path)
        })
    }

    /// C. Register the catalog of `model_name` in `bucket`
    ///
    /// `parts` lists the buckets holding the model, with an optional
    /// revision each.
    pub fn register_catalog(
        &self,
        bucket: &Bucket,
        model_name: &str,
        parts: &[(Bucket, Option<Revision>)],
    ) -> SimilarityResult<Entity> {
        self.run_stage(Stage::RegisterCatalog, Some(model_name), || {
            let store = self.provider.store(bucket)?;
            push_catalog(
                store.as_ref(),
                self.provider.as_ref(),
                model_name,
                parts,
                &self.config.pipeline.target_type,
            )
        })
    }

    /// D. Register the vectors of the model's artifact as embeddings
    ///
    /// Returns the tag applied and the vector dimension.
    pub fn register_embeddings(&self, request: &EmbeddingRequest) -> SimilarityResult<(String, usize)> {
        self.run_stage(Stage::RegisterEmbeddings, Some(&request.model_name), || {
            let model_store = self.provider.store(&request.model_bucket)?;
            let model = require_model(model_store.as_ref(), &request.model_name, request.model_rev)?;
            let model_rev = model.rev().ok_or_else(|| {
                SimilarityError::Store(format!("model {} has no revision", model.id))
            })?;

            let base = request
                .tag
                .clone()
                .or_else(|| self.config.pipeline.embedding_tag.clone())
                .unwrap_or_else(|| model_tag(&model.id, model_rev));
            let tag = match &request.tag_transformer {
                Some(transform) => transform(&base),
                None => base,
            };

            let downloaded = model_store.download(
                &model,
                DISTRIBUTION_FIELD,
                &self.config.pipeline.pipelines_dir(),
            )?;
            let artifact = VectorArtifact::load(&downloaded)?;
            let vectors = self.select_vectors(&artifact, request.subset.as_deref())?;
            info!(target: "neurosim::pipeline", count = vectors.len(), tag = %tag, "Loaded vectors");

            let registry = EmbeddingRegistry::new(
                self.provider.store(&request.data_bucket)?,
                self.provider.store(&request.push_bucket)?,
            );
            let model_ref = EntityRef::pinned(model.id.clone(), model_rev, EntityType::EmbeddingModel.as_str());
            registry.register_batch(&vectors, &model_ref, &tag)
        })
    }

    fn select_vectors(
        &self,
        artifact: &VectorArtifact,
        subset: Option<&[RequestedKey]>,
    ) -> SimilarityResult<BTreeMap<EntityKey, FeatureVector>> {
        match subset {
            None => artifact.vectors(),
            Some(requested) => {
                let (missing, found) = artifact.vectors_for(requested)?;
                if !missing.is_empty() {
                    warn!(
                        target: "neurosim::pipeline",
                        missing = missing.len(),
                        requested = requested.len(),
                        "Requested entities have no vector"
                    );
                }
                Ok(found)
            }
        }
    }

    /// E. View over the embeddings tagged `tag`
    pub fn register_similarity_view(
        &self,
        bucket: &Bucket,
        tag: &str,
        dimension: usize,
    ) -> SimilarityResult<String> {
        self.run_stage(Stage::RegisterSimilarityView, None, || {
            views::create_similarity_view(self.views.as_ref(), bucket, tag, dimension)
        })
    }

    /// F. Aggregate of similarity views
    pub fn register_aggregated_similarity_view(
        &self,
        bucket: &Bucket,
        members: &[ViewRef],
    ) -> SimilarityResult<String> {
        self.run_stage(Stage::RegisterAggregatedSimilarityView, None, || {
            views::create_aggregated_view(self.views.as_ref(), bucket, members)
        })
    }

    /// G. Statistics of raw scores over the aggregated similarity view
    ///
    /// The statistic is written to `bucket`; returns its id.
    pub fn register_non_boosted_stats(
        &self,
        bucket: &Bucket,
        aggregated_similarity_view: &str,
        tag: &str,
    ) -> SimilarityResult<String> {
        self.run_stage(Stage::RegisterNonBoostedStats, None, || {
            let index = self.views.scoring_index(aggregated_similarity_view)?;
            let formula = self.config.boosting.formula;
            let statistic = StatisticsAggregator::new(formula).compute(index.as_ref(), None)?;
            let store = self.provider.store(bucket)?;
            register_stats(store.as_ref(), aggregated_similarity_view, &statistic, formula, tag, false)
        })
    }

    /// H. Boosting factors of every embedding of the aggregated view
    ///
    /// The non-boosted statistic is read from `stats_bucket`; the factors
    /// are written to `bucket`. Returns the boosting tag.
    pub fn register_boosting_factors(
        &self,
        bucket: &Bucket,
        stats_bucket: &Bucket,
        non_boosted_stats: &str,
        aggregated_similarity_view: &str,
        tag: &str,
    ) -> SimilarityResult<String> {
        self.run_stage(Stage::RegisterBoostingFactors, None, || {
            let stats_store = self.provider.store(stats_bucket)?;
            let Some(statistic) = fetch_stats(stats_store.as_ref(), non_boosted_stats)? else {
                error!(
                    target: "neurosim::pipeline",
                    stats = non_boosted_stats,
                    "Could not retrieve non-boosted statistics, first run step register non boosted stats"
                );
                return Err(SimilarityError::EntityNotFound {
                    id: non_boosted_stats.to_string(),
                });
            };

            let index = self.views.scoring_index(aggregated_similarity_view)?;
            let calculator = BoostingFactorCalculator::new(
                self.config.boosting.neighborhood_size,
                self.config.boosting.formula,
            );
            let factors = calculator.compute(index.as_ref(), &statistic)?;
            let store = self.provider.store(bucket)?;
            register_boosting_factors(
                store.as_ref(),
                aggregated_similarity_view,
                &factors,
                calculator.formula(),
                tag,
            )?;
            Ok(tag.to_string())
        })
    }

    /// I. View over the boosting factors tagged `tag`
    pub fn register_boosting_view(&self, bucket: &Bucket, tag: &str) -> SimilarityResult<String> {
        self.run_stage(Stage::RegisterBoostingView, None, || {
            views::create_boosting_view(self.views.as_ref(), bucket, tag)
        })
    }

    /// J. Aggregate of boosting views
    pub fn register_aggregated_boosting_view(
        &self,
        bucket: &Bucket,
        members: &[ViewRef],
    ) -> SimilarityResult<String> {
        self.run_stage(Stage::RegisterAggregatedBoostingView, None, || {
            views::create_aggregated_view(self.views.as_ref(), bucket, members)
        })
    }

    /// K. Statistics of boosted scores over the aggregated similarity view
    ///
    /// Boosting factors are read through the aggregated boosting view.
    pub fn register_boosted_stats(
        &self,
        bucket: &Bucket,
        aggregated_similarity_view: &str,
        aggregated_boosting_view: &str,
        tag: &str,
    ) -> SimilarityResult<String> {
        self.run_stage(Stage::RegisterBoostedStats, None, || {
            let boosting = boosting_from_documents(&self.views.documents(aggregated_boosting_view)?);
            info!(target: "neurosim::pipeline", count = boosting.len(), "Loaded boosting factors");

            let index = self.views.scoring_index(aggregated_similarity_view)?;
            let formula = self.config.boosting.formula;
            let statistic = StatisticsAggregator::new(formula).compute(index.as_ref(), Some(&boosting))?;
            let store = self.provider.store(bucket)?;
            register_stats(store.as_ref(), aggregated_similarity_view, &statistic, formula, tag, true)
        })
    }

    /// L. View over the statistics tagged `tag`
    pub fn register_stats_view(&self, bucket: &Bucket, tag: &str) -> SimilarityResult<String> {
        self.run_stage(Stage::RegisterStatsView, None, || {
            views::create_stats_view(self.views.as_ref(), bucket, tag)
        })
    }

    /// Run every stage against one bucket
    ///
    /// The bucket holds the entities, the model, its embeddings and every
    /// view. A model run that produces nothing is an empty batch.
    pub fn register_all(
        &self,
        runner: &dyn EmbeddingModelRunner,
        description: &ModelDescription,
        bucket: &Bucket,
    ) -> SimilarityResult<PipelineOutput> {
        let artifact_path = self
            .save_local(runner, description, bucket)?
            .ok_or_else(|| SimilarityError::EmptyBatch {
                what: "model run".to_string(),
            })?;
        let model = self.register_model(bucket, description, &artifact_path)?;
        let catalog = self.register_catalog(
            bucket,
            &description.name,
            &[(bucket.clone(), description.rev)],
        )?;

        let mut request = EmbeddingRequest::new(bucket.clone(), description.name.clone());
        request.model_rev = description.rev;
        let (embedding_tag, dimension) = self.register_embeddings(&request)?;

        let similarity_view = self.register_similarity_view(bucket, &embedding_tag, dimension)?;
        let aggregated_similarity_view = self.register_aggregated_similarity_view(
            bucket,
            &[ViewRef::new(bucket.clone(), similarity_view.clone())],
        )?;

        let stats_tag = self.config.pipeline.stats_tag_or(&embedding_tag);
        let non_boosted_stats =
            self.register_non_boosted_stats(bucket, &aggregated_similarity_view, &stats_tag)?;

        let boosting_tag = self.register_boosting_factors(
            bucket,
            bucket,
            &non_boosted_stats,
            &aggregated_similarity_view,
            &self.config.pipeline.boosting_tag_or(&embedding_tag),
        )?;
        let boosting_view = self.register_boosting_view(bucket, &boosting_tag)?;
        let aggregated_boosting_view = self.register_aggregated_boosting_view(
            bucket,
            &[ViewRef::new(bucket.clone(), boosting_view.clone())],
        )?;

        let boosted_stats = self.register_boosted_stats(
            bucket,
            &aggregated_similarity_view,
            &aggregated_boosting_view,
            &stats_tag,
        )?;
        let stats_view = self.register_stats_view(bucket, &stats_tag)?;

        Ok(PipelineOutput {
            artifact_path,
            model_id: model.id,
            catalog_id: catalog.id,
            embedding_tag,
            dimension,
            similarity_view,
            aggregated_similarity_view,
            non_boosted_stats,
            boosting_tag,
            boosting_view,
            aggregated_boosting_view,
            boosted_stats,
            stats_view,
        })
    }
}
