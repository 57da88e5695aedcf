//! Boosting factors
//!
//! A boosting factor compensates for local density: an embedding whose
//! neighbors are spread out gets its scores multiplied up. For each indexed
//! embedding the calculator queries its neighborhood, normalizes the
//! neighbor scores against the corpus-wide (min, max) of a prior
//! statistic, and takes
//!
//! ```text
//! factor = 1 + sqrt(mean((1 - normalized)^2))
//! ```
//!
//! over the neighbors other than the embedding itself. Factors are >= 1.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info};

use neurosim_core::{
    last_segment, Entity, EntityBody, EntityFilter, EntityKey, EntityRef, EntityStore, EntityType,
    Generation, ScoringIndex, SimilarityFormula, SimilarityResult, Statistic,
};

use crate::agents;
use crate::fetch::fetch_one;
use crate::persist::{persist_batch, PersistAction};

/// Default number of neighbors queried per embedding
pub const DEFAULT_NEIGHBORHOOD_SIZE: usize = 10;

/// Type recorded for scoring views in generation activities
pub const VIEW_TYPE: &str = "ElasticSearchView";

/// Root-mean-square residual dissimilarity of a neighbor score set
///
/// Scores are normalized into [0, 1] with `(s - min) / (max - min)`. With a
/// degenerate range (`max <= min`) every score counts as fully similar and
/// the deviation is 0, as it is for an empty score set.
pub fn score_deviation(scores: &[f64], min: f64, max: f64) -> f64 {
    if scores.is_empty() || max <= min {
        return 0.0;
    }
    let range = max - min;
    let sum: f64 = scores
        .iter()
        .map(|s| {
            let normalized = (s - min) / range;
            (1.0 - normalized).powi(2)
        })
        .sum();
    (sum / scores.len() as f64).sqrt()
}

/// Computes one boosting factor per indexed embedding
#[derive(Debug, Clone, Copy)]
pub struct BoostingFactorCalculator {
    neighborhood_size: usize,
    formula: SimilarityFormula,
}

impl BoostingFactorCalculator {
    /// Calculator querying `neighborhood_size` neighbors under `formula`
    pub fn new(neighborhood_size: usize, formula: SimilarityFormula) -> Self {
        BoostingFactorCalculator {
            neighborhood_size,
            formula,
        }
    }

    /// Formula the factors are derived under
    pub fn formula(&self) -> SimilarityFormula {
        self.formula
    }

    /// Factors of every document of `index`, keyed by embedding id and revision
    ///
    /// `stats` supplies the normalization range. Queries run in parallel;
    /// the first failing query aborts the computation.
    pub fn compute(
        &self,
        index: &dyn ScoringIndex,
        stats: &Statistic,
    ) -> SimilarityResult<BTreeMap<EntityKey, f64>> {
        let documents = index.documents()?;
        info!(
            target: "neurosim::boosting",
            count = documents.len(),
            neighborhood_size = self.neighborhood_size,
            formula = %self.formula,
            "Computing boosting factors"
        );

        let factors: Vec<(EntityKey, f64)> = documents
            .par_iter()
            .map(|doc| -> SimilarityResult<(EntityKey, f64)> {
                let neighbors = index.query(&doc.vector, self.formula, self.neighborhood_size)?;
                let scores: Vec<f64> = neighbors
                    .iter()
                    .filter(|n| n.id != doc.id)
                    .map(|n| n.score)
                    .collect();
                let factor = 1.0 + score_deviation(&scores, stats.min, stats.max);
                debug!(target: "neurosim::boosting", embedding = %doc.id, neighbors = scores.len(), factor, "Boosting factor");
                Ok((EntityKey::new(doc.id.clone(), doc.rev), factor))
            })
            .collect::<SimilarityResult<_>>()?;

        Ok(factors.into_iter().collect())
    }
}

fn boosting_name(embedding: &EntityKey) -> String {
    format!(
        "Boosting factor of {} at revision {}",
        last_segment(&embedding.id),
        embedding.rev
    )
}

/// Create-or-update one boosting factor entity per embedding, then tag them
///
/// `view_id` is the scoring view the neighbors were drawn from; it is
/// recorded as used by the generating activity. Returns the number of
/// factors written.
pub fn register_boosting_factors(
    store: &dyn EntityStore,
    view_id: &str,
    factors: &BTreeMap<EntityKey, f64>,
    formula: SimilarityFormula,
    tag: &str,
) -> SimilarityResult<usize> {
    let view = EntityRef::latest(view_id, VIEW_TYPE);
    let mut created = Vec::new();
    let mut updated = Vec::new();

    for (embedding, value) in factors {
        let derivation = vec![EntityRef::pinned(
            embedding.id.clone(),
            embedding.rev,
            EntityType::Embedding.as_str(),
        )];
        let generation = Generation {
            used: vec![view.clone()],
            was_associated_with: agents::was_associated_with(false),
        };
        let body = EntityBody::BoostingFactor {
            value: *value,
            formula,
        };

        let filter = EntityFilter::of_type(EntityType::SimilarityBoostingFactor)
            .derived_from(embedding.id.as_str())
            .active();
        match fetch_one(store, &filter, "boosting factor")? {
            Some(mut existing) => {
                existing.body = body;
                existing.derivation = derivation;
                existing.generation = Some(generation);
                existing.name = Some(boosting_name(embedding));
                updated.push(existing);
            }
            None => {
                let mut factor = Entity::new(
                    store.bucket().mint_id(),
                    EntityType::SimilarityBoostingFactor.as_str(),
                    body,
                )
                .with_name(boosting_name(embedding));
                factor.derivation = derivation;
                factor.generation = Some(generation);
                created.push(factor);
            }
        }
    }

    let created_result = persist_batch(store, &mut created, PersistAction::Create, Some(tag), "boosting factors");
    let updated_result = persist_batch(store, &mut updated, PersistAction::Update, Some(tag), "boosting factors");
    Ok(created_result? + updated_result?)
}

/// Boosting factor values of view documents, keyed by embedding id
///
/// Documents that are not boosting factors, or carry no embedding
/// derivation, are ignored.
pub fn boosting_from_documents(documents: &[Entity]) -> BTreeMap<String, f64> {
    documents
        .iter()
        .filter_map(|doc| match &doc.body {
            EntityBody::BoostingFactor { value, .. } => doc
                .derivation_of(EntityType::Embedding.as_str())
                .map(|embedding| (embedding.id.clone(), *value)),
            _ => None,
        })
        .collect()
}
