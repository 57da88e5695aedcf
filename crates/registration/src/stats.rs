//! Score statistics of a scoring view
//!
//! Statistics are always recomputed from scratch: every document is
//! queried against the whole corpus, its self-match dropped, and all
//! remaining scores pooled into one population.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, info};

use neurosim_core::{
    last_segment, Entity, EntityBody, EntityFilter, EntityRef, EntityStore, EntityType,
    Generation, ScoringIndex, SimilarityFormula, SimilarityResult, Statistic,
};

use crate::agents;
use crate::fetch::fetch_one;
use crate::persist::{persist_batch, PersistAction};

/// Type recorded for aggregated scoring views in statistic derivations
pub const AGGREGATED_VIEW_TYPE: &str = "AggregateElasticSearchView";

const PROGRESS_EVERY: usize = 100;

/// Pools neighbor scores into a [`Statistic`]
#[derive(Debug, Clone, Copy)]
pub struct StatisticsAggregator {
    formula: SimilarityFormula,
}

impl StatisticsAggregator {
    /// Aggregator scoring under `formula`
    pub fn new(formula: SimilarityFormula) -> Self {
        StatisticsAggregator { formula }
    }

    /// Statistic of every non-self score in `index`
    ///
    /// With `boosting`, each score of a query document is multiplied by
    /// that document's factor (1 when it has none).
    pub fn compute(
        &self,
        index: &dyn ScoringIndex,
        boosting: Option<&BTreeMap<String, f64>>,
    ) -> SimilarityResult<Statistic> {
        let documents = index.documents()?;
        let size = documents.len();
        info!(
            target: "neurosim::stats",
            count = size,
            formula = %self.formula,
            boosted = boosting.is_some(),
            "Computing statistics"
        );

        let done = AtomicUsize::new(0);
        let per_document: Vec<Vec<f64>> = documents
            .par_iter()
            .map(|doc| -> SimilarityResult<Vec<f64>> {
                let factor = boosting
                    .and_then(|b| b.get(&doc.id).copied())
                    .unwrap_or(1.0);
                let scores: Vec<f64> = index
                    .query(&doc.vector, self.formula, size)?
                    .into_iter()
                    .filter(|n| n.id != doc.id)
                    .map(|n| n.score * factor)
                    .collect();

                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if n % PROGRESS_EVERY == 0 {
                    debug!(target: "neurosim::stats", done = n, total = size, "Scored documents");
                }
                Ok(scores)
            })
            .collect::<SimilarityResult<_>>()?;

        let scores: Vec<f64> = per_document.into_iter().flatten().collect();
        let statistic = Statistic::from_scores(&scores);
        info!(
            target: "neurosim::stats",
            count = statistic.count,
            min = statistic.min,
            max = statistic.max,
            mean = statistic.mean,
            std = statistic.std,
            "Computed statistics"
        );
        Ok(statistic)
    }
}

fn stats_name(view_id: &str, boosted: bool) -> String {
    let kind = if boosted { "Boosted" } else { "Non-boosted" };
    format!("{} statistics of view {}", kind, last_segment(view_id))
}

/// Create-or-update the statistic of `view_id`, tag it, and return its id
///
/// Boosted and non-boosted statistics of one view are separate entities.
pub fn register_stats(
    store: &dyn EntityStore,
    view_id: &str,
    statistic: &Statistic,
    formula: SimilarityFormula,
    tag: &str,
    boosted: bool,
) -> SimilarityResult<String> {
    let filter = EntityFilter::of_type(EntityType::ElasticSearchViewStatistics)
        .boosted(boosted)
        .derived_from(view_id)
        .active();
    let body = EntityBody::Statistics {
        boosted,
        formula,
        series: statistic.to_series(),
    };
    let derivation = vec![EntityRef::latest(view_id, AGGREGATED_VIEW_TYPE)];

    let (mut batch, action) = match fetch_one(store, &filter, "statistic")? {
        Some(mut existing) => {
            existing.body = body;
            existing.derivation = derivation;
            (vec![existing], PersistAction::Update)
        }
        None => {
            let mut entity = Entity::new(
                store.bucket().mint_id(),
                EntityType::ElasticSearchViewStatistics.as_str(),
                body,
            )
            .with_name(stats_name(view_id, boosted));
            entity.derivation = derivation;
            entity.generation = Some(Generation {
                used: Vec::new(),
                was_associated_with: agents::was_associated_with(false),
            });
            (vec![entity], PersistAction::Create)
        }
    };

    persist_batch(store, &mut batch, action, Some(tag), "statistics")?;
    Ok(batch.swap_remove(0).id)
}

/// Read a registered statistic back by id
pub fn fetch_stats(store: &dyn EntityStore, id: &str) -> SimilarityResult<Option<Statistic>> {
    match store.retrieve(id, None)? {
        Some(entity) => Ok(Some(Statistic::from_entity(&entity)?)),
        None => Ok(None),
    }
}
