//! Score statistics
//!
//! A [`Statistic`] summarises a flat population of similarity scores. It is
//! stored as a series of named values on an `ElasticSearchViewStatistics`
//! entity and read back from one.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityBody, SeriesEntry};
use crate::error::{SimilarityError, SimilarityResult};

/// Unit code of every series entry
pub const UNIT_CODE: &str = "dimensionless";

const MIN: &str = "min";
const MAX: &str = "max";
const MEAN: &str = "mean";
const STD: &str = "standard deviation";
const COUNT: &str = "N";

/// Summary statistics of a score population
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    /// Smallest score
    pub min: f64,
    /// Largest score
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    /// Number of scores
    pub count: usize,
}

impl Statistic {
    /// The statistic of an empty population
    ///
    /// Every value is zero so that `count == 0` is the only thing a
    /// caller needs to check.
    pub fn empty() -> Self {
        Statistic {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std: 0.0,
            count: 0,
        }
    }

    /// Reduce a score population
    pub fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return Statistic::empty();
        }

        let count = scores.len();
        let (min, max) = scores
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
                (lo.min(s), hi.max(s))
            });
        let mean = scores.iter().sum::<f64>() / count as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;

        Statistic {
            min,
            max,
            mean,
            std: variance.sqrt(),
            count,
        }
    }

    /// Whether the population was empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Series form stored on statistic entities
    pub fn to_series(&self) -> Vec<SeriesEntry> {
        [
            (MIN, self.min),
            (MAX, self.max),
            (MEAN, self.mean),
            (STD, self.std),
            (COUNT, self.count as f64),
        ]
        .iter()
        .map(|(name, value)| SeriesEntry {
            statistic: name.to_string(),
            unit_code: UNIT_CODE.to_string(),
            value: *value,
        })
        .collect()
    }

    /// Read back from a series
    pub fn from_series(series: &[SeriesEntry]) -> SimilarityResult<Self> {
        let get = |name: &str| {
            series
                .iter()
                .find(|e| e.statistic == name)
                .map(|e| e.value)
                .ok_or_else(|| {
                    SimilarityError::Serialization(format!(
                        "Statistic series has no '{}' entry",
                        name
                    ))
                })
        };

        Ok(Statistic {
            min: get(MIN)?,
            max: get(MAX)?,
            mean: get(MEAN)?,
            std: get(STD)?,
            count: get(COUNT)? as usize,
        })
    }

    /// Read back from a statistic entity
    pub fn from_entity(entity: &Entity) -> SimilarityResult<Self> {
        match &entity.body {
            EntityBody::Statistics { series, .. } => Statistic::from_series(series),
            _ => Err(SimilarityError::Serialization(format!(
                "Entity {} of type {} carries no statistics",
                entity.id, entity.entity_type
            ))),
        }
    }
}
