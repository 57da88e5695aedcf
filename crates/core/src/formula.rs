//! Similarity scoring formulas
//!
//! A formula has two faces: the textual script a scoring index evaluates
//! ([`SimilarityFormula::get_formula`]) and the same score computed natively
//! ([`SimilarityFormula::score`]). All scores are "higher = more similar".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SimilarityError, SimilarityResult};

/// Scoring formula used by neighbor queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityFormula {
    /// Cosine similarity shifted into [0, 2]
    Cosine,
    /// 1 / (1 + L2 distance), in (0, 1]
    Euclidean,
    /// 1 / (1 + hyperbolic distance in the Poincare ball), in (0, 1]
    Poincare,
}

impl SimilarityFormula {
    /// Name stored on boosting and statistic entities
    pub fn value(&self) -> &'static str {
        match self {
            SimilarityFormula::Cosine => "cosine",
            SimilarityFormula::Euclidean => "euclidean",
            SimilarityFormula::Poincare => "poincare",
        }
    }

    /// Parse from a name (case-insensitive)
    pub fn parse(s: &str) -> SimilarityResult<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(SimilarityFormula::Cosine),
            "euclidean" | "l2" => Ok(SimilarityFormula::Euclidean),
            "poincare" => Ok(SimilarityFormula::Poincare),
            other => Err(SimilarityError::InvalidConfig(format!(
                "Unknown similarity formula '{}'. Expected \"cosine\", \"euclidean\" or \"poincare\".",
                other
            ))),
        }
    }

    /// Script form accepted by the scoring index
    ///
    /// The query vector is bound to `params.query_vector` and the indexed
    /// field is `embedding`.
    pub fn get_formula(&self) -> &'static str {
        match self {
            SimilarityFormula::Cosine => "cosineSimilarity(params.query_vector, 'embedding') + 1.0",
            SimilarityFormula::Euclidean => "1 / (1 + l2norm(params.query_vector, 'embedding'))",
            SimilarityFormula::Poincare => {
                "1 / (1 + arcosh(1 + 2 * Math.pow(l2norm(params.query_vector, 'embedding'), 2) \
                 / ((1 - Math.pow(l2norm(params.query_vector), 2)) \
                 * (1 - Math.pow(l2norm('embedding'), 2)))))"
            }
        }
    }

    /// Native evaluation of the formula
    ///
    /// Vectors must have the same length.
    pub fn score(&self, query: &[f64], doc: &[f64]) -> f64 {
        debug_assert_eq!(query.len(), doc.len(), "Dimension mismatch in scoring");

        match self {
            SimilarityFormula::Cosine => cosine_similarity(query, doc) + 1.0,
            SimilarityFormula::Euclidean => 1.0 / (1.0 + l2_distance(query, doc)),
            SimilarityFormula::Poincare => 1.0 / (1.0 + poincare_distance(query, doc)),
        }
    }
}

impl fmt::Display for SimilarityFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn squared_norm(a: &[f64]) -> f64 {
    dot(a, a)
}

fn squared_l2(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Returns 0.0 if either vector has zero norm
fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let norm_a = squared_norm(a).sqrt();
    let norm_b = squared_norm(b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (norm_a * norm_b)
}

fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    squared_l2(a, b).sqrt()
}

// Points on or outside the unit ball are clamped just inside it.
fn poincare_distance(a: &[f64], b: &[f64]) -> f64 {
    const EPS: f64 = 1e-9;
    let denom_a = (1.0 - squared_norm(a)).max(EPS);
    let denom_b = (1.0 - squared_norm(b)).max(EPS);
    let arg = 1.0 + 2.0 * squared_l2(a, b) / (denom_a * denom_b);
    arg.acosh()
}
