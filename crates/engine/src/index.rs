//! Brute-force scoring index
//!
//! O(n) scan over a snapshot of indexed embeddings. Sufficient for the
//! corpus sizes the pipeline is tested with; scores come straight from
//! [`SimilarityFormula::score`], which is the local rendition of the script
//! a remote index would evaluate.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use neurosim_core::{
    IndexedVector, Neighbor, ScoringIndex, SimilarityError, SimilarityFormula, SimilarityResult,
};

/// Scoring index over a fixed set of vectors
#[derive(Debug, Clone, Default)]
pub struct BruteForceIndex {
    /// Documents by embedding id
    docs: BTreeMap<String, IndexedVector>,
    dimension: Option<usize>,
}

impl BruteForceIndex {
    /// Empty index
    pub fn new() -> Self {
        BruteForceIndex::default()
    }

    /// Index the given documents
    ///
    /// Every vector must have the dimension of the first one. A later
    /// document with an id already indexed replaces the earlier one.
    pub fn from_documents(
        documents: impl IntoIterator<Item = IndexedVector>,
    ) -> SimilarityResult<Self> {
        let mut index = BruteForceIndex::new();
        for doc in documents {
            index.insert(doc)?;
        }
        Ok(index)
    }

    /// Add or replace one document
    pub fn insert(&mut self, doc: IndexedVector) -> SimilarityResult<()> {
        match self.dimension {
            Some(expected) if expected != doc.vector.len() => {
                return Err(SimilarityError::DimensionMismatch {
                    expected,
                    got: doc.vector.len(),
                });
            }
            None => self.dimension = Some(doc.vector.len()),
            _ => {}
        }
        self.docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    /// Dimension of the indexed vectors, once any is indexed
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

impl ScoringIndex for BruteForceIndex {
    fn query(
        &self,
        vector: &[f64],
        formula: SimilarityFormula,
        size: usize,
    ) -> SimilarityResult<Vec<Neighbor>> {
        if size == 0 || self.docs.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension {
            if vector.len() != expected {
                return Err(SimilarityError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }

        // BTreeMap iteration is in id order
        let mut results: Vec<Neighbor> = self
            .docs
            .values()
            .map(|doc| Neighbor {
                id: doc.id.clone(),
                score: formula.score(vector, &doc.vector),
            })
            .collect();

        // Sort by (score desc, id asc) for determinism
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        results.truncate(size);
        Ok(results)
    }

    fn documents(&self) -> SimilarityResult<Vec<IndexedVector>> {
        Ok(self.docs.values().cloned().collect())
    }

    fn len(&self) -> SimilarityResult<usize> {
        Ok(self.docs.len())
    }
}
