//! Vector Store
//!
//! Exact nearest-neighbour search by inner product over a dense matrix of
//! pre-normalized vectors (inner product == cosine similarity).

use crate::error::{Nl2SqlError, Result};
use crate::schema_rag::embedder::Embedding;
use std::cmp::Ordering;

/// Nearest-neighbour collaborator.
pub trait VectorIndex: Send + Sync {
    /// Up to `k` `(row, score)` pairs, by descending score; equal scores keep
    /// ascending row order.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> usize;
}

/// Flat inner-product index. Rows are stored contiguously.
#[derive(Debug, Clone)]
pub struct FlatIpIndex {
    dimension: usize,
    data: Vec<f32>,
    rows: usize,
}

impl FlatIpIndex {
    pub fn build(vectors: &[Embedding]) -> Result<Self> {
        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if vectors.iter().any(|v| v.len() != dimension) {
            return Err(Nl2SqlError::Index(
                "All vectors in an index must share one dimension".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(dimension * vectors.len());
        for v in vectors {
            data.extend_from_slice(v);
        }

        Ok(Self {
            dimension,
            data,
            rows: vectors.len(),
        })
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }
}

impl VectorIndex for FlatIpIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if self.rows == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Nl2SqlError::Index(format!(
                "Query embedding dimension {} doesn't match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = (0..self.rows)
            .map(|i| (i, inner_product(query, self.row(i))))
            .collect();

        // Stable sort keeps enumeration order for ties.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.rows
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_orders_by_score() {
        let index = FlatIpIndex::build(&[
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.6, 0.8],
        ])
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let rows: Vec<usize> = hits.iter().map(|(i, _)| *i).collect();
        assert_eq!(rows, vec![1, 2, 0]);
        assert_eq!(hits[0].1, 1.0);
    }

    #[test]
    fn test_ties_keep_enumeration_order() {
        let index = FlatIpIndex::build(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits, vec![(0, 1.0), (2, 1.0)]);
    }

    #[test]
    fn test_k_larger_than_rows() {
        let index = FlatIpIndex::build(&[vec![1.0]]).unwrap();
        assert_eq!(index.search(&[1.0], 10).unwrap().len(), 1);
        assert!(index.search(&[1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(FlatIpIndex::build(&[vec![1.0, 0.0], vec![1.0]]).is_err());
        let index = FlatIpIndex::build(&[vec![1.0, 0.0]]).unwrap();
        assert!(matches!(index.search(&[1.0], 1), Err(Nl2SqlError::Index(_))));
    }
}
