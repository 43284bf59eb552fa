//! Flat vector index with exhaustive squared-L2 search

use crate::indexer::error::IndexError;

/// Brute-force nearest-neighbour index
///
/// The dimension is fixed by the first vector added.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dimension: Option<usize>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vector; its position is its id
    pub fn add(&mut self, vector: Vec<f32>) -> Result<usize, IndexError> {
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            None => self.dimension = Some(vector.len()),
            _ => {}
        }
        self.vectors.push(vector);
        Ok(self.vectors.len() - 1)
    }

    /// The `k` nearest vectors as `(id, squared distance)`, closest first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if let Some(expected) = self.dimension {
            if expected != query.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, v)| (id, squared_l2(v, query)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Number of vectors
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the index holds no vectors
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
