//! Dataset utilities for generating and evaluating vector search.

use crate::distance::l2_squared;
use crate::heap::FixedMinHeap;
use crate::matrix::Matrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::collections::HashSet;

/// A synthetic dataset with vectors, queries, and optional ground truth.
///
/// Vectors are stored one per column, the layout every engine entry point
/// expects.
pub struct Dataset {
    /// Corpus vectors, col-major `dim x n_vectors`.
    pub vectors: Matrix<f32>,
    /// Query vectors, col-major `dim x n_queries`.
    pub queries: Matrix<f32>,
    /// Exact nearest-neighbor ids per query (column indices into
    /// `vectors`), filled by [`compute_ground_truth`](Dataset::compute_ground_truth).
    pub ground_truth: Vec<Vec<u64>>,
}

impl Dataset {
    /// Generate a clustered dataset: `n_centers` well-separated centers
    /// with points jittered around them, plus queries drawn the same way.
    /// Deterministic for a fixed seed.
    pub fn clustered(
        n_vectors: usize,
        n_queries: usize,
        dim: usize,
        n_centers: usize,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut centers = Matrix::<f32>::col_major(dim, n_centers);
        for c in 0..n_centers {
            for slot in centers.col_mut(c) {
                *slot = rng.gen_range(-100.0..100.0);
            }
        }

        let mut fill = |matrix: &mut Matrix<f32>, rng: &mut StdRng| {
            for j in 0..matrix.num_cols() {
                let center = rng.gen_range(0..n_centers);
                for i in 0..dim {
                    let value = centers.get(i, center) + rng.gen_range(-1.0..1.0);
                    matrix.set(i, j, value);
                }
            }
        };

        let mut vectors = Matrix::<f32>::col_major(dim, n_vectors);
        fill(&mut vectors, &mut rng);
        let mut queries = Matrix::<f32>::col_major(dim, n_queries);
        fill(&mut queries, &mut rng);

        Self {
            vectors,
            queries,
            ground_truth: Vec::new(),
        }
    }

    /// Compute exact nearest neighbors for every query by brute force.
    pub fn compute_ground_truth(&mut self, k: usize) {
        let n = self.vectors.num_cols();
        self.ground_truth = (0..self.queries.num_cols())
            .into_par_iter()
            .map(|j| {
                let q = self.queries.col(j);
                let mut heap = FixedMinHeap::<f32, u64>::new(k);
                for i in 0..n {
                    heap.insert(l2_squared(q, self.vectors.col(i)), i as u64);
                }
                heap.into_sorted_vec().into_iter().map(|(_, id)| id).collect()
            })
            .collect();
    }
}

/// Fraction of the true top-k found in `results` (order-insensitive).
pub fn recall_at_k(results: &[u64], ground_truth: &[u64], k: usize) -> f32 {
    if k == 0 {
        return 0.0;
    }
    let truth: HashSet<u64> = ground_truth.iter().take(k).copied().collect();
    let hits = results
        .iter()
        .take(k)
        .filter(|id| truth.contains(id))
        .count();
    hits as f32 / k as f32
}
