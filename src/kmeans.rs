//! K-means training for IVF partitioning.
//!
//! Implements Lloyd's algorithm with a choice of random or k-means++
//! centroid initialization and a low-occupancy reassignment heuristic:
//! each iteration, the training columns with the worst assignment scores
//! are moved onto the emptiest partitions, which keeps pathological tiny
//! partitions from surviving to convergence. Training is deterministic for
//! a fixed seed regardless of thread count.

use crate::constants::kmeans as defaults;
use crate::distance::l2_squared_f32;
use crate::error::{QuarryDbError, Result};
use crate::heap::{FixedMaxHeap, FixedMinHeap};
use crate::matrix::{Element, Layout, Matrix};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

/// Centroid initialization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMethod {
    /// Caller supplies initial centroids via [`KMeans::train_from`].
    None,
    /// Sample `nlist` distinct training columns uniformly.
    Random,
    /// k-means++ (Arthur and Vassilvitskii, 2007): each new centroid is
    /// drawn with probability proportional to its squared distance from the
    /// nearest centroid chosen so far.
    KMeansPlusPlus,
}

/// Non-fatal conditions observed during training.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingWarning {
    /// The centroid movement never fell below the tolerance.
    NotConverged {
        /// Iterations actually executed.
        iterations: usize,
    },
    /// Some partitions had no members after the final iteration.
    EmptyPartitions {
        /// How many partitions ended empty.
        count: usize,
    },
}

/// Result of a training run. Warnings are diagnostics, not failures: the
/// centroid matrix is valid either way.
#[derive(Debug)]
pub struct TrainOutcome {
    /// Trained centroids, col-major `D x nlist`.
    pub centroids: Matrix<f32>,
    /// Lloyd iterations executed.
    pub iterations: usize,
    /// Whether the convergence test passed.
    pub converged: bool,
    /// Non-fatal diagnostics.
    pub warnings: Vec<TrainingWarning>,
}

/// K-means trainer.
///
/// # Example
/// ```ignore
/// let outcome = KMeans::new(16, 10)
///     .with_seed(42)
///     .with_init(InitMethod::KMeansPlusPlus)
///     .train(&training_set)?;
/// ```
#[derive(Debug, Clone)]
pub struct KMeans {
    nlist: usize,
    max_iter: usize,
    tol: f64,
    reassign_ratio: f64,
    seed: Option<u64>,
    init: InitMethod,
}

impl KMeans {
    /// Create a trainer for `nlist` partitions with up to `max_iter` Lloyd
    /// iterations and default tolerance, reassignment ratio, and init.
    pub fn new(nlist: usize, max_iter: usize) -> Self {
        Self {
            nlist,
            max_iter,
            tol: defaults::DEFAULT_TOL,
            reassign_ratio: defaults::DEFAULT_REASSIGN_RATIO,
            seed: None,
            init: InitMethod::KMeansPlusPlus,
        }
    }

    /// Set the convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the low-occupancy reassignment ratio.
    pub fn with_reassign_ratio(mut self, ratio: f64) -> Self {
        self.reassign_ratio = ratio;
        self
    }

    /// Seed the random number generator for deterministic initialization.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Choose the initialization method.
    pub fn with_init(mut self, init: InitMethod) -> Self {
        self.init = init;
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn validate<T: Element>(&self, training: &Matrix<T>) -> Result<()> {
        if self.nlist == 0 {
            return Err(QuarryDbError::config("nlist must be nonzero"));
        }
        if training.layout() != Layout::ColMajor {
            return Err(QuarryDbError::config(
                "training set must be col-major (one vector per column)",
            ));
        }
        if training.num_cols() < self.nlist {
            return Err(QuarryDbError::insufficient_vectors(
                self.nlist,
                training.num_cols(),
            ));
        }
        if training.raveled().iter().any(|v| !v.to_f32().is_finite()) {
            return Err(QuarryDbError::config(
                "training set contains non-finite values",
            ));
        }
        Ok(())
    }

    /// Train centroids using the configured initialization.
    ///
    /// # Errors
    /// `Config` for a zero `nlist`, a row-major training set, non-finite
    /// input, or `InitMethod::None` (which needs explicit centroids);
    /// `InsufficientVectors` when `nlist` exceeds the column count.
    pub fn train<T: Element>(&self, training: &Matrix<T>) -> Result<TrainOutcome> {
        self.validate(training)?;

        let mut rng = self.rng();
        let centroids = match self.init {
            InitMethod::None => {
                return Err(QuarryDbError::config(
                    "initialization `None` requires train_from with explicit centroids",
                ))
            }
            InitMethod::Random => self.random_init(training, &mut rng),
            InitMethod::KMeansPlusPlus => self.kmeans_pp_init(training, &mut rng),
        };

        Ok(self.lloyd(training, centroids))
    }

    /// Train starting from caller-supplied centroids, skipping
    /// initialization.
    pub fn train_from<T: Element>(
        &self,
        training: &Matrix<T>,
        centroids: Matrix<f32>,
    ) -> Result<TrainOutcome> {
        self.validate(training)?;
        if centroids.num_rows() != training.num_rows() || centroids.num_cols() != self.nlist {
            return Err(QuarryDbError::config(format!(
                "initial centroids are {}x{}, expected {}x{}",
                centroids.num_rows(),
                centroids.num_cols(),
                training.num_rows(),
                self.nlist
            )));
        }
        Ok(self.lloyd(training, centroids))
    }

    /// Assign every column of `vectors` to its nearest centroid.
    pub fn predict<T: Element>(centroids: &Matrix<f32>, vectors: &Matrix<T>) -> Vec<u64> {
        Self::assign(centroids, vectors)
            .into_iter()
            .map(|(_, part)| part)
            .collect()
    }

    /// Sample `nlist` distinct column indices and copy them into centroids.
    fn random_init<T: Element>(&self, training: &Matrix<T>, rng: &mut StdRng) -> Matrix<f32> {
        let dim = training.num_rows();
        let mut centroids = Matrix::<f32>::col_major(dim, self.nlist);

        let chosen = rand::seq::index::sample(rng, training.num_cols(), self.nlist);
        for (c, idx) in chosen.into_iter().enumerate() {
            let dst = centroids.col_mut(c);
            for (slot, value) in dst.iter_mut().zip(training.col(idx)) {
                *slot = value.to_f32();
            }
        }
        centroids
    }

    /// k-means++: keep a table of each column's squared distance to the
    /// nearest chosen centroid and draw the next centroid from the
    /// distance-weighted distribution.
    fn kmeans_pp_init<T: Element>(&self, training: &Matrix<T>, rng: &mut StdRng) -> Matrix<f32> {
        let dim = training.num_rows();
        let num_cols = training.num_cols();
        let mut centroids = Matrix::<f32>::col_major(dim, self.nlist);

        let first = rng.gen_range(0..num_cols);
        for (slot, value) in centroids.col_mut(0).iter_mut().zip(training.col(first)) {
            *slot = value.to_f32();
        }

        // Large finite sentinel, leaving headroom so the weighted draw
        // cannot overflow before any distance has been computed.
        let mut distances = vec![f64::MAX / defaults::INITIAL_DISTANCE_DIVISOR; num_cols];

        for i in 1..self.nlist {
            // Only the newest centroid can lower a column's distance.
            let newest: Vec<f32> = centroids.col(i - 1).to_vec();
            distances = distances
                .par_iter()
                .enumerate()
                .map(|(j, &current)| {
                    let d = l2_squared_f32(training.col(j), &newest) as f64;
                    current.min(d)
                })
                .collect();

            // `WeightedIndex` normalizes the unnormalized weights for us.
            // All-zero weights happen when every remaining column coincides
            // with a chosen centroid; fall back to a uniform draw.
            let next = match WeightedIndex::new(&distances) {
                Ok(dist) => dist.sample(rng),
                Err(_) => rng.gen_range(0..num_cols),
            };
            for (slot, value) in centroids.col_mut(i).iter_mut().zip(training.col(next)) {
                *slot = value.to_f32();
            }
            distances[next] = 0.0;
        }

        centroids
    }

    /// Nearest-centroid assignment with achieved scores, parallel over
    /// columns.
    fn assign<T: Element>(centroids: &Matrix<f32>, training: &Matrix<T>) -> Vec<(f32, u64)> {
        let nlist = centroids.num_cols();
        (0..training.num_cols())
            .into_par_iter()
            .map(|j| {
                let col = training.col(j);
                let mut best_score = f32::MAX;
                let mut best_part = 0u64;
                for p in 0..nlist {
                    let d = l2_squared_f32(col, centroids.col(p));
                    if d < best_score {
                        best_score = d;
                        best_part = p as u64;
                    }
                }
                (best_score, best_part)
            })
            .collect()
    }

    fn lloyd<T: Element>(&self, training: &Matrix<T>, mut centroids: Matrix<f32>) -> TrainOutcome {
        let dim = training.num_rows();

        let mut new_centroids = Matrix::<f32>::col_major(dim, self.nlist);
        let mut degrees = vec![0u64; self.nlist];
        let mut iterations = 0;
        let mut converged = false;

        let heap_size = (self.reassign_ratio * self.nlist as f64).ceil() as usize
            + defaults::REASSIGN_HEAP_PAD;

        for iter in 0..self.max_iter {
            iterations = iter + 1;

            let scored = Self::assign(&centroids, training);

            new_centroids.fill_default();
            degrees.fill(0);

            let mut high_scores = FixedMaxHeap::<f32, u64>::new(heap_size);
            for (i, &(score, part)) in scored.iter().enumerate() {
                let centroid = new_centroids.col_mut(part as usize);
                for (slot, value) in centroid.iter_mut().zip(training.col(i)) {
                    *slot += value.to_f32();
                }
                degrees[part as usize] += 1;
                high_scores.insert(score, i as u64);
            }

            let mut max_degree = 0u64;
            let mut low_degrees = FixedMinHeap::<u64, u64>::new(heap_size);
            for (p, &degree) in degrees.iter().enumerate() {
                max_degree = max_degree.max(degree);
                low_degrees.insert(degree, p as u64);
            }
            let lower_bound = (max_degree as f64 * self.reassign_ratio).ceil() as u64;

            // Rescue low-occupancy partitions with the worst-fitting
            // columns. Skipped on the final iteration so the returned
            // centroids match the last assignment.
            if iter != self.max_iter - 1 {
                let low = low_degrees.into_sorted_vec();
                let high = high_scores.into_sorted_vec();
                for (&(degree, low_part), &(_, high_col)) in low.iter().zip(high.iter()) {
                    if degree > lower_bound {
                        break;
                    }
                    let high_col = high_col as usize;
                    let old_part = scored[high_col].1 as usize;
                    let vector = training.col(high_col);

                    let low_centroid = new_centroids.col_mut(low_part as usize);
                    for (slot, value) in low_centroid.iter_mut().zip(vector) {
                        *slot = value.to_f32();
                    }
                    let old_centroid = new_centroids.col_mut(old_part);
                    for (slot, value) in old_centroid.iter_mut().zip(vector) {
                        *slot -= value.to_f32();
                    }
                    degrees[low_part as usize] += 1;
                    degrees[old_part] -= 1;
                }
            }

            // Normalise occupied columns and test convergence. Empty
            // partitions keep a zero column; it differs from the old
            // centroid by the old centroid's norm and will attract points
            // on the next pass.
            let mut max_diff = 0.0f64;
            let mut total_weight = 0.0f64;
            for p in 0..self.nlist {
                if degrees[p] != 0 {
                    let inv = 1.0 / degrees[p] as f32;
                    for value in new_centroids.col_mut(p) {
                        *value *= inv;
                        total_weight += (*value as f64) * (*value as f64);
                    }
                }
                let diff = l2_squared_f32(centroids.col(p), new_centroids.col(p)) as f64;
                max_diff = max_diff.max(diff);
            }

            std::mem::swap(&mut centroids, &mut new_centroids);

            if max_diff < self.tol * total_weight {
                converged = true;
                break;
            }
        }

        let mut warnings = Vec::new();
        if !converged {
            warnings.push(TrainingWarning::NotConverged { iterations });
        }
        let empty = degrees.iter().filter(|&&d| d == 0).count();
        if empty > 0 {
            warnings.push(TrainingWarning::EmptyPartitions { count: empty });
        }

        TrainOutcome {
            centroids,
            iterations,
            converged,
            warnings,
        }
    }
}
