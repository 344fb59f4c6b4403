//! Named constants for configuration values.
//!
//! This module centralizes magic numbers and default values used throughout
//! the codebase, making them easier to find, document, and tune.

/// Constants for k-means training.
pub mod kmeans {
    /// Default convergence tolerance.
    /// Training stops when the largest squared centroid movement falls below
    /// `tol * total_weight`, where `total_weight` is the summed squared norm
    /// of the new centroids.
    pub const DEFAULT_TOL: f64 = 2.5e-5;

    /// Default fraction controlling the low-occupancy reassignment heuristic.
    /// Interacts with convergence; changing it requires re-validation against
    /// a recall benchmark.
    pub const DEFAULT_REASSIGN_RATIO: f64 = 0.075;

    /// Slack added to the reassignment heap capacity
    /// (`ceil(reassign_ratio * nlist) + REASSIGN_HEAP_PAD`).
    pub const REASSIGN_HEAP_PAD: usize = 5;

    /// Default number of Lloyd iterations before giving up on convergence.
    pub const DEFAULT_MAX_ITERATIONS: usize = 100;

    /// The k-means++ distance table starts at `f64::MAX / 8192` so that
    /// accumulating a few sentinel entries cannot overflow the weighted draw.
    pub const INITIAL_DISTANCE_DIVISOR: f64 = 8192.0;
}

/// Constants for query execution.
pub mod query {
    /// Distance reported for padding entries when a query reaches fewer than
    /// `k` candidates.
    pub const SENTINEL_DISTANCE: f32 = f32::INFINITY;

    /// Id reported for padding entries when a query reaches fewer than `k`
    /// candidates.
    pub const SENTINEL_ID: u64 = u64::MAX;
}
