//! The IVF index façade: build, open, search.
//!
//! Ties the subsystems together. `build` trains centroids on the corpus,
//! assigns and reshuffles it, and persists the result as a group; `open`
//! reloads the resident pieces (centroids and partition offsets) and leaves
//! the corpus on disk; `search` picks the scoring path from the configured
//! memory budget — a zero `upper_bound` loads the whole corpus, anything
//! else streams bounded batches.

use crate::codec::partition_corpus;
use crate::error::{QuarryDbError, Result};
use crate::group::{GroupMeta, IvfGroup};
use crate::kmeans::{InitMethod, KMeans, TrainingWarning};
use crate::loader::PartitionLoader;
use crate::matrix::{Element, Matrix};
use crate::query::{query_finite_ram, query_infinite_ram, top_centroids, ProbeSet, QueryResult};
use crate::store::DenseArray;
use std::path::Path;

/// Parameters for building an IVF index.
#[derive(Debug, Clone)]
pub struct BuildParams {
    /// Number of partitions (k-means clusters).
    pub nlist: usize,
    /// Centroid initialization method.
    pub init: InitMethod,
    /// Maximum Lloyd iterations.
    pub max_iter: usize,
    /// Convergence tolerance.
    pub tol: f64,
    /// Low-occupancy reassignment ratio.
    pub reassign_ratio: f64,
    /// Seed for deterministic training.
    pub seed: Option<u64>,
}

impl BuildParams {
    /// Defaults for `nlist` partitions.
    pub fn new(nlist: usize) -> Self {
        Self {
            nlist,
            init: InitMethod::KMeansPlusPlus,
            max_iter: crate::constants::kmeans::DEFAULT_MAX_ITERATIONS,
            tol: crate::constants::kmeans::DEFAULT_TOL,
            reassign_ratio: crate::constants::kmeans::DEFAULT_REASSIGN_RATIO,
            seed: None,
        }
    }

    /// Set the training seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the initialization method.
    pub fn with_init(mut self, init: InitMethod) -> Self {
        self.init = init;
        self
    }

    /// Set the maximum iteration count.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
}

/// Parameters for searching an IVF index.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Number of nearest partitions scanned per query.
    pub nprobe: usize,
    /// Neighbors returned per query.
    pub k: usize,
    /// Maximum columns resident per batch; 0 loads the whole corpus.
    pub upper_bound: usize,
    /// Worker count for the scoring phase.
    pub nthreads: usize,
}

impl SearchParams {
    /// Defaults: stream-free search with every available core.
    pub fn new(nprobe: usize, k: usize) -> Self {
        Self {
            nprobe,
            k,
            upper_bound: 0,
            nthreads: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }

    /// Bound the per-batch working set.
    pub fn with_upper_bound(mut self, upper_bound: usize) -> Self {
        self.upper_bound = upper_bound;
        self
    }

    /// Set the worker count.
    pub fn with_nthreads(mut self, nthreads: usize) -> Self {
        self.nthreads = nthreads;
        self
    }
}

/// An opened IVF index: resident centroids and offsets over an on-disk
/// group.
#[derive(Debug)]
pub struct IvfIndex {
    group: IvfGroup,
    centroids: Matrix<f32>,
    indices: Vec<u64>,
}

impl IvfIndex {
    /// Train, partition, and persist `corpus` as a new index at
    /// `group_path`.
    ///
    /// Returns the opened index and any non-fatal training diagnostics.
    ///
    /// # Errors
    /// Training errors (`Config`, `InsufficientVectors`), partitioning
    /// `DataIntegrity`, and store write failures.
    pub fn build<T: Element>(
        corpus: &Matrix<T>,
        params: &BuildParams,
        group_path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<TrainingWarning>)> {
        let mut trainer = KMeans::new(params.nlist, params.max_iter)
            .with_tol(params.tol)
            .with_reassign_ratio(params.reassign_ratio)
            .with_init(params.init);
        if let Some(seed) = params.seed {
            trainer = trainer.with_seed(seed);
        }

        let outcome = trainer.train(corpus)?;
        let assignments = KMeans::predict(&outcome.centroids, corpus);
        let partitioned = partition_corpus(corpus, &assignments, params.nlist)?;

        let group = IvfGroup::create(group_path)?;
        group.write_index(
            &outcome.centroids,
            &partitioned,
            GroupMeta::now(corpus.num_cols() as u64),
        )?;

        Ok((
            Self {
                group,
                centroids: outcome.centroids,
                indices: partitioned.indices,
            },
            outcome.warnings,
        ))
    }

    /// Open an existing index, loading centroids and partition offsets.
    pub fn open(group_path: impl AsRef<Path>) -> Result<Self> {
        let group = IvfGroup::open(group_path)?;
        let centroids = group.load_centroids()?;
        let indices = group.load_indices()?;
        if indices.len() != centroids.num_cols() + 1 {
            return Err(QuarryDbError::data_integrity(format!(
                "{} partition offsets for {} centroids",
                indices.len(),
                centroids.num_cols()
            )));
        }
        Ok(Self {
            group,
            centroids,
            indices,
        })
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.centroids.num_rows()
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.centroids.num_cols()
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        *self.indices.last().unwrap_or(&0) as usize
    }

    /// True if the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The trained centroids.
    pub fn centroids(&self) -> &Matrix<f32> {
        &self.centroids
    }

    /// The underlying group.
    pub fn group(&self) -> &IvfGroup {
        &self.group
    }

    /// Top-k search over `queries` (col-major, one query per column).
    ///
    /// `params.nprobe` is clamped to the partition count. With
    /// `upper_bound == 0` the whole corpus is materialized and scored
    /// query-outer; otherwise partitions stream through a bounded window
    /// and are scored partition-outer. Both paths return identical top-k
    /// sets.
    ///
    /// # Errors
    /// `DimensionMismatch` if queries disagree with the index dimension;
    /// `SchemaMismatch` if `T` does not match the stored corpus type; any
    /// store or integrity failure from the scoring path.
    pub fn search<T: Element>(
        &self,
        queries: &Matrix<T>,
        params: &SearchParams,
    ) -> Result<QueryResult> {
        if queries.num_rows() != self.dimension() {
            return Err(QuarryDbError::dimension_mismatch(
                self.dimension(),
                queries.num_rows(),
            ));
        }
        if params.k == 0 {
            return Err(QuarryDbError::config("k must be nonzero"));
        }
        let nprobe = params.nprobe.min(self.num_partitions()).max(1);

        if params.upper_bound == 0 {
            let parts = self.group.load_parts::<T>()?;
            let ids = self.group.load_ids()?;
            return query_infinite_ram(
                &parts,
                &ids,
                &self.indices,
                &self.centroids,
                queries,
                nprobe,
                params.k,
            );
        }

        let top = top_centroids(&self.centroids, queries, nprobe)?;
        let probes = ProbeSet::from_top_centroids(&top);

        let mut loader = PartitionLoader::<T>::new(
            DenseArray::open_read(self.group.parts_path())?,
            DenseArray::open_read(self.group.ids_path())?,
            self.indices.clone(),
            probes.active_partitions(),
            params.upper_bound,
        )?;

        query_finite_ram(&mut loader, &probes, queries, params.k, params.nthreads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use tempfile::tempdir;

    #[test]
    fn test_build_open_search() {
        let dir = tempdir().unwrap();
        let dataset = Dataset::clustered(300, 0, 8, 5, 21);

        let params = BuildParams::new(5).with_seed(21).with_max_iter(10);
        let (index, _warnings) =
            IvfIndex::build(&dataset.vectors, &params, dir.path().join("g")).unwrap();
        assert_eq!(index.num_partitions(), 5);
        assert_eq!(index.len(), 300);
        assert!(!index.is_empty());

        // Query an indexed vector back out.
        let mut queries = Matrix::col_major(8, 1);
        queries
            .col_mut(0)
            .copy_from_slice(&dataset.vectors.col(17).to_vec());

        let reopened = IvfIndex::open(dir.path().join("g")).unwrap();
        assert_eq!(reopened.len(), 300);

        for nprobe in [1, 3, 5] {
            let result = reopened
                .search(&queries, &SearchParams::new(nprobe, 1))
                .unwrap();
            assert_eq!(result.ids.get(0, 0), 17);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempdir().unwrap();
        let dataset = Dataset::clustered(100, 0, 8, 4, 3);
        let (index, _) = IvfIndex::build(
            &dataset.vectors,
            &BuildParams::new(4).with_seed(3),
            dir.path().join("g"),
        )
        .unwrap();

        let queries = Matrix::<f32>::col_major(6, 1);
        assert!(matches!(
            index.search(&queries, &SearchParams::new(1, 1)),
            Err(QuarryDbError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_element_type_checked_at_search() {
        let dir = tempdir().unwrap();
        let dataset = Dataset::clustered(100, 0, 4, 4, 9);
        let (index, _) = IvfIndex::build(
            &dataset.vectors,
            &BuildParams::new(4).with_seed(9),
            dir.path().join("g"),
        )
        .unwrap();

        // The stored corpus is f32; asking for u8 must fail fast.
        let queries = Matrix::<u8>::col_major(4, 1);
        let err = index
            .search(&queries, &SearchParams::new(1, 1))
            .unwrap_err();
        assert!(matches!(err, QuarryDbError::SchemaMismatch { .. }));
    }
}
