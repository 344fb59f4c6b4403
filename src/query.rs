//! IVF query execution.
//!
//! A query pass has three phases: pick the `nprobe` nearest centroids per
//! query vector, invert that relation into a per-partition list of
//! interested queries, then score the selected partitions. Scoring comes in
//! two loop orderings: the infinite-RAM path holds the whole reshuffled
//! corpus in memory and parallelizes over queries; the finite-RAM path
//! streams bounded batches of partitions through a [`PartitionLoader`] and
//! parallelizes over the partitions of each batch, with one heap grid per
//! worker merged serially at the end. Both produce the same top-k sets for
//! every query; only the order of equal-scored ties may differ.

use crate::constants::query::{SENTINEL_DISTANCE, SENTINEL_ID};
use crate::distance::{l2_squared, l2_squared_f32};
use crate::error::{QuarryDbError, Result};
use crate::heap::FixedMinHeap;
use crate::loader::PartitionLoader;
use crate::matrix::{Element, Matrix};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Top-k results for a batch of queries: `k x num_queries` col-major
/// matrices of ascending distances and the matching vector ids. Queries
/// that reach fewer than `k` candidates are padded with
/// `(f32::INFINITY, u64::MAX)`.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Euclidean-squared distances, ascending per column.
    pub distances: Matrix<f32>,
    /// External vector ids, matching `distances`.
    pub ids: Matrix<u64>,
}

impl QueryResult {
    /// Top-k ids of query `j`, excluding sentinel padding.
    pub fn ids_for(&self, j: usize) -> Vec<u64> {
        self.ids
            .col(j)
            .iter()
            .copied()
            .filter(|&id| id != SENTINEL_ID)
            .collect()
    }
}

fn collect_results(heaps: Vec<FixedMinHeap<f32, u64>>, k: usize) -> QueryResult {
    let nq = heaps.len();
    let mut distances = Matrix::<f32>::col_major(k, nq);
    distances.raveled_mut().fill(SENTINEL_DISTANCE);
    let mut ids = Matrix::<u64>::col_major(k, nq);
    ids.raveled_mut().fill(SENTINEL_ID);

    for (j, heap) in heaps.into_iter().enumerate() {
        for (rank, (score, id)) in heap.into_sorted_vec().into_iter().enumerate() {
            distances.set(rank, j, score);
            ids.set(rank, j, id);
        }
    }
    QueryResult { distances, ids }
}

/// Find the `nprobe` nearest centroids of every query by brute-force L2
/// sweep, parallel over queries.
///
/// Returns an `nprobe x num_queries` col-major matrix whose column `j`
/// lists query `j`'s centroids by ascending distance.
///
/// # Errors
/// `Config` if `nprobe` is zero or exceeds the centroid count;
/// `DimensionMismatch` if queries and centroids disagree on `D`.
pub fn top_centroids<T: Element>(
    centroids: &Matrix<f32>,
    queries: &Matrix<T>,
    nprobe: usize,
) -> Result<Matrix<u64>> {
    if nprobe == 0 || nprobe > centroids.num_cols() {
        return Err(QuarryDbError::config(format!(
            "nprobe {} out of range for {} centroids",
            nprobe,
            centroids.num_cols()
        )));
    }
    if queries.num_rows() != centroids.num_rows() {
        return Err(QuarryDbError::dimension_mismatch(
            centroids.num_rows(),
            queries.num_rows(),
        ));
    }

    let nq = queries.num_cols();
    let columns: Vec<Vec<u64>> = (0..nq)
        .into_par_iter()
        .map(|j| {
            let q = queries.col(j);
            let mut heap = FixedMinHeap::<f32, u64>::new(nprobe);
            for p in 0..centroids.num_cols() {
                heap.insert(l2_squared_f32(q, centroids.col(p)), p as u64);
            }
            heap.into_sorted_vec().into_iter().map(|(_, p)| p).collect()
        })
        .collect();

    let mut top = Matrix::<u64>::col_major(nprobe, nq);
    for (j, column) in columns.into_iter().enumerate() {
        top.col_mut(j).copy_from_slice(&column);
    }
    Ok(top)
}

/// Inverted map from partition index to the queries probing it.
///
/// Built once per pass from the `top_centroids` matrix and immutable
/// afterwards; the key set, iterated ascending, is the active partition
/// list handed to the loader.
#[derive(Debug, Default)]
pub struct ProbeSet {
    map: BTreeMap<u64, SmallVec<[u32; 8]>>,
}

impl ProbeSet {
    /// Invert an `nprobe x num_queries` centroid matrix.
    pub fn from_top_centroids(top: &Matrix<u64>) -> Self {
        let mut map: BTreeMap<u64, SmallVec<[u32; 8]>> = BTreeMap::new();
        for j in 0..top.num_cols() {
            for &centroid in top.col(j) {
                map.entry(centroid).or_default().push(j as u32);
            }
        }
        Self { map }
    }

    /// Active partitions in ascending order.
    pub fn active_partitions(&self) -> Vec<u64> {
        self.map.keys().copied().collect()
    }

    /// Queries that probe `partition`.
    pub fn queries_for(&self, partition: u64) -> &[u32] {
        self.map.get(&partition).map_or(&[], |v| v.as_slice())
    }

    /// True when no query selected any partition.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Query with the entire reshuffled corpus resident in memory.
///
/// Loop order is query-outer: each rayon task owns one query's heap and
/// scans that query's probed partitions.
///
/// # Errors
/// `DataIntegrity` if `indices`/`ids` do not cover the corpus; `Config` on
/// parameter misuse (see [`top_centroids`]).
pub fn query_infinite_ram<T: Element>(
    parts: &Matrix<T>,
    ids: &[u64],
    indices: &[u64],
    centroids: &Matrix<f32>,
    queries: &Matrix<T>,
    nprobe: usize,
    k: usize,
) -> Result<QueryResult> {
    crate::codec::validate_indices(indices, parts.num_cols() as u64)?;
    if ids.len() != parts.num_cols() {
        return Err(QuarryDbError::data_integrity(format!(
            "{} ids for {} corpus columns",
            ids.len(),
            parts.num_cols()
        )));
    }
    if indices.len() != centroids.num_cols() + 1 {
        return Err(QuarryDbError::data_integrity(format!(
            "{} partition offsets for {} centroids",
            indices.len(),
            centroids.num_cols()
        )));
    }
    if parts.num_rows() != queries.num_rows() {
        return Err(QuarryDbError::dimension_mismatch(
            parts.num_rows(),
            queries.num_rows(),
        ));
    }

    let top = top_centroids(centroids, queries, nprobe)?;

    let heaps: Vec<FixedMinHeap<f32, u64>> = (0..queries.num_cols())
        .into_par_iter()
        .map(|j| {
            let q = queries.col(j);
            let mut heap = FixedMinHeap::new(k);
            for &centroid in top.col(j) {
                let start = indices[centroid as usize] as usize;
                let stop = indices[centroid as usize + 1] as usize;
                for i in start..stop {
                    heap.insert(l2_squared(q, parts.col(i)), ids[i]);
                }
            }
            heap
        })
        .collect();

    Ok(collect_results(heaps, k))
}

/// Query by streaming bounded batches of partitions through `loader`.
///
/// Loop order is partition-outer: within each batch the admitted partitions
/// are split across `nthreads` workers, each worker scoring its partitions
/// against every interested query into its own heap grid. After the last
/// batch, workers `1..` merge into worker 0 by streaming insertion, serial
/// per query.
///
/// The loader must have been constructed with `probes.active_partitions()`
/// as its active list.
pub fn query_finite_ram<T: Element>(
    loader: &mut PartitionLoader<T>,
    probes: &ProbeSet,
    queries: &Matrix<T>,
    k: usize,
    nthreads: usize,
) -> Result<QueryResult> {
    if nthreads == 0 {
        return Err(QuarryDbError::config("nthreads must be nonzero"));
    }
    if loader.dimension() != queries.num_rows() {
        return Err(QuarryDbError::dimension_mismatch(
            loader.dimension(),
            queries.num_rows(),
        ));
    }

    let nq = queries.num_cols();
    let active = loader.active_partitions().to_vec();

    // Prefix sums of the active partitions' sizes: the coordinate system of
    // the concatenated stream the loader emits.
    let indices = loader.indices();
    let mut new_indices = Vec::with_capacity(active.len() + 1);
    new_indices.push(0u64);
    for &p in &active {
        let size = indices[p as usize + 1] - indices[p as usize];
        new_indices.push(new_indices.last().unwrap() + size);
    }

    let mut heaps: Vec<Vec<FixedMinHeap<f32, u64>>> = (0..nthreads)
        .map(|_| (0..nq).map(|_| FixedMinHeap::new(k)).collect())
        .collect();

    while loader.advance()? {
        let num_col_parts = loader.num_col_parts();
        let parts_per_thread = num_col_parts.div_ceil(nthreads);
        let col_part_offset = loader.col_part_offset();
        let col_offset = loader.col_offset() as u64;
        let batch = &*loader;

        // Workers own disjoint heap rows; the tile and maps are shared
        // read-only.
        heaps
            .par_iter_mut()
            .enumerate()
            .for_each(|(n, worker_heaps)| {
                let first_part = (n * parts_per_thread).min(num_col_parts);
                let last_part = ((n + 1) * parts_per_thread).min(num_col_parts);

                for p in first_part..last_part {
                    let partno = p + col_part_offset;
                    let start = new_indices[partno];
                    let stop = new_indices[partno + 1];

                    for &j in probes.queries_for(active[partno]) {
                        let q = queries.col(j as usize);
                        for i in start..stop {
                            let ip = (i - col_offset) as usize;
                            let score = l2_squared(q, batch.batch_col(ip));
                            worker_heaps[j as usize].insert(score, batch.batch_ids()[ip]);
                        }
                    }
                }
            });
    }

    // Merge worker heaps into worker 0, serial per query.
    let (first, rest) = heaps.split_at_mut(1);
    for worker in rest.iter() {
        for (j, heap) in worker.iter().enumerate() {
            for &(score, id) in heap.iter() {
                first[0][j].insert(score, id);
            }
        }
    }

    let merged = heaps.swap_remove(0);
    Ok(collect_results(merged, k))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Six vectors in two well-separated groups, pre-shuffled into two
    /// partitions with non-trivial external ids.
    fn small_corpus() -> (Matrix<f32>, Vec<u64>, Vec<u64>, Matrix<f32>) {
        let mut parts = Matrix::<f32>::col_major(2, 6);
        let columns: [[f32; 2]; 6] = [
            [0.0, 0.0],
            [1.0, 0.0],
            [0.0, 1.0],
            [20.0, 20.0],
            [21.0, 20.0],
            [20.0, 21.0],
        ];
        for (j, col) in columns.iter().enumerate() {
            parts.col_mut(j).copy_from_slice(col);
        }
        let ids = vec![50, 51, 52, 53, 54, 55];
        let indices = vec![0, 3, 6];

        let mut centroids = Matrix::<f32>::col_major(2, 2);
        centroids.col_mut(0).copy_from_slice(&[0.3, 0.3]);
        centroids.col_mut(1).copy_from_slice(&[20.3, 20.3]);

        (parts, ids, indices, centroids)
    }

    #[test]
    fn test_top_centroids_orders_by_distance() {
        let (_, _, _, centroids) = small_corpus();
        let mut queries = Matrix::<f32>::col_major(2, 2);
        queries.col_mut(0).copy_from_slice(&[1.0, 1.0]);
        queries.col_mut(1).copy_from_slice(&[19.0, 19.0]);

        let top = top_centroids(&centroids, &queries, 2).unwrap();
        assert_eq!(top.col(0), &[0, 1]);
        assert_eq!(top.col(1), &[1, 0]);
    }

    #[test]
    fn test_top_centroids_rejects_bad_nprobe() {
        let (_, _, _, centroids) = small_corpus();
        let queries = Matrix::<f32>::col_major(2, 1);
        assert!(top_centroids(&centroids, &queries, 0).is_err());
        assert!(top_centroids(&centroids, &queries, 3).is_err());
    }

    #[test]
    fn test_probe_set_inversion() {
        let mut top = Matrix::<u64>::col_major(2, 3);
        top.col_mut(0).copy_from_slice(&[4, 9]);
        top.col_mut(1).copy_from_slice(&[9, 2]);
        top.col_mut(2).copy_from_slice(&[4, 2]);

        let probes = ProbeSet::from_top_centroids(&top);
        assert_eq!(probes.active_partitions(), vec![2, 4, 9]);
        assert_eq!(probes.queries_for(4), &[0, 2]);
        assert_eq!(probes.queries_for(9), &[0, 1]);
        assert_eq!(probes.queries_for(2), &[1, 2]);
        assert!(probes.queries_for(7).is_empty());
    }

    #[test]
    fn test_infinite_ram_exact_hit() {
        let (parts, ids, indices, centroids) = small_corpus();
        // Query equals corpus column 4 (id 54).
        let mut queries = Matrix::<f32>::col_major(2, 1);
        queries.col_mut(0).copy_from_slice(&[21.0, 20.0]);

        let result =
            query_infinite_ram(&parts, &ids, &indices, &centroids, &queries, 1, 1).unwrap();
        assert_eq!(result.ids.get(0, 0), 54);
        assert!(result.distances.get(0, 0) < 1e-6);
    }

    #[test]
    fn test_infinite_ram_sorted_and_padded() {
        let (parts, ids, indices, centroids) = small_corpus();
        let mut queries = Matrix::<f32>::col_major(2, 1);
        queries.col_mut(0).copy_from_slice(&[0.0, 0.0]);

        // k exceeds the reachable candidates of one partition.
        let result =
            query_infinite_ram(&parts, &ids, &indices, &centroids, &queries, 1, 5).unwrap();
        let distances = result.distances.col(0);
        assert!(distances[0] <= distances[1] && distances[1] <= distances[2]);
        assert_eq!(distances[3], SENTINEL_DISTANCE);
        assert_eq!(result.ids.get(4, 0), SENTINEL_ID);
        assert_eq!(result.ids_for(0), vec![50, 51, 52]);
    }

    #[test]
    fn test_infinite_ram_rejects_truncated_indices() {
        let (parts, ids, _, centroids) = small_corpus();
        let queries = Matrix::<f32>::col_major(2, 1);
        let err =
            query_infinite_ram(&parts, &ids, &[0, 3, 5], &centroids, &queries, 1, 1).unwrap_err();
        assert!(matches!(err, QuarryDbError::DataIntegrity(_)));
    }

    #[test]
    fn test_empty_probe_set_yields_sentinels() {
        let top = Matrix::<u64>::col_major(0, 0);
        let probes = ProbeSet::from_top_centroids(&top);
        assert!(probes.is_empty());
        assert!(probes.active_partitions().is_empty());
    }
}
