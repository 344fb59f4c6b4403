//! End-to-end correctness: the two scoring paths agree, results are
//! deterministic, and persisted indexes are reproducible.
//!
//! Run with: cargo test

use quarry_db::{recall_at_k, BuildParams, Dataset, IvfIndex, Matrix, SearchParams};
use std::collections::HashSet;
use tempfile::tempdir;

fn build_clustered_index(
    dir: &std::path::Path,
    n_vectors: usize,
    dim: usize,
    nlist: usize,
    seed: u64,
) -> (Dataset, IvfIndex) {
    let dataset = Dataset::clustered(n_vectors, 100, dim, nlist, seed);
    let params = BuildParams::new(nlist).with_seed(seed).with_max_iter(10);
    let (index, _warnings) =
        IvfIndex::build(&dataset.vectors, &params, dir.join("group")).unwrap();
    (dataset, index)
}

fn ids_as_set(result: &quarry_db::QueryResult, j: usize) -> HashSet<u64> {
    result.ids_for(j).into_iter().collect()
}

#[test]
fn test_finite_matches_infinite_ram() {
    let dir = tempdir().unwrap();
    let n = 2000;
    let (dataset, index) = build_clustered_index(dir.path(), n, 16, 12, 42);

    let infinite = index
        .search(&dataset.queries, &SearchParams::new(4, 10))
        .unwrap();

    // A window of ~N/3 columns forces several batches.
    let finite = index
        .search(
            &dataset.queries,
            &SearchParams::new(4, 10).with_upper_bound(n.div_ceil(3)),
        )
        .unwrap();

    for j in 0..dataset.queries.num_cols() {
        assert_eq!(
            ids_as_set(&infinite, j),
            ids_as_set(&finite, j),
            "query {} disagrees between scoring paths",
            j
        );
    }
}

#[test]
fn test_results_independent_of_thread_count() {
    let dir = tempdir().unwrap();
    let (dataset, index) = build_clustered_index(dir.path(), 1200, 8, 8, 7);

    let baseline = index
        .search(
            &dataset.queries,
            &SearchParams::new(3, 5)
                .with_upper_bound(400)
                .with_nthreads(1),
        )
        .unwrap();

    for nthreads in [2, 4, 7] {
        let result = index
            .search(
                &dataset.queries,
                &SearchParams::new(3, 5)
                    .with_upper_bound(400)
                    .with_nthreads(nthreads),
            )
            .unwrap();
        for j in 0..dataset.queries.num_cols() {
            assert_eq!(
                ids_as_set(&baseline, j),
                ids_as_set(&result, j),
                "query {} changed with {} threads",
                j,
                nthreads
            );
        }
    }
}

#[test]
fn test_self_query_returns_own_id() {
    let dir = tempdir().unwrap();
    let (dataset, index) = build_clustered_index(dir.path(), 500, 8, 6, 11);

    // Query equal to corpus vector 17.
    let mut queries = Matrix::<f32>::col_major(8, 1);
    queries
        .col_mut(0)
        .copy_from_slice(&dataset.vectors.col(17).to_vec());

    for nprobe in [1, 2, 6] {
        for upper_bound in [0, 250] {
            let result = index
                .search(
                    &queries,
                    &SearchParams::new(nprobe, 1).with_upper_bound(upper_bound),
                )
                .unwrap();
            assert_eq!(result.ids.get(0, 0), 17);
            assert!(result.distances.get(0, 0) < 1e-6);
        }
    }
}

#[test]
fn test_rebuild_is_bit_identical() {
    let dir = tempdir().unwrap();
    let dataset = Dataset::clustered(600, 0, 8, 5, 33);
    let params = BuildParams::new(5).with_seed(33).with_max_iter(8);

    IvfIndex::build(&dataset.vectors, &params, dir.path().join("a")).unwrap();
    IvfIndex::build(&dataset.vectors, &params, dir.path().join("b")).unwrap();

    // Every persisted array (metadata carries wall-clock timestamps and is
    // excluded) must match byte for byte.
    for name in ["centroids", "parts", "ids", "indices"] {
        let a = std::fs::read(dir.path().join("a").join(name)).unwrap();
        let b = std::fs::read(dir.path().join("b").join(name)).unwrap();
        assert_eq!(a, b, "array {} differs between identical builds", name);
    }
}

#[test]
fn test_recall_monotone_in_nprobe() {
    let dir = tempdir().unwrap();
    let (mut dataset, index) = build_clustered_index(dir.path(), 1500, 12, 10, 5);
    dataset.compute_ground_truth(10);

    let mut previous = -1.0f32;
    for nprobe in [1, 2, 4, 10] {
        let result = index
            .search(&dataset.queries, &SearchParams::new(nprobe, 10))
            .unwrap();

        let mut total = 0.0f32;
        for j in 0..dataset.queries.num_cols() {
            total += recall_at_k(&result.ids_for(j), &dataset.ground_truth[j], 10);
        }
        let recall = total / dataset.queries.num_cols() as f32;

        assert!(
            recall >= previous,
            "recall fell from {} to {} at nprobe {}",
            previous,
            recall,
            nprobe
        );
        previous = recall;
    }

    // Probing every partition is exhaustive search.
    assert!(
        (previous - 1.0).abs() < 1e-6,
        "full probe recall {}",
        previous
    );
}

#[test]
fn test_search_all_partitions_matches_ground_truth() {
    let dir = tempdir().unwrap();
    let (mut dataset, index) = build_clustered_index(dir.path(), 800, 8, 4, 19);
    dataset.compute_ground_truth(5);

    let result = index
        .search(
            &dataset.queries,
            &SearchParams::new(4, 5).with_upper_bound(300),
        )
        .unwrap();

    for j in 0..dataset.queries.num_cols() {
        let truth: HashSet<u64> = dataset.ground_truth[j].iter().copied().collect();
        assert_eq!(ids_as_set(&result, j), truth, "query {}", j);
    }
}

#[test]
fn test_distances_sorted_ascending() {
    let dir = tempdir().unwrap();
    let (dataset, index) = build_clustered_index(dir.path(), 700, 8, 6, 2);

    let result = index
        .search(
            &dataset.queries,
            &SearchParams::new(3, 8).with_upper_bound(250),
        )
        .unwrap();

    for j in 0..dataset.queries.num_cols() {
        let column = result.distances.col(j);
        for pair in column.windows(2) {
            assert!(pair[0] <= pair[1], "query {} distances unsorted", j);
        }
    }
}
