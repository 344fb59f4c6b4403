//! Partition encoding: reshuffling a corpus so each partition is contiguous.
//!
//! Given per-column partition assignments, the codec produces the trained
//! corpus triple `(indices, ids, shuffled)`: a prefix-sum offset array of
//! length `nlist + 1`, the external id of every column in shuffled order,
//! and the corpus itself with the columns of each partition laid out
//! back-to-back. Partition `p` occupies columns
//! `[indices[p], indices[p + 1])` of the shuffled matrix.

use crate::error::{QuarryDbError, Result};
use crate::matrix::{Element, Layout, Matrix};

/// A corpus reshuffled by partition, ready to persist.
#[derive(Debug, Clone)]
pub struct PartitionedCorpus<T> {
    /// Corpus columns grouped by partition, col-major `D x N`.
    pub shuffled: Matrix<T>,
    /// External id of each shuffled column, length `N`.
    pub ids: Vec<u64>,
    /// Monotone offsets into `shuffled` / `ids`, length `nlist + 1`.
    pub indices: Vec<u64>,
}

impl<T> PartitionedCorpus<T> {
    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.indices.len() - 1
    }

    /// Number of columns in partition `p`.
    pub fn partition_size(&self, p: usize) -> u64 {
        self.indices[p + 1] - self.indices[p]
    }
}

/// Convert per-partition sizes into prefix-sum offsets
/// (`[0, s0, s0+s1, ...]`).
pub fn sizes_to_indices(sizes: &[u64]) -> Vec<u64> {
    let mut indices = Vec::with_capacity(sizes.len() + 1);
    indices.push(0);
    let mut acc = 0u64;
    for &size in sizes {
        acc += size;
        indices.push(acc);
    }
    indices
}

/// Reshuffle `data` (col-major `D x N`) so that the columns of each
/// partition are contiguous.
///
/// `assignments[i]` names the partition of column `i`; the external id of
/// column `i` is `i` itself and is carried into `ids` through the shuffle.
///
/// # Errors
/// `Config` if `data` is not col-major or `assignments` does not cover
/// every column; `DataIntegrity` if an assignment names a partition outside
/// `[0, nlist)` or the scatter does not account for every column.
pub fn partition_corpus<T: Element>(
    data: &Matrix<T>,
    assignments: &[u64],
    nlist: usize,
) -> Result<PartitionedCorpus<T>> {
    if data.layout() != Layout::ColMajor {
        return Err(QuarryDbError::config(
            "partitioning requires a col-major corpus",
        ));
    }
    let num_cols = data.num_cols();
    if assignments.len() != num_cols {
        return Err(QuarryDbError::config(format!(
            "{} assignments for {} columns",
            assignments.len(),
            num_cols
        )));
    }

    let mut degrees = vec![0u64; nlist];
    for (i, &part) in assignments.iter().enumerate() {
        if part as usize >= nlist {
            return Err(QuarryDbError::data_integrity(format!(
                "column {} assigned to partition {} of {}",
                i, part, nlist
            )));
        }
        degrees[part as usize] += 1;
    }

    let mut indices = sizes_to_indices(&degrees);

    let mut shuffled = Matrix::<T>::col_major(data.num_rows(), num_cols);
    let mut ids = vec![0u64; num_cols];

    // Scatter each column to the next free slot of its partition, advancing
    // the per-partition cursor stored in `indices[1..]`.
    for (i, &part) in assignments.iter().enumerate() {
        let slot = indices[part as usize] as usize;
        shuffled.col_mut(slot).copy_from_slice(data.col(i));
        ids[slot] = i as u64;
        indices[part as usize] += 1;
    }

    // The cursors have each advanced to the start of the next partition;
    // shift right by one to restore the offsets.
    for p in (1..indices.len()).rev() {
        indices[p] = indices[p - 1];
    }
    indices[0] = 0;

    if indices[nlist] != num_cols as u64 {
        return Err(QuarryDbError::data_integrity(format!(
            "partition offsets cover {} of {} columns",
            indices[nlist], num_cols
        )));
    }

    Ok(PartitionedCorpus {
        shuffled,
        ids,
        indices,
    })
}

/// Check that `indices` is a valid offset array for `num_cols` columns:
/// starts at zero, monotone nondecreasing, ends at `num_cols`.
pub fn validate_indices(indices: &[u64], num_cols: u64) -> Result<()> {
    if indices.len() < 2 {
        return Err(QuarryDbError::data_integrity(
            "partition offsets need at least two entries",
        ));
    }
    if indices[0] != 0 {
        return Err(QuarryDbError::data_integrity(
            "partition offsets must start at zero",
        ));
    }
    for w in indices.windows(2) {
        if w[1] < w[0] {
            return Err(QuarryDbError::data_integrity(
                "partition offsets are not monotone",
            ));
        }
    }
    let last = indices[indices.len() - 1];
    if last != num_cols {
        return Err(QuarryDbError::data_integrity(format!(
            "partition offsets end at {} but the corpus has {} columns",
            last, num_cols
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus_2x6() -> Matrix<f32> {
        // Column j is (j, 10 + j).
        let mut m = Matrix::<f32>::col_major(2, 6);
        for j in 0..6 {
            m.set(0, j, j as f32);
            m.set(1, j, 10.0 + j as f32);
        }
        m
    }

    #[test]
    fn test_sizes_to_indices() {
        assert_eq!(sizes_to_indices(&[3, 0, 2]), vec![0, 3, 3, 5]);
        assert_eq!(sizes_to_indices(&[]), vec![0]);
    }

    #[test]
    fn test_partition_groups_columns() {
        let data = corpus_2x6();
        let assignments = vec![1u64, 0, 1, 2, 0, 1];
        let corpus = partition_corpus(&data, &assignments, 3).unwrap();

        assert_eq!(corpus.indices, vec![0, 2, 5, 6]);
        assert_eq!(corpus.num_partitions(), 3);
        assert_eq!(corpus.partition_size(1), 3);

        // Partition 0 holds original columns 1 and 4 in scan order.
        assert_eq!(&corpus.ids[0..2], &[1, 4]);
        // Partition 1 holds 0, 2, 5; partition 2 holds 3.
        assert_eq!(&corpus.ids[2..5], &[0, 2, 5]);
        assert_eq!(corpus.ids[5], 3);

        // Every shuffled column equals the training column named by its id.
        for i in 0..6 {
            let original = corpus.ids[i] as usize;
            assert_eq!(corpus.shuffled.col(i), data.col(original));
        }
    }

    #[test]
    fn test_each_id_appears_once() {
        let data = corpus_2x6();
        let assignments = vec![2u64, 2, 2, 0, 0, 1];
        let corpus = partition_corpus(&data, &assignments, 3).unwrap();

        let mut seen = corpus.ids.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(corpus.indices[3], 6);
    }

    #[test]
    fn test_empty_partitions_allowed() {
        let data = corpus_2x6();
        let assignments = vec![0u64; 6];
        let corpus = partition_corpus(&data, &assignments, 4).unwrap();
        assert_eq!(corpus.indices, vec![0, 6, 6, 6, 6]);
    }

    #[test]
    fn test_out_of_range_assignment() {
        let data = corpus_2x6();
        let assignments = vec![0u64, 0, 3, 0, 0, 0];
        let err = partition_corpus(&data, &assignments, 3).unwrap_err();
        assert!(matches!(err, QuarryDbError::DataIntegrity(_)));
    }

    #[test]
    fn test_assignment_length_mismatch() {
        let data = corpus_2x6();
        let err = partition_corpus(&data, &[0u64; 4], 2).unwrap_err();
        assert!(matches!(err, QuarryDbError::Config(_)));
    }

    #[test]
    fn test_validate_indices() {
        assert!(validate_indices(&[0, 2, 5, 6], 6).is_ok());
        assert!(validate_indices(&[0, 2, 1, 6], 6).is_err());
        assert!(validate_indices(&[1, 2, 6], 6).is_err());
        // Truncated tail is rejected, never silently repaired.
        assert!(validate_indices(&[0, 2, 5], 6).is_err());
    }
}
