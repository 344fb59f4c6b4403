//! Out-of-core streaming of partitioned corpus columns.
//!
//! [`PartitionLoader`] walks an ordered set of active partitions, filling a
//! single bounded tile with as many whole partitions as fit per batch. Each
//! [`advance`](PartitionLoader::advance) issues one ranged read against the
//! reshuffled corpus array for the tile and one against the id array, then
//! exposes the batch through borrowed column views. Across all batches,
//! every active partition is read exactly once and in order; the tile is
//! the only allocation and is reused until the pass completes.

use crate::codec::validate_indices;
use crate::error::{QuarryDbError, Result};
use crate::matrix::{Element, Layout, Matrix};
use crate::store::DenseArray;
use std::ops::Range;

/// Streaming reader over the partitions selected by a query.
///
/// Constructed with the corpus (`parts`) and id arrays, the owned offset
/// array, and the strictly increasing list of active partitions. A zero
/// `upper_bound` means an unbounded window: the tile is sized to hold every
/// active partition at once.
#[derive(Debug)]
pub struct PartitionLoader<T> {
    parts_array: DenseArray,
    ids_array: DenseArray,
    indices: Vec<u64>,
    active_partitions: Vec<u64>,

    dimension: usize,
    max_cols: usize,

    tile: Matrix<T>,
    ids: Vec<u64>,

    // Half-open views over consumed columns and partitions, in the
    // concatenated active-partition space.
    col_view: (usize, usize),
    col_part_view: (usize, usize),
}

impl<T: Element> PartitionLoader<T> {
    /// Open a loader over `parts_array` and `ids_array`.
    ///
    /// # Errors
    /// `SchemaMismatch` if the corpus array is not col-major `T` or the id
    /// array is not 1-D `u64`; `DataIntegrity` if the offsets are not a
    /// valid prefix-sum cover of the corpus, or the active list is not a
    /// strictly increasing subset of the partitions; `Config` for
    /// dimensional nonsense.
    pub fn new(
        parts_array: DenseArray,
        ids_array: DenseArray,
        indices: Vec<u64>,
        active_partitions: Vec<u64>,
        upper_bound: usize,
    ) -> Result<Self> {
        let parts_schema = parts_array.schema();
        if parts_schema.ndim() != 2 {
            return Err(QuarryDbError::config(format!(
                "corpus array {} is not two-dimensional",
                parts_array.path().display()
            )));
        }
        if parts_schema.layout != Layout::ColMajor {
            return Err(QuarryDbError::schema_mismatch(
                parts_array.path().display().to_string(),
                Layout::ColMajor.to_string(),
                parts_schema.layout.to_string(),
            ));
        }
        if parts_schema.dtype != T::DATA_TYPE {
            return Err(QuarryDbError::schema_mismatch(
                parts_array.path().display().to_string(),
                T::DATA_TYPE.to_string(),
                parts_schema.dtype.to_string(),
            ));
        }

        let dimension = parts_schema.num_rows() as usize;
        let num_array_cols = parts_schema.num_cols();

        let ids_schema = ids_array.schema();
        if ids_schema.ndim() != 1 {
            return Err(QuarryDbError::config(format!(
                "id array {} is not one-dimensional",
                ids_array.path().display()
            )));
        }
        if ids_schema.num_rows() != num_array_cols {
            return Err(QuarryDbError::data_integrity(format!(
                "id array covers {} vectors but the corpus has {} columns",
                ids_schema.num_rows(),
                num_array_cols
            )));
        }

        validate_indices(&indices, num_array_cols)?;

        let num_partitions = (indices.len() - 1) as u64;
        for pair in active_partitions.windows(2) {
            if pair[1] <= pair[0] {
                return Err(QuarryDbError::data_integrity(
                    "active partitions must be strictly increasing",
                ));
            }
        }
        if let Some(&last) = active_partitions.last() {
            if last >= num_partitions {
                return Err(QuarryDbError::data_integrity(format!(
                    "active partition {} of {}",
                    last, num_partitions
                )));
            }
        }

        let total_max_cols: u64 = active_partitions
            .iter()
            .map(|&p| indices[p as usize + 1] - indices[p as usize])
            .sum();

        let max_cols = if upper_bound == 0 || upper_bound as u64 > total_max_cols {
            total_max_cols as usize
        } else {
            upper_bound
        };

        Ok(Self {
            parts_array,
            ids_array,
            indices,
            active_partitions,
            dimension,
            max_cols,
            tile: Matrix::col_major(dimension, max_cols),
            ids: vec![0u64; max_cols],
            col_view: (0, 0),
            col_part_view: (0, 0),
        })
    }

    fn partition_size(&self, active_idx: usize) -> u64 {
        let p = self.active_partitions[active_idx] as usize;
        self.indices[p + 1] - self.indices[p]
    }

    /// Load the next batch of partitions into the tile.
    ///
    /// Admits successive active partitions while they fit in the window,
    /// then reads their columns and ids in one ranged request each. Returns
    /// `false` once every active partition has been consumed.
    ///
    /// # Errors
    /// `DataIntegrity` if a single partition is wider than the window, the
    /// batch bookkeeping disagrees with itself, or the store returns a
    /// different number of columns than the admitted partitions cover;
    /// `StoreIo` on read failure.
    pub fn advance(&mut self) -> Result<bool> {
        let total_num_parts = self.active_partitions.len();

        // Fit as many whole partitions as possible into the window.
        self.col_view.0 = self.col_view.1;
        self.col_part_view.0 = self.col_part_view.1;
        for i in self.col_part_view.0..total_num_parts {
            let next_size = self.partition_size(i) as usize;
            if self.col_view.1 + next_size > self.col_view.0 + self.max_cols {
                break;
            }
            self.col_view.1 += next_size;
            self.col_part_view.1 = i + 1;
        }

        let num_cols = self.col_view.1 - self.col_view.0;
        let num_col_parts = self.col_part_view.1 - self.col_part_view.0;

        if (num_cols == 0) != (num_col_parts == 0) {
            return Err(QuarryDbError::data_integrity(
                "batch admitted columns and partitions disagree",
            ));
        }
        if num_cols == 0 {
            if self.col_part_view.0 < total_num_parts {
                // The next partition alone exceeds the window.
                let p = self.active_partitions[self.col_part_view.0];
                return Err(QuarryDbError::data_integrity(format!(
                    "partition {} has {} columns, wider than the {}-column window",
                    p,
                    self.partition_size(self.col_part_view.0),
                    self.max_cols
                )));
            }
            return Ok(false);
        }

        // One ranged read covering all admitted partitions.
        let mut col_ranges: Vec<Range<u64>> = Vec::with_capacity(num_col_parts);
        let mut col_count = 0u64;
        for i in self.col_part_view.0..self.col_part_view.1 {
            let p = self.active_partitions[i] as usize;
            let start = self.indices[p];
            let stop = self.indices[p + 1];
            if start == stop {
                continue;
            }
            col_count += stop - start;
            col_ranges.push(start..stop);
        }
        if col_count != num_cols as u64 {
            return Err(QuarryDbError::data_integrity(format!(
                "admitted partitions cover {} columns, batch expected {}",
                col_count, num_cols
            )));
        }

        let read = self.parts_array.read_ranges(
            0..self.dimension as u64,
            &col_ranges,
            Layout::ColMajor,
            self.tile.raveled_mut(),
        )?;
        if read != num_cols * self.dimension {
            return Err(QuarryDbError::data_integrity(format!(
                "corpus read returned {} elements, batch expected {}",
                read,
                num_cols * self.dimension
            )));
        }

        let ids_read = self.ids_array.read_ranges_1d(&col_ranges, &mut self.ids)?;
        if ids_read != num_cols {
            return Err(QuarryDbError::data_integrity(format!(
                "id read returned {} elements, batch expected {}",
                ids_read, num_cols
            )));
        }

        Ok(true)
    }

    /// Vector dimension (rows of the tile).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The window size in columns.
    pub fn max_cols(&self) -> usize {
        self.max_cols
    }

    /// Columns loaded by the current batch.
    pub fn num_cols(&self) -> usize {
        self.col_view.1 - self.col_view.0
    }

    /// Partitions loaded by the current batch.
    pub fn num_col_parts(&self) -> usize {
        self.col_part_view.1 - self.col_part_view.0
    }

    /// Logical start of the current batch, counted in columns over the
    /// concatenated active partitions.
    pub fn col_offset(&self) -> usize {
        self.col_view.0
    }

    /// Index (into the active-partition list) of the first partition in the
    /// current batch.
    pub fn col_part_offset(&self) -> usize {
        self.col_part_view.0
    }

    /// Column `i` of the current batch.
    pub fn batch_col(&self, i: usize) -> &[T] {
        debug_assert!(i < self.num_cols());
        self.tile.col(i)
    }

    /// Ids of the current batch's columns.
    pub fn batch_ids(&self) -> &[u64] {
        &self.ids[..self.num_cols()]
    }

    /// The owned partition offsets.
    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    /// The active partitions, strictly increasing.
    pub fn active_partitions(&self) -> &[u64] {
        &self.active_partitions
    }
}
