//! Owned 2-D matrix container with selectable memory layout.
//!
//! All corpus, centroid, and query data moves through [`Matrix`]: a single
//! contiguous buffer with either row-major or column-major element order.
//! Column-major is the working layout for vector data (one vector per
//! column, so each vector is a contiguous slice); row-major is available for
//! callers that ingest row-oriented data. The layout also determines which
//! stored arrays a matrix may be filled from: the store refuses to load an
//! array whose cell order differs from the destination matrix.

use crate::error::{QuarryDbError, Result};
use std::fmt;

/// Memory layout of a matrix or stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Rows are contiguous; element `(i, j)` lives at `i * num_cols + j`.
    RowMajor,
    /// Columns are contiguous; element `(i, j)` lives at `i + j * num_rows`.
    ColMajor,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::RowMajor => write!(f, "row-major"),
            Layout::ColMajor => write!(f, "col-major"),
        }
    }
}

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 32-bit IEEE-754 float.
    Float32,
    /// 8-bit unsigned integer (quantized corpora).
    UInt8,
    /// 64-bit unsigned integer (ids and partition offsets).
    UInt64,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::UInt8 => 1,
            DataType::UInt64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Float32 => write!(f, "float32"),
            DataType::UInt8 => write!(f, "uint8"),
            DataType::UInt64 => write!(f, "uint64"),
        }
    }
}

/// Numeric element usable in matrices and stored arrays.
///
/// Implemented for the combinations the engine instantiates: `f32` and `u8`
/// corpora with `u64` ids and offsets.
pub trait Element: Copy + Default + PartialOrd + Send + Sync + 'static {
    /// The corresponding stored-array element type.
    const DATA_TYPE: DataType;

    /// Widen to `f32` for distance arithmetic.
    fn to_f32(self) -> f32;

    /// Decode one element from little-endian bytes.
    fn from_le_byte_slice(bytes: &[u8]) -> Self;

    /// Encode one element as little-endian bytes into `out`.
    fn write_le_bytes(self, out: &mut [u8]);
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_le_byte_slice(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    fn write_le_bytes(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl Element for u8 {
    const DATA_TYPE: DataType = DataType::UInt8;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_le_byte_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }

    #[inline]
    fn write_le_bytes(self, out: &mut [u8]) {
        out[0] = self;
    }
}

impl Element for u64 {
    const DATA_TYPE: DataType = DataType::UInt64;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_le_byte_slice(bytes: &[u8]) -> Self {
        u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])
    }

    #[inline]
    fn write_le_bytes(self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_le_bytes());
    }
}

/// An owned, contiguous 2-D buffer of `R * C` elements.
///
/// Ownership is exclusive: moves transfer the buffer and there is no
/// implicit copy. Views handed out by [`col`](Matrix::col) and
/// [`row`](Matrix::row) borrow the same storage that element access sees.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    data: Vec<T>,
    num_rows: usize,
    num_cols: usize,
    layout: Layout,
}

impl<T: Element> Matrix<T> {
    /// Allocate a zero-initialized `num_rows x num_cols` matrix.
    pub fn new(num_rows: usize, num_cols: usize, layout: Layout) -> Self {
        Self {
            data: vec![T::default(); num_rows * num_cols],
            num_rows,
            num_cols,
            layout,
        }
    }

    /// Adopt an existing buffer. The buffer length must equal
    /// `num_rows * num_cols`.
    pub fn from_vec(
        data: Vec<T>,
        num_rows: usize,
        num_cols: usize,
        layout: Layout,
    ) -> Result<Self> {
        if data.len() != num_rows * num_cols {
            return Err(QuarryDbError::config(format!(
                "buffer of {} elements cannot back a {}x{} matrix",
                data.len(),
                num_rows,
                num_cols
            )));
        }
        Ok(Self {
            data,
            num_rows,
            num_cols,
            layout,
        })
    }

    /// Allocate a zero-initialized column-major matrix.
    pub fn col_major(num_rows: usize, num_cols: usize) -> Self {
        Self::new(num_rows, num_cols, Layout::ColMajor)
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// The memory layout of this matrix.
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.num_rows && j < self.num_cols);
        match self.layout {
            Layout::RowMajor => i * self.num_cols + j,
            Layout::ColMajor => i + j * self.num_rows,
        }
    }

    /// Element access respecting the layout.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        self.data[self.offset(i, j)]
    }

    /// Write a single element.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: T) {
        let idx = self.offset(i, j);
        self.data[idx] = value;
    }

    /// Contiguous view of column `j`.
    ///
    /// # Panics
    /// Panics if the matrix is row-major: columns are strided there and
    /// cannot be a slice.
    #[inline]
    pub fn col(&self, j: usize) -> &[T] {
        assert_eq!(
            self.layout,
            Layout::ColMajor,
            "column views require a col-major matrix"
        );
        &self.data[j * self.num_rows..(j + 1) * self.num_rows]
    }

    /// Mutable contiguous view of column `j` (col-major only).
    #[inline]
    pub fn col_mut(&mut self, j: usize) -> &mut [T] {
        assert_eq!(
            self.layout,
            Layout::ColMajor,
            "column views require a col-major matrix"
        );
        &mut self.data[j * self.num_rows..(j + 1) * self.num_rows]
    }

    /// Contiguous view of row `i`.
    ///
    /// # Panics
    /// Panics if the matrix is col-major.
    #[inline]
    pub fn row(&self, i: usize) -> &[T] {
        assert_eq!(
            self.layout,
            Layout::RowMajor,
            "row views require a row-major matrix"
        );
        &self.data[i * self.num_cols..(i + 1) * self.num_cols]
    }

    /// Contiguous view of the `i`-th major-axis vector: row `i` for a
    /// row-major matrix, column `i` for a col-major matrix.
    #[inline]
    pub fn vector(&self, i: usize) -> &[T] {
        match self.layout {
            Layout::RowMajor => self.row(i),
            Layout::ColMajor => self.col(i),
        }
    }

    /// Number of major-axis vectors (`num_rows` for row-major, `num_cols`
    /// for col-major).
    #[inline]
    pub fn num_vectors(&self) -> usize {
        match self.layout {
            Layout::RowMajor => self.num_rows,
            Layout::ColMajor => self.num_cols,
        }
    }

    /// Flat view of the whole buffer, length `num_rows * num_cols`.
    #[inline]
    pub fn raveled(&self) -> &[T] {
        &self.data
    }

    /// Mutable flat view of the whole buffer.
    #[inline]
    pub fn raveled_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Raw storage, in layout order.
    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Overwrite every element with the default value.
    pub fn fill_default(&mut self) {
        self.data.fill(T::default());
    }

    /// Consume the matrix and return its backing buffer.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_major_access() {
        let mut m = Matrix::<f32>::col_major(3, 2);
        m.set(0, 0, 1.0);
        m.set(2, 1, 5.0);

        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(2, 1), 5.0);
        // Column 1 is the second contiguous block of 3 elements.
        assert_eq!(m.raveled()[5], 5.0);
        assert_eq!(m.col(1), &[0.0, 0.0, 5.0]);
    }

    #[test]
    fn test_row_major_access() {
        let m = Matrix::from_vec(
            vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0],
            2,
            3,
            Layout::RowMajor,
        )
        .unwrap();

        assert_eq!(m.get(0, 2), 3.0);
        assert_eq!(m.get(1, 0), 4.0);
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
        assert_eq!(m.vector(0), &[1.0, 2.0, 3.0]);
        assert_eq!(m.num_vectors(), 2);
    }

    #[test]
    fn test_views_share_storage() {
        let mut m = Matrix::<f32>::col_major(4, 4);
        m.col_mut(2).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        for i in 0..4 {
            assert_eq!(m.get(i, 2), (i + 1) as f32);
        }
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        let result = Matrix::from_vec(vec![0.0f32; 5], 2, 3, Layout::ColMajor);
        assert!(result.is_err());
    }

    #[test]
    fn test_raveled_len() {
        let m = Matrix::<u8>::new(7, 3, Layout::ColMajor);
        assert_eq!(m.raveled().len(), 21);
    }

    #[test]
    #[should_panic]
    fn test_col_view_requires_col_major() {
        let m = Matrix::<f32>::new(2, 2, Layout::RowMajor);
        let _ = m.col(0);
    }

    #[test]
    fn test_element_roundtrip() {
        let mut buf = [0u8; 8];
        1234.5f32.write_le_bytes(&mut buf);
        assert_eq!(f32::from_le_byte_slice(&buf), 1234.5);

        0xDEAD_BEEF_u64.write_le_bytes(&mut buf);
        assert_eq!(u64::from_le_byte_slice(&buf), 0xDEAD_BEEF);

        assert_eq!(DataType::Float32.size(), 4);
        assert_eq!(DataType::UInt8.size(), 1);
        assert_eq!(DataType::UInt64.size(), 8);
    }
}
