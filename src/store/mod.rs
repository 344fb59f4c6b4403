//! Dense typed array storage addressed by filesystem path.
//!
//! The engine persists everything — centroids, the reshuffled corpus, ids,
//! and partition offsets — as dense 1-D or 2-D arrays of a single numeric
//! attribute. Each array is one file: a checksummed header describing the
//! schema (element type, cell layout, dimension bounds) followed by the raw
//! element data in layout order. Reads select sub-arrays as a list of
//! half-open ranges per dimension and must complete fully; a short read is a
//! fatal store error, never a partial result.
//!
//! The cell layout of a stored array must match the layout of the in-memory
//! matrix it is loaded into. A mismatch is reported as a fail-fast
//! [`SchemaMismatch`](crate::QuarryDbError::SchemaMismatch); the store never
//! re-interprets data by swapping dimensions.

mod format;

pub use format::{ArrayHeader, ATTRIBUTE_NAME, FORMAT_VERSION, MAGIC};

use crate::error::{QuarryDbError, Result};
use crate::matrix::{DataType, Element, Layout, Matrix};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Access mode of an open array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Ranged and whole-array reads.
    Read,
    /// Whole-array writes.
    Write,
}

/// Inclusive bounds of one array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimBounds {
    /// Lowest valid index.
    pub lower: u64,
    /// Highest valid index.
    pub upper: u64,
}

impl DimBounds {
    /// Number of cells along this dimension.
    pub fn extent(&self) -> u64 {
        self.upper - self.lower + 1
    }
}

/// Introspected schema of a stored array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySchema {
    /// Cell layout of the element data.
    pub layout: Layout,
    /// Element type of the single attribute.
    pub dtype: DataType,
    /// Per-dimension inclusive bounds (one or two entries).
    pub dims: Vec<DimBounds>,
    /// Name of the single attribute.
    pub attribute: &'static str,
}

impl ArraySchema {
    fn from_header(header: &ArrayHeader) -> Self {
        let mut dims = vec![DimBounds {
            lower: 0,
            upper: header.rows.saturating_sub(1),
        }];
        if header.ndim == 2 {
            dims.push(DimBounds {
                lower: 0,
                upper: header.cols.saturating_sub(1),
            });
        }
        Self {
            layout: header.layout,
            dtype: header.dtype,
            dims,
            attribute: ATTRIBUTE_NAME,
        }
    }

    /// Number of dimensions (1 or 2).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Extent of dimension 0.
    pub fn num_rows(&self) -> u64 {
        self.dims[0].extent()
    }

    /// Extent of dimension 1, or 1 for 1-D arrays.
    pub fn num_cols(&self) -> u64 {
        self.dims.get(1).map_or(1, DimBounds::extent)
    }
}

/// A dense typed array backed by a single file.
///
/// Opened either for reading (ranged or whole-array) or for writing the
/// complete contents once. The element type is checked against the caller's
/// requested type on every access, so a `u8` corpus cannot silently be read
/// as `f32`.
#[derive(Debug)]
pub struct DenseArray {
    file: File,
    path: PathBuf,
    schema: ArraySchema,
    header: ArrayHeader,
    mode: OpenMode,
}

impl DenseArray {
    /// Create a new 2-D array file and open it for writing.
    pub fn create_matrix<T: Element>(
        path: impl AsRef<Path>,
        layout: Layout,
        rows: u64,
        cols: u64,
    ) -> Result<Self> {
        let header = ArrayHeader::matrix(T::DATA_TYPE, layout, rows, cols);
        Self::create(path, header)
    }

    /// Create a new 1-D array file and open it for writing.
    pub fn create_vector<T: Element>(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let header = ArrayHeader::vector(T::DATA_TYPE, len);
        Self::create(path, header)
    }

    fn create(path: impl AsRef<Path>, header: ArrayHeader) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&header.to_bytes())?;

        Ok(Self {
            file,
            schema: ArraySchema::from_header(&header),
            header,
            path,
            mode: OpenMode::Write,
        })
    }

    /// Open an existing array for reading, verifying its header.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let mut header_bytes = [0u8; ArrayHeader::SIZE];
        file.read_exact(&mut header_bytes).map_err(|e| {
            QuarryDbError::store_io(path.display().to_string(), format!("reading header: {}", e))
        })?;
        let header = ArrayHeader::from_bytes(&header_bytes)?;

        Ok(Self {
            file,
            schema: ArraySchema::from_header(&header),
            header,
            path,
            mode: OpenMode::Read,
        })
    }

    /// Schema introspection.
    pub fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_string(&self) -> String {
        self.path.display().to_string()
    }

    fn check_readable<T: Element>(&self) -> Result<()> {
        if self.mode != OpenMode::Read {
            return Err(QuarryDbError::config(format!(
                "array {} is not open for reading",
                self.path.display()
            )));
        }
        if T::DATA_TYPE != self.schema.dtype {
            return Err(QuarryDbError::schema_mismatch(
                self.path_string(),
                T::DATA_TYPE.to_string(),
                self.schema.dtype.to_string(),
            ));
        }
        Ok(())
    }

    /// Read one contiguous run of `len` elements starting at element
    /// `start`, appending decoded values to `dst`.
    fn read_run<T: Element>(&mut self, start: u64, len: usize, dst: &mut Vec<T>) -> Result<()> {
        let esize = T::DATA_TYPE.size();
        let offset = ArrayHeader::SIZE as u64 + start * esize as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut bytes = vec![0u8; len * esize];
        self.file.read_exact(&mut bytes).map_err(|e| {
            QuarryDbError::store_io(
                self.path_string(),
                format!("incomplete read of {} elements: {}", len, e),
            )
        })?;

        dst.extend(bytes.chunks_exact(esize).map(T::from_le_byte_slice));
        Ok(())
    }

    /// Read a sub-array of a 2-D array: one half-open row range crossed with
    /// a list of half-open column ranges.
    ///
    /// The destination receives the selected cells packed in the array's own
    /// cell layout (selected columns in range order for col-major, selected
    /// rows for row-major). `layout` states the layout the caller expects
    /// and must match the stored layout. Returns the number of elements
    /// read, which always equals the selection size.
    ///
    /// # Errors
    /// `SchemaMismatch` on element-type or layout disagreement; `StoreIo`
    /// on out-of-bounds ranges, short reads, or undersized destinations.
    pub fn read_ranges<T: Element>(
        &mut self,
        rows: Range<u64>,
        col_ranges: &[Range<u64>],
        layout: Layout,
        dst: &mut [T],
    ) -> Result<usize> {
        self.check_readable::<T>()?;
        if self.header.ndim != 2 {
            return Err(QuarryDbError::config(format!(
                "array {} is not two-dimensional",
                self.path.display()
            )));
        }
        if layout != self.schema.layout {
            return Err(QuarryDbError::schema_mismatch(
                self.path_string(),
                layout.to_string(),
                self.schema.layout.to_string(),
            ));
        }

        let total_rows = self.header.rows;
        let total_cols = self.header.cols;
        if rows.end > total_rows || rows.start > rows.end {
            return Err(QuarryDbError::store_io(
                self.path_string(),
                format!("row range {:?} out of bounds ({})", rows, total_rows),
            ));
        }
        let mut selected_cols = 0u64;
        for range in col_ranges {
            if range.end > total_cols || range.start > range.end {
                return Err(QuarryDbError::store_io(
                    self.path_string(),
                    format!("column range {:?} out of bounds ({})", range, total_cols),
                ));
            }
            selected_cols += range.end - range.start;
        }

        let expected = (rows.end - rows.start) * selected_cols;
        if (dst.len() as u64) < expected {
            return Err(QuarryDbError::store_io(
                self.path_string(),
                format!(
                    "destination holds {} elements, selection needs {}",
                    dst.len(),
                    expected
                ),
            ));
        }

        let row_span = (rows.end - rows.start) as usize;
        let mut out: Vec<T> = Vec::with_capacity(expected as usize);
        match self.schema.layout {
            Layout::ColMajor => {
                for range in col_ranges {
                    if rows.start == 0 && rows.end == total_rows {
                        // Full rows: each column range is one contiguous run.
                        let start = range.start * total_rows;
                        let len = ((range.end - range.start) * total_rows) as usize;
                        self.read_run(start, len, &mut out)?;
                    } else {
                        for col in range.clone() {
                            let start = col * total_rows + rows.start;
                            self.read_run(start, row_span, &mut out)?;
                        }
                    }
                }
            }
            Layout::RowMajor => {
                for row in rows.clone() {
                    for range in col_ranges {
                        let start = row * total_cols + range.start;
                        let len = (range.end - range.start) as usize;
                        self.read_run(start, len, &mut out)?;
                    }
                }
            }
        }

        debug_assert_eq!(out.len() as u64, expected);
        dst[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }

    /// Read a sub-array of a 1-D array as a list of half-open ranges.
    ///
    /// Returns the number of elements read.
    pub fn read_ranges_1d<T: Element>(
        &mut self,
        ranges: &[Range<u64>],
        dst: &mut [T],
    ) -> Result<usize> {
        self.check_readable::<T>()?;
        if self.header.ndim != 1 {
            return Err(QuarryDbError::config(format!(
                "array {} is not one-dimensional",
                self.path.display()
            )));
        }

        let total = self.header.rows;
        let mut expected = 0u64;
        for range in ranges {
            if range.end > total || range.start > range.end {
                return Err(QuarryDbError::store_io(
                    self.path_string(),
                    format!("range {:?} out of bounds ({})", range, total),
                ));
            }
            expected += range.end - range.start;
        }
        if (dst.len() as u64) < expected {
            return Err(QuarryDbError::store_io(
                self.path_string(),
                format!(
                    "destination holds {} elements, selection needs {}",
                    dst.len(),
                    expected
                ),
            ));
        }

        let mut out: Vec<T> = Vec::with_capacity(expected as usize);
        for range in ranges {
            self.read_run(range.start, (range.end - range.start) as usize, &mut out)?;
        }
        dst[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }

    /// Materialize the whole 2-D array as a matrix in the given layout.
    pub fn read_matrix<T: Element>(&mut self, layout: Layout) -> Result<Matrix<T>> {
        let rows = self.header.rows;
        let cols = self.header.cols;
        let mut data = vec![T::default(); (rows * cols) as usize];
        self.read_ranges(0..rows, &[0..cols], layout, &mut data)?;
        Matrix::from_vec(data, rows as usize, cols as usize, layout)
    }

    /// Materialize the whole 1-D array.
    pub fn read_vec<T: Element>(&mut self) -> Result<Vec<T>> {
        let len = self.header.rows;
        let mut data = vec![T::default(); len as usize];
        self.read_ranges_1d(&[0..len], &mut data)?;
        Ok(data)
    }

    /// Write the complete contents of the array in cell-layout order.
    ///
    /// # Errors
    /// `Config` if the array is open for reading or `data` does not cover
    /// the full extent; `SchemaMismatch` on element-type disagreement.
    pub fn write_all<T: Element>(&mut self, data: &[T]) -> Result<()> {
        if self.mode != OpenMode::Write {
            return Err(QuarryDbError::config(format!(
                "array {} is not open for writing",
                self.path.display()
            )));
        }
        if T::DATA_TYPE != self.schema.dtype {
            return Err(QuarryDbError::schema_mismatch(
                self.path_string(),
                T::DATA_TYPE.to_string(),
                self.schema.dtype.to_string(),
            ));
        }
        if data.len() as u64 != self.header.num_elements() {
            return Err(QuarryDbError::config(format!(
                "array {} holds {} elements, caller supplied {}",
                self.path.display(),
                self.header.num_elements(),
                data.len()
            )));
        }

        let esize = T::DATA_TYPE.size();
        let mut bytes = vec![0u8; data.len() * esize];
        for (value, chunk) in data.iter().zip(bytes.chunks_exact_mut(esize)) {
            value.write_le_bytes(chunk);
        }
        self.file.seek(SeekFrom::Start(ArrayHeader::SIZE as u64))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    /// Close the array, flushing to stable storage in write mode.
    pub fn close(self) -> Result<()> {
        if self.mode == OpenMode::Write {
            self.file.sync_all()?;
        }
        Ok(())
    }
}
