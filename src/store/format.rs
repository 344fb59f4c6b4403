//! On-disk header format for dense array files.

use crate::error::{QuarryDbError, Result};
use crate::matrix::{DataType, Layout};

/// Magic bytes identifying a quarry-db array file: "QUARRYA\0"
pub const MAGIC: [u8; 8] = *b"QUARRYA\0";

/// Current array format version.
pub const FORMAT_VERSION: u32 = 1;

/// Name of the single attribute every array carries.
pub const ATTRIBUTE_NAME: &str = "values";

fn dtype_to_u32(dtype: DataType) -> u32 {
    match dtype {
        DataType::Float32 => 1,
        DataType::UInt8 => 2,
        DataType::UInt64 => 3,
    }
}

fn dtype_from_u32(value: u32) -> Option<DataType> {
    match value {
        1 => Some(DataType::Float32),
        2 => Some(DataType::UInt8),
        3 => Some(DataType::UInt64),
        _ => None,
    }
}

fn layout_to_u32(layout: Layout) -> u32 {
    match layout {
        Layout::RowMajor => 1,
        Layout::ColMajor => 2,
    }
}

fn layout_from_u32(value: u32) -> Option<Layout> {
    match value {
        1 => Some(Layout::RowMajor),
        2 => Some(Layout::ColMajor),
        _ => None,
    }
}

/// Array file header.
///
/// Total size: 44 bytes
/// ```text
/// [MAGIC 8B][VERSION u32][DTYPE u32][LAYOUT u32][NDIM u32]
/// [ROWS u64][COLS u64][CHECKSUM u32]
/// ```
/// The checksum is a CRC32 of the first 40 bytes; element data follows
/// immediately after the header in cell-layout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayHeader {
    /// Format version.
    pub version: u32,
    /// Element type of the single attribute.
    pub dtype: DataType,
    /// Cell layout of the element data.
    pub layout: Layout,
    /// Number of dimensions (1 or 2).
    pub ndim: u32,
    /// Extent of dimension 0.
    pub rows: u64,
    /// Extent of dimension 1 (1 for 1-D arrays).
    pub cols: u64,
}

impl ArrayHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 44;

    /// Create a header for a 2-D array.
    pub fn matrix(dtype: DataType, layout: Layout, rows: u64, cols: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            dtype,
            layout,
            ndim: 2,
            rows,
            cols,
        }
    }

    /// Create a header for a 1-D array.
    pub fn vector(dtype: DataType, len: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            dtype,
            layout: Layout::ColMajor,
            ndim: 1,
            rows: len,
            cols: 1,
        }
    }

    /// Total element count.
    pub fn num_elements(&self) -> u64 {
        self.rows * self.cols
    }

    /// Serialize to bytes, computing the checksum.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&MAGIC);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&dtype_to_u32(self.dtype).to_le_bytes());
        bytes[16..20].copy_from_slice(&layout_to_u32(self.layout).to_le_bytes());
        bytes[20..24].copy_from_slice(&self.ndim.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.rows.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.cols.to_le_bytes());
        let checksum = crc32fast::hash(&bytes[0..40]);
        bytes[40..44].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Deserialize from bytes, verifying magic, version, and checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(QuarryDbError::invalid_format("header too small"));
        }

        if bytes[0..8] != MAGIC {
            return Err(QuarryDbError::invalid_format("invalid magic bytes"));
        }

        let stored_checksum = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
        if crc32fast::hash(&bytes[0..40]) != stored_checksum {
            return Err(QuarryDbError::ChecksumMismatch);
        }

        let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if version > FORMAT_VERSION {
            return Err(QuarryDbError::invalid_format(format!(
                "unsupported version {} (max supported: {})",
                version, FORMAT_VERSION
            )));
        }

        let dtype_raw = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let layout_raw = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let ndim = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        let rows = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        let cols = u64::from_le_bytes(bytes[32..40].try_into().unwrap());

        let dtype = dtype_from_u32(dtype_raw)
            .ok_or_else(|| QuarryDbError::invalid_format("unknown element type"))?;
        let layout = layout_from_u32(layout_raw)
            .ok_or_else(|| QuarryDbError::invalid_format("unknown cell layout"))?;

        if ndim != 1 && ndim != 2 {
            return Err(QuarryDbError::invalid_format(format!(
                "unsupported dimensionality {}",
                ndim
            )));
        }

        Ok(Self {
            version,
            dtype,
            layout,
            ndim,
            rows,
            cols,
        })
    }
}
