//! On-disk layout of an IVF index group.
//!
//! A group is a directory holding four dense arrays plus a metadata file:
//!
//! ```text
//! <group>/centroids   2-D f32, D x K, col-major
//! <group>/parts       2-D corpus element type, D x N, col-major
//! <group>/ids         1-D u64, length N
//! <group>/indices     1-D u64, length K + 1
//! <group>/metadata    header + bincode records, appended per build
//! ```
//!
//! Each successful build appends one [`GroupMeta`] record (ingestion
//! timestamp, base size, storage version) so the group carries its own
//! provenance.

use crate::codec::{validate_indices, PartitionedCorpus};
use crate::error::{QuarryDbError, Result};
use crate::matrix::{Element, Layout, Matrix};
use crate::store::DenseArray;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a group metadata file: "QUARRYG\0"
const METADATA_MAGIC: [u8; 8] = *b"QUARRYG\0";

/// Version tag written into every metadata record.
pub const STORAGE_VERSION: u32 = 1;

const CENTROIDS_ARRAY: &str = "centroids";
const PARTS_ARRAY: &str = "parts";
const IDS_ARRAY: &str = "ids";
const INDICES_ARRAY: &str = "indices";
const METADATA_FILE: &str = "metadata";

/// Provenance of one build, appended to the group metadata on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMeta {
    /// Ingestion timestamp, seconds since the Unix epoch.
    pub ingested_at: u64,
    /// Number of corpus vectors written by this build.
    pub base_size: u64,
    /// Storage format version at write time.
    pub storage_version: u32,
}

impl GroupMeta {
    /// Create a record stamped with the current wall clock.
    pub fn now(base_size: u64) -> Self {
        let ingested_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            ingested_at,
            base_size,
            storage_version: STORAGE_VERSION,
        }
    }
}

/// Handle to an IVF index group directory.
#[derive(Debug, Clone)]
pub struct IvfGroup {
    path: PathBuf,
}

impl IvfGroup {
    /// Create the group directory (and parents). Idempotent on an existing
    /// directory.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    /// Open an existing group.
    ///
    /// # Errors
    /// `Config` if the directory or any of the four arrays is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(QuarryDbError::config(format!(
                "group {} does not exist",
                path.display()
            )));
        }
        let group = Self { path };
        for name in [CENTROIDS_ARRAY, PARTS_ARRAY, IDS_ARRAY, INDICES_ARRAY] {
            if !group.array_path(name).is_file() {
                return Err(QuarryDbError::config(format!(
                    "group {} is missing the {} array",
                    group.path.display(),
                    name
                )));
            }
        }
        Ok(group)
    }

    /// Root directory of the group.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn array_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Path of the reshuffled corpus array.
    pub fn parts_path(&self) -> PathBuf {
        self.array_path(PARTS_ARRAY)
    }

    /// Path of the id array.
    pub fn ids_path(&self) -> PathBuf {
        self.array_path(IDS_ARRAY)
    }

    /// Persist a trained index: centroids, the partitioned corpus, and one
    /// appended metadata record.
    ///
    /// # Errors
    /// `Config`/`DataIntegrity` if the pieces disagree on shape; `Io` /
    /// `StoreIo` on write failure.
    pub fn write_index<T: Element>(
        &self,
        centroids: &Matrix<f32>,
        corpus: &PartitionedCorpus<T>,
        meta: GroupMeta,
    ) -> Result<()> {
        if centroids.layout() != Layout::ColMajor {
            return Err(QuarryDbError::config("centroids must be col-major"));
        }
        if centroids.num_rows() != corpus.shuffled.num_rows() {
            return Err(QuarryDbError::dimension_mismatch(
                centroids.num_rows(),
                corpus.shuffled.num_rows(),
            ));
        }
        if corpus.indices.len() != centroids.num_cols() + 1 {
            return Err(QuarryDbError::data_integrity(format!(
                "{} partition offsets for {} centroids",
                corpus.indices.len(),
                centroids.num_cols()
            )));
        }
        validate_indices(&corpus.indices, corpus.shuffled.num_cols() as u64)?;
        if corpus.ids.len() != corpus.shuffled.num_cols() {
            return Err(QuarryDbError::data_integrity(format!(
                "{} ids for {} corpus columns",
                corpus.ids.len(),
                corpus.shuffled.num_cols()
            )));
        }

        let mut centroids_array = DenseArray::create_matrix::<f32>(
            self.array_path(CENTROIDS_ARRAY),
            Layout::ColMajor,
            centroids.num_rows() as u64,
            centroids.num_cols() as u64,
        )?;
        centroids_array.write_all(centroids.raveled())?;
        centroids_array.close()?;

        let mut parts_array = DenseArray::create_matrix::<T>(
            self.array_path(PARTS_ARRAY),
            Layout::ColMajor,
            corpus.shuffled.num_rows() as u64,
            corpus.shuffled.num_cols() as u64,
        )?;
        parts_array.write_all(corpus.shuffled.raveled())?;
        parts_array.close()?;

        let mut ids_array =
            DenseArray::create_vector::<u64>(self.array_path(IDS_ARRAY), corpus.ids.len() as u64)?;
        ids_array.write_all(&corpus.ids)?;
        ids_array.close()?;

        let mut indices_array = DenseArray::create_vector::<u64>(
            self.array_path(INDICES_ARRAY),
            corpus.indices.len() as u64,
        )?;
        indices_array.write_all(&corpus.indices)?;
        indices_array.close()?;

        self.append_metadata(meta)
    }

    /// Load the centroid matrix.
    pub fn load_centroids(&self) -> Result<Matrix<f32>> {
        DenseArray::open_read(self.array_path(CENTROIDS_ARRAY))?.read_matrix(Layout::ColMajor)
    }

    /// Load the partition offsets and validate them against the corpus
    /// width.
    pub fn load_indices(&self) -> Result<Vec<u64>> {
        let indices = DenseArray::open_read(self.array_path(INDICES_ARRAY))?.read_vec::<u64>()?;
        let parts = DenseArray::open_read(self.parts_path())?;
        validate_indices(&indices, parts.schema().num_cols())?;
        Ok(indices)
    }

    /// Load the id array.
    pub fn load_ids(&self) -> Result<Vec<u64>> {
        DenseArray::open_read(self.array_path(IDS_ARRAY))?.read_vec()
    }

    /// Materialize the whole reshuffled corpus (infinite-RAM path).
    pub fn load_parts<T: Element>(&self) -> Result<Matrix<T>> {
        DenseArray::open_read(self.parts_path())?.read_matrix(Layout::ColMajor)
    }

    /// All metadata records, oldest first.
    pub fn metadata(&self) -> Result<Vec<GroupMeta>> {
        let path = self.path.join(METADATA_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }

        let mut bytes = Vec::new();
        fs::File::open(&path)?.read_to_end(&mut bytes)?;
        if bytes.len() < 12 {
            return Err(QuarryDbError::invalid_format("metadata file too small"));
        }
        if bytes[0..8] != METADATA_MAGIC {
            return Err(QuarryDbError::invalid_format(
                "invalid metadata magic bytes",
            ));
        }
        let stored = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let data = &bytes[12..];
        if crc32fast::hash(data) != stored {
            return Err(QuarryDbError::ChecksumMismatch);
        }
        Ok(bincode::deserialize(data)?)
    }

    fn append_metadata(&self, meta: GroupMeta) -> Result<()> {
        let mut records = self.metadata()?;
        records.push(meta);

        let data = bincode::serialize(&records)?;
        let mut file = fs::File::create(self.path.join(METADATA_FILE))?;
        file.write_all(&METADATA_MAGIC)?;
        file.write_all(&crc32fast::hash(&data).to_le_bytes())?;
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(())
    }
}
