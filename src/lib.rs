//! quarry-db: an out-of-core IVF vector search engine in Rust.
//!
//! This crate implements the inverted-file (IVF) index pattern over dense
//! array storage: a corpus of fixed-dimension vectors is partitioned by
//! nearest-centroid assignment (k-means), reshuffled so each partition is
//! contiguous, and persisted as a group of typed arrays. Queries scan only
//! the `nprobe` nearest partitions, either with the whole corpus resident
//! or by streaming bounded batches of partitions through a reusable tile —
//! which is what lets a single machine serve top-k queries against corpora
//! far larger than memory.
//!
//! # Quick Start
//!
//! ```no_run
//! use quarry_db::{BuildParams, IvfIndex, Matrix, SearchParams};
//!
//! # fn main() -> quarry_db::Result<()> {
//! // Corpus: one vector per column, col-major.
//! let mut corpus = Matrix::<f32>::col_major(128, 10_000);
//! // ... fill with your embeddings ...
//!
//! // Build: train centroids, reshuffle, persist.
//! let params = BuildParams::new(64).with_seed(42);
//! let (index, warnings) = IvfIndex::build(&corpus, &params, "/data/my_index")?;
//! assert!(warnings.is_empty());
//!
//! // Search: probe 8 partitions, keep the working set under 100k columns.
//! let queries = Matrix::<f32>::col_major(128, 100);
//! let results = index.search(
//!     &queries,
//!     &SearchParams::new(8, 10).with_upper_bound(100_000),
//! )?;
//! println!("best id for query 0: {}", results.ids.get(0, 0));
//! # Ok(())
//! # }
//! ```
//!
//! # Memory model
//!
//! The streaming path's working set is one `D x upper_bound` tile plus one
//! bounded top-k heap per query per worker. `upper_bound = 0` disables
//! streaming and materializes the whole corpus, which is the faster choice
//! whenever it fits.
//!
//! # Modules
//!
//! - [`matrix`]: owned 2-D container with selectable layout
//! - [`heap`]: fixed-capacity top-k heaps over `(score, id)` pairs
//! - [`distance`]: L2 kernels and the GEMM scoring path
//! - [`store`]: dense typed array files with ranged reads
//! - [`codec`]: partition reshuffle encoding
//! - [`kmeans`]: Lloyd training with k-means++ and reassignment
//! - [`loader`]: bounded streaming of active partitions
//! - [`query`]: centroid selection and the two scoring orderings
//! - [`group`]: on-disk index layout and build provenance
//! - [`index`]: the build/open/search façade
//! - [`dataset`]: synthetic data and recall accounting for evaluation

pub mod codec;
pub mod constants;
pub mod dataset;
pub mod distance;
pub mod error;
pub mod group;
pub mod heap;
pub mod index;
pub mod kmeans;
pub mod loader;
pub mod matrix;
pub mod query;
pub mod store;

// Re-export commonly used types at crate root
pub use codec::{partition_corpus, sizes_to_indices, PartitionedCorpus};
pub use dataset::{recall_at_k, Dataset};
pub use error::{QuarryDbError, Result};
pub use group::{GroupMeta, IvfGroup};
pub use heap::{FixedMaxHeap, FixedMinHeap};
pub use index::{BuildParams, IvfIndex, SearchParams};
pub use kmeans::{InitMethod, KMeans, TrainOutcome, TrainingWarning};
pub use loader::PartitionLoader;
pub use matrix::{DataType, Element, Layout, Matrix};
pub use query::{ProbeSet, QueryResult};
pub use store::{ArraySchema, DenseArray, OpenMode};
