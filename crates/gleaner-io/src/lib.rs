//! gleaner-io: Filesystem side of the dataset pipeline.
//!
//! Scans and reconciles image/label directories, reads and writes label
//! files and images, prunes classes on disk, provides the filesystem
//! [`SampleStore`](gleaner_pipeline::SampleStore) and drives a complete
//! `prepare` run.

pub mod driver;
pub mod error;
pub mod files;
pub mod index;
pub mod prune;
pub mod stats;
pub mod store;

pub use driver::{DatasetRoots, DriverState, MANIFEST_FILE, PipelineDriver};
pub use error::IoError;
pub use index::{DatasetIndex, Orphan, OrphanKind, ReconcileReport, SamplePair};
pub use prune::{PruneReport, prune_dataset, prune_output};
pub use stats::{DatasetStats, SplitStats};
pub use store::FsSampleStore;
