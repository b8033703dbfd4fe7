//! Errors raised by the filesystem side.

use std::path::{Path, PathBuf};

use gleaner_export::ManifestError;
use gleaner_pipeline::DatasetError;

/// Errors raised while reading or writing a dataset on disk.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// A required input directory does not exist.
    #[error("dataset root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),

    /// A filesystem operation failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path the operation was applied to.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration or dataset content was rejected.
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// An image could not be decoded or encoded.
    #[error("image {}: {source}", path.display())]
    Image {
        /// Path of the image.
        path: PathBuf,
        /// Underlying codec error.
        #[source]
        source: DatasetError,
    },

    /// A dataset manifest could not be read or written.
    #[error("manifest {}: {source}", path.display())]
    Manifest {
        /// Path of the manifest.
        path: PathBuf,
        /// Underlying manifest error.
        #[source]
        source: ManifestError,
    },
}

impl IoError {
    /// Adapter for `map_err` that attaches `path` to an `std::io::Error`.
    pub(crate) fn at(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
