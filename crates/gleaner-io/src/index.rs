//! Dataset discovery and image/label reconciliation.
//!
//! [`DatasetIndex::scan`] lists an image directory and a label directory
//! (which may be the same directory) and keys every file by stem.
//! [`DatasetIndex::reconcile`] then deletes files without a partner so
//! that every remaining stem is a complete pair.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use gleaner_pipeline::OrphanCounts;
use gleaner_pipeline::raster::is_image_extension;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::IoError;

/// Extension of label files.
pub const LABEL_EXTENSION: &str = "txt";

/// Files found for one stem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Entry {
    image: Option<PathBuf>,
    label: Option<PathBuf>,
}

/// A complete image/label pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePair {
    /// Shared file stem.
    pub stem: String,
    /// Image path.
    pub image: PathBuf,
    /// Label path.
    pub label: PathBuf,
}

/// Which half of a pair was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanKind {
    /// A label file with no image.
    Label,
    /// An image with no label file.
    Image,
}

/// A file deleted during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    /// What was missing its partner.
    pub kind: OrphanKind,
    /// Stem of the file.
    pub stem: String,
    /// Path that was deleted.
    pub path: PathBuf,
}

/// Files removed by [`DatasetIndex::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Removed files, labels first, each group in stem order.
    pub removed: Vec<Orphan>,
}

impl ReconcileReport {
    /// Orphan counts by kind.
    #[must_use]
    pub fn counts(&self) -> OrphanCounts {
        let labels = self
            .removed
            .iter()
            .filter(|o| o.kind == OrphanKind::Label)
            .count();
        OrphanCounts {
            labels,
            images: self.removed.len() - labels,
        }
    }
}

/// Image and label files keyed by stem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetIndex {
    entries: BTreeMap<String, Entry>,
}

impl DatasetIndex {
    /// List `image_root` and `label_root` (not recursive).
    ///
    /// Images are files with a `jpg`, `jpeg`, `png`, `bmp` or `webp`
    /// extension in any case; labels are `*.txt`. When two images share a stem the
    /// first in path order is kept and the other ignored.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingRoot`] if either directory does not
    /// exist and [`IoError::Io`] if a directory cannot be listed.
    pub fn scan(image_root: &Path, label_root: &Path) -> Result<Self, IoError> {
        for root in [image_root, label_root] {
            if !root.is_dir() {
                return Err(IoError::MissingRoot(root.to_path_buf()));
            }
        }

        let mut entries: BTreeMap<String, Entry> = BTreeMap::new();
        for (stem, ext, path) in list_files(image_root)? {
            if !is_image_extension(&ext) {
                continue;
            }
            let entry = entries.entry(stem).or_default();
            match &entry.image {
                Some(kept) => {
                    warn!(path = %path.display(), kept = %kept.display(), "duplicate image stem; ignoring");
                }
                None => entry.image = Some(path),
            }
        }
        for (stem, ext, path) in list_files(label_root)? {
            if ext.eq_ignore_ascii_case(LABEL_EXTENSION) {
                entries.entry(stem).or_default().label = Some(path);
            }
        }

        debug!(
            stems = entries.len(),
            images = %image_root.display(),
            labels = %label_root.display(),
            "dataset scanned",
        );
        Ok(Self { entries })
    }

    /// Delete every label without an image, then every image without a
    /// label.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Io`] if a file cannot be deleted.
    pub fn reconcile(&mut self) -> Result<ReconcileReport, IoError> {
        let mut report = ReconcileReport::default();

        for (stem, entry) in &mut self.entries {
            if entry.image.is_none()
                && let Some(path) = entry.label.take()
            {
                fs::remove_file(&path).map_err(IoError::at(&path))?;
                info!(stem = %stem, path = %path.display(), "removed label without image");
                report.removed.push(Orphan {
                    kind: OrphanKind::Label,
                    stem: stem.clone(),
                    path,
                });
            }
        }
        for (stem, entry) in &mut self.entries {
            if entry.label.is_none()
                && let Some(path) = entry.image.take()
            {
                fs::remove_file(&path).map_err(IoError::at(&path))?;
                info!(stem = %stem, path = %path.display(), "removed image without label");
                report.removed.push(Orphan {
                    kind: OrphanKind::Image,
                    stem: stem.clone(),
                    path,
                });
            }
        }
        self.entries
            .retain(|_, e| e.image.is_some() && e.label.is_some());
        Ok(report)
    }

    /// Complete pairs in stem order.
    #[must_use]
    pub fn pairs(&self) -> Vec<SamplePair> {
        self.entries
            .iter()
            .filter_map(|(stem, e)| match (&e.image, &e.label) {
                (Some(image), Some(label)) => Some(SamplePair {
                    stem: stem.clone(),
                    image: image.clone(),
                    label: label.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Number of stems with at least one file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no files were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `(stem, extension, path)` for every regular file in `dir`, sorted by
/// path.
fn list_files(dir: &Path) -> Result<Vec<(String, String, PathBuf)>, IoError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(IoError::at(dir))? {
        let path = entry.map_err(IoError::at(dir))?.path();
        if !path.is_file() {
            continue;
        }
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) else {
            continue;
        };
        files.push((stem.to_string(), ext.to_string(), path.clone()));
    }
    files.sort_by(|a, b| a.2.cmp(&b.2));
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn missing_root_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = DatasetIndex::scan(&tmp.path().join("nope"), tmp.path()).unwrap_err();
        assert!(matches!(err, IoError::MissingRoot(_)));
    }

    #[test]
    fn extensions_are_case_insensitive_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "a.JPG", "a.txt", "b.png", "b.txt", "c.gif", "c.txt", "d.WEBP", "d.txt", "notes.md",
        ] {
            touch(tmp.path(), name);
        }
        let index = DatasetIndex::scan(tmp.path(), tmp.path()).unwrap();
        let stems: Vec<String> = index.pairs().into_iter().map(|p| p.stem).collect();
        assert_eq!(stems, ["a", "b", "d"]);
        // `c` has only a label; `notes` is ignored entirely.
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn duplicate_stems_keep_first_image() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a.jpg", "a.png", "a.txt"] {
            touch(tmp.path(), name);
        }
        let index = DatasetIndex::scan(tmp.path(), tmp.path()).unwrap();
        let pairs = index.pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].image.extension().unwrap(), "jpg");
    }
}
