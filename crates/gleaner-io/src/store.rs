//! Filesystem-backed [`SampleStore`] for one split directory pair.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gleaner_pipeline::{AugmentationRecord, LabelFile, RgbImage, SampleStore};
use tracing::debug;

use crate::error::IoError;
use crate::files::{read_image, read_label_file, write_image, write_label_file};
use crate::index::{DatasetIndex, LABEL_EXTENSION};

/// Extension used when a donor's own extension is unknown.
const FALLBACK_EXTENSION: &str = "png";

/// Samples stored as `images_dir/<stem>.<ext>` plus
/// `labels_dir/<stem>.txt`.
#[derive(Debug, Clone)]
pub struct FsSampleStore {
    images_dir: PathBuf,
    labels_dir: PathBuf,
    images: BTreeMap<String, PathBuf>,
}

impl FsSampleStore {
    /// Index the complete pairs already present in the two directories.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingRoot`] if a directory does not exist and
    /// [`IoError::Io`] if one cannot be listed.
    pub fn open(images_dir: &Path, labels_dir: &Path) -> Result<Self, IoError> {
        let index = DatasetIndex::scan(images_dir, labels_dir)?;
        let images = index
            .pairs()
            .into_iter()
            .map(|pair| (pair.stem, pair.image))
            .collect();
        Ok(Self {
            images_dir: images_dir.to_path_buf(),
            labels_dir: labels_dir.to_path_buf(),
            images,
        })
    }

    /// Number of samples in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns `true` if the store holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn label_path(&self, stem: &str) -> PathBuf {
        self.labels_dir.join(format!("{stem}.{LABEL_EXTENSION}"))
    }

    fn extension_of(&self, stem: &str) -> &str {
        self.images
            .get(stem)
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .unwrap_or(FALLBACK_EXTENSION)
    }
}

impl SampleStore for FsSampleStore {
    type Error = IoError;

    fn stems(&self) -> Vec<String> {
        self.images.keys().cloned().collect()
    }

    fn label(&self, stem: &str) -> Result<LabelFile, IoError> {
        read_label_file(&self.label_path(stem))
    }

    fn image(&self, stem: &str) -> Result<RgbImage, IoError> {
        let path = self
            .images
            .get(stem)
            .cloned()
            .unwrap_or_else(|| self.images_dir.join(format!("{stem}.{FALLBACK_EXTENSION}")));
        read_image(&path)
    }

    fn exists(&self, stem: &str) -> bool {
        self.images.contains_key(stem) || self.label_path(stem).exists()
    }

    fn write(&mut self, record: &AugmentationRecord) -> Result<(), IoError> {
        let stem = record.stem();
        let ext = self.extension_of(&record.source_stem).to_string();
        let image_path = self.images_dir.join(format!("{stem}.{ext}"));
        write_image(&image_path, &record.image)?;
        write_label_file(&self.label_path(&stem), &record.label)?;
        debug!(stem = %stem, path = %image_path.display(), "sample written");
        self.images.insert(stem, image_path);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use gleaner_pipeline::codec::parse_label_file;
    use gleaner_pipeline::raster::encode_rgb;
    use image::{ImageFormat, Rgb};

    use super::*;

    #[test]
    fn written_samples_are_readable_and_keep_donor_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let (images, labels) = (tmp.path().join("images"), tmp.path().join("labels"));
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();

        let img = RgbImage::from_fn(8, 6, |x, _| Rgb([u8::try_from(x).unwrap() * 20, 0, 0]));
        fs::write(images.join("a.bmp"), encode_rgb(&img, ImageFormat::Bmp).unwrap()).unwrap();
        fs::write(labels.join("a.txt"), "0 0.5 0.5 0.5 0.5\n").unwrap();

        let mut store = FsSampleStore::open(&images, &labels).unwrap();
        assert_eq!(store.stems(), ["a"]);
        assert!(!store.exists("a_aug0"));

        let record = AugmentationRecord {
            source_stem: "a".to_string(),
            variant: 0,
            image: img.clone(),
            label: parse_label_file("1 0.25 0.25 0.1 0.1\n"),
        };
        store.write(&record).unwrap();

        assert!(images.join("a_aug0.bmp").is_file());
        assert!(store.exists("a_aug0"));
        assert_eq!(store.image("a_aug0").unwrap(), img);
        assert!(store.label("a_aug0").unwrap().contains_class(1));
        assert_eq!(store.len(), 2);
    }
}
