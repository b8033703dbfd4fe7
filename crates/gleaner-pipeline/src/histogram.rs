//! Per-class frequency counts for one split.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::LabelFile;

/// Presence and instance counts per class id.
///
/// Presence is the number of images in which a class appears at least
/// once; balancing works on presence, not on instance totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassHistogram {
    presence: BTreeMap<u32, usize>,
    instances: BTreeMap<u32, usize>,
    total_images: usize,
}

impl ClassHistogram {
    /// Count classes across a set of label files, one per image.
    ///
    /// Malformed lines are ignored.
    pub fn from_label_files<'a>(files: impl IntoIterator<Item = &'a LabelFile>) -> Self {
        let mut histogram = Self::default();
        for file in files {
            histogram.add(file);
        }
        histogram
    }

    /// Count one more image.
    pub fn add(&mut self, file: &LabelFile) {
        self.total_images += 1;
        for instance in file.instances() {
            *self.instances.entry(instance.class_id).or_default() += 1;
        }
        for class_id in file.class_ids() {
            *self.presence.entry(class_id).or_default() += 1;
        }
    }

    /// Images containing the class at least once.
    #[must_use]
    pub fn presence(&self, class_id: u32) -> usize {
        self.presence.get(&class_id).copied().unwrap_or(0)
    }

    /// Total instances of the class.
    #[must_use]
    pub fn instances(&self, class_id: u32) -> usize {
        self.instances.get(&class_id).copied().unwrap_or(0)
    }

    /// Number of images counted.
    #[must_use]
    pub const fn total_images(&self) -> usize {
        self.total_images
    }

    /// Highest class id seen, if any.
    #[must_use]
    pub fn max_class_id(&self) -> Option<u32> {
        self.presence.keys().next_back().copied()
    }

    /// `(class_id, presence)` pairs in ascending id order.
    pub fn iter_presence(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.presence.iter().map(|(&id, &n)| (id, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_label_file;

    #[test]
    fn presence_counts_images_not_instances() {
        let files = [
            parse_label_file("0 0.5 0.5 0.1 0.1\n0 0.2 0.2 0.1 0.1\n1 0.7 0.7 0.1 0.1\n"),
            parse_label_file("0 0.5 0.5 0.1 0.1\n"),
            parse_label_file("2 0.5 0.5 0.1 0.1\nnot a label\n"),
        ];
        let h = ClassHistogram::from_label_files(&files);

        assert_eq!(h.total_images(), 3);
        assert_eq!(h.presence(0), 2);
        assert_eq!(h.instances(0), 3);
        assert_eq!(h.presence(1), 1);
        assert_eq!(h.presence(2), 1);
        assert_eq!(h.presence(7), 0);
        assert_eq!(h.max_class_id(), Some(2));
    }

    #[test]
    fn empty_label_file_still_counts_as_image() {
        let files = [LabelFile::default()];
        let h = ClassHistogram::from_label_files(&files);
        assert_eq!(h.total_images(), 1);
        assert_eq!(h.max_class_id(), None);
        assert_eq!(h.iter_presence().count(), 0);
    }
}
