//! Per-split class statistics of a prepared dataset.

use std::collections::BTreeMap;
use std::path::Path;

use gleaner_pipeline::{ClassHistogram, SampleStore, Split};
use serde::{Deserialize, Serialize};

use crate::driver::MANIFEST_FILE;
use crate::error::IoError;
use crate::files::read_manifest;
use crate::store::FsSampleStore;

/// Counts for one split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitStats {
    /// The split.
    pub split: Split,
    /// Complete image/label pairs.
    pub images: usize,
    /// Malformed label lines.
    pub malformed: usize,
    /// Class id to images containing it.
    pub presence: BTreeMap<u32, usize>,
    /// Class id to total instances.
    pub instances: BTreeMap<u32, usize>,
}

/// Counts for a whole prepared dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Class names from the manifest.
    pub names: Vec<String>,
    /// Per-split counts in canonical order.
    pub splits: Vec<SplitStats>,
}

impl DatasetStats {
    /// Read `root/dataset.yaml` and count every split.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Manifest`] if the manifest is unreadable,
    /// [`IoError::MissingRoot`] if a split directory is missing, and
    /// [`IoError::Io`] if a label cannot be read.
    pub fn collect(root: &Path) -> Result<Self, IoError> {
        let manifest = read_manifest(&root.join(MANIFEST_FILE))?;
        let mut splits = Vec::with_capacity(Split::ALL.len());
        for split in Split::ALL {
            let store = FsSampleStore::open(
                &root.join("images").join(split.dir_name()),
                &root.join("labels").join(split.dir_name()),
            )?;
            let mut histogram = ClassHistogram::default();
            let mut malformed = 0;
            for stem in store.stems() {
                let label = store.label(&stem)?;
                malformed += label.malformed_count();
                histogram.add(&label);
            }
            let ids: Vec<u32> = histogram.iter_presence().map(|(id, _)| id).collect();
            splits.push(SplitStats {
                split,
                images: histogram.total_images(),
                malformed,
                presence: histogram.iter_presence().collect(),
                instances: ids.iter().map(|&id| (id, histogram.instances(id))).collect(),
            });
        }
        Ok(Self {
            names: manifest.names,
            splits,
        })
    }

    /// Format the statistics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Dataset Statistics\n{}", "=".repeat(60)));
        lines.push(format!(
            "{:<4} {:<20} {:>14} {:>14} {:>14}",
            "Id", "Class", "Train", "Val", "Test"
        ));
        lines.push("-".repeat(70));

        let cell = |s: &SplitStats, id: u32| {
            format!(
                "{}/{}",
                s.presence.get(&id).copied().unwrap_or(0),
                s.instances.get(&id).copied().unwrap_or(0)
            )
        };
        for (i, name) in self.names.iter().enumerate() {
            let Ok(id) = u32::try_from(i) else { break };
            let cells: Vec<String> = self.splits.iter().map(|s| cell(s, id)).collect();
            lines.push(format!(
                "{id:<4} {:<20} {:>14} {:>14} {:>14}",
                name.chars().take(20).collect::<String>(),
                cells.first().map_or("", String::as_str),
                cells.get(1).map_or("", String::as_str),
                cells.get(2).map_or("", String::as_str),
            ));
        }
        lines.push("-".repeat(70));
        lines.push("Cells are images/instances.".to_string());
        for s in &self.splits {
            lines.push(format!(
                "{}: {} images, {} malformed lines",
                s.split, s.images, s.malformed
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn reads_manifests_with_mapped_names() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for split in Split::ALL {
            fs::create_dir_all(root.join("images").join(split.dir_name())).unwrap();
            fs::create_dir_all(root.join("labels").join(split.dir_name())).unwrap();
        }
        let train = Split::Train.dir_name();
        fs::write(root.join("images").join(train).join("a.png"), b"img").unwrap();
        fs::write(
            root.join("labels").join(train).join("a.txt"),
            "1 0.5 0.5 0.2 0.2\n1 0.2 0.2 0.1 0.1\nbroken\n",
        )
        .unwrap();
        fs::write(
            root.join(MANIFEST_FILE),
            "path: ../data\ntrain: images/train\nval: images/val\nnames:\n  0: crop\n  1: weed\n",
        )
        .unwrap();

        let stats = DatasetStats::collect(root).unwrap();
        assert_eq!(stats.names, ["crop", "weed"]);
        let train = &stats.splits[0];
        assert_eq!(train.images, 1);
        assert_eq!(train.malformed, 1);
        assert_eq!(train.presence.get(&1), Some(&1));
        assert_eq!(train.instances.get(&1), Some(&2));
        assert!(stats.report().contains("weed"));
    }
}
