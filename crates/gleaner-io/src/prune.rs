//! Removing classes from a dataset on disk.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use gleaner_pipeline::{ClassCatalog, ClassRemap, LabelFile, Split};
use tracing::{info, warn};

use crate::driver::MANIFEST_FILE;
use crate::error::IoError;
use crate::files::{read_label_file, read_manifest, write_label_file, write_manifest};
use crate::index::{DatasetIndex, SamplePair};

/// Result of pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Catalog after removal, ids renumbered densely.
    pub catalog: ClassCatalog,
    /// Pairs deleted because they contained a removed class.
    pub removed: usize,
    /// Label files rewritten with new ids.
    pub rewritten: usize,
}

/// Split labels into those that survive (remapped) and the stems that
/// contain a removed class.
///
/// Names in `remove` that are not in the catalog are ignored with a
/// warning.
#[must_use]
pub fn plan_prune<'a, I>(
    catalog: &ClassCatalog,
    remove: &BTreeSet<String>,
    labels: I,
) -> (ClassCatalog, ClassRemap, Vec<(String, Option<LabelFile>)>)
where
    I: IntoIterator<Item = (&'a str, &'a LabelFile)>,
{
    for name in remove {
        if catalog.id_of(name).is_none() {
            warn!(class = %name, "class to remove is not in the catalog");
        }
    }
    let (pruned, remap) = catalog.prune(remove);
    let outcome = labels
        .into_iter()
        .map(|(stem, label)| (stem.to_string(), remap.apply(label)))
        .collect();
    (pruned, remap, outcome)
}

/// Delete every pair whose label contains a removed class and rewrite the
/// remaining labels with renumbered ids. Malformed lines are kept, and
/// labels referencing ids outside the catalog count as removed.
///
/// Nothing is touched when no name in `remove` is in the catalog.
///
/// # Errors
///
/// Returns [`IoError::Io`] if a label cannot be read or written or a file
/// cannot be deleted.
pub fn prune_dataset(
    pairs: &[SamplePair],
    catalog: &ClassCatalog,
    remove: &BTreeSet<String>,
) -> Result<PruneReport, IoError> {
    if !remove.iter().any(|name| catalog.id_of(name).is_some()) {
        warn!(?remove, "no class to remove is in the catalog; nothing pruned");
        return Ok(PruneReport {
            catalog: catalog.clone(),
            removed: 0,
            rewritten: 0,
        });
    }
    let mut labels = Vec::with_capacity(pairs.len());
    for pair in pairs {
        labels.push(read_label_file(&pair.label)?);
    }
    let (pruned, remap, outcome) = plan_prune(
        catalog,
        remove,
        pairs.iter().map(|p| p.stem.as_str()).zip(&labels),
    );

    let mut report = PruneReport {
        catalog: pruned,
        removed: 0,
        rewritten: 0,
    };
    for ((pair, (_, new_label)), old_label) in pairs.iter().zip(outcome).zip(&labels) {
        match new_label {
            None => {
                fs::remove_file(&pair.image).map_err(IoError::at(&pair.image))?;
                fs::remove_file(&pair.label).map_err(IoError::at(&pair.label))?;
                info!(stem = %pair.stem, "removed pair containing a pruned class");
                report.removed += 1;
            }
            Some(label) if !remap.is_identity() && label != *old_label => {
                write_label_file(&pair.label, &label)?;
                report.rewritten += 1;
            }
            Some(_) => {}
        }
    }
    info!(
        removed = report.removed,
        rewritten = report.rewritten,
        classes = report.catalog.len(),
        "pruning finished",
    );
    Ok(report)
}

/// Prune every split of a prepared dataset and rewrite its manifest.
///
/// Class names come from `root/dataset.yaml`; the rewritten manifest
/// lists the remaining classes and the new per-split image counts.
///
/// # Errors
///
/// Returns [`IoError::Manifest`] if the manifest is unreadable,
/// [`IoError::MissingRoot`] if a split directory is missing, and
/// [`IoError::Io`] for filesystem failures.
pub fn prune_output(root: &Path, remove: &BTreeSet<String>) -> Result<PruneReport, IoError> {
    let manifest_path = root.join(MANIFEST_FILE);
    let mut manifest = read_manifest(&manifest_path)?;
    let catalog = ClassCatalog::new(manifest.names.clone());

    let mut total = PruneReport {
        catalog: catalog.prune(remove).0,
        removed: 0,
        rewritten: 0,
    };
    for split in Split::ALL {
        let images = root.join("images").join(split.dir_name());
        let labels = root.join("labels").join(split.dir_name());
        let pairs = DatasetIndex::scan(&images, &labels)?.pairs();
        let report = prune_dataset(&pairs, &catalog, remove)?;
        total.removed += report.removed;
        total.rewritten += report.rewritten;
        manifest.counts.insert(split, pairs.len() - report.removed);
    }

    manifest.names = total.catalog.names().to_vec();
    write_manifest(&manifest_path, &manifest)?;
    Ok(total)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pair(dir: &Path, stem: &str, label: &str) {
        fs::write(dir.join(format!("{stem}.png")), b"img").unwrap();
        fs::write(dir.join(format!("{stem}.txt")), label).unwrap();
    }

    #[test]
    fn removes_pairs_and_renumbers_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        pair(dir, "a", "0 0.5 0.5 0.2 0.2\n");
        pair(dir, "b", "1 0.5 0.5 0.2 0.2\n0 0.1 0.1 0.1 0.1\n");
        pair(dir, "c", "2 0.5 0.5 0.2 0.2\nnot a label\n");

        let catalog = ClassCatalog::new(vec!["crop".into(), "weed".into(), "stone".into()]);
        let remove = BTreeSet::from(["weed".to_string()]);
        let pairs = DatasetIndex::scan(dir, dir).unwrap().pairs();
        let report = prune_dataset(&pairs, &catalog, &remove).unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.rewritten, 1);
        assert_eq!(report.catalog.names(), ["crop", "stone"]);
        assert!(!dir.join("b.png").exists());
        assert!(!dir.join("b.txt").exists());

        let c = fs::read_to_string(dir.join("c.txt")).unwrap();
        assert!(c.starts_with("1 "));
        assert!(c.contains("not a label"));
        let a = fs::read_to_string(dir.join("a.txt")).unwrap();
        assert_eq!(a, "0 0.5 0.5 0.2 0.2\n");
    }

    #[test]
    fn unknown_names_change_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        pair(tmp.path(), "a", "0 0.5 0.5 0.2 0.2\n");
        let catalog = ClassCatalog::new(vec!["crop".into()]);
        let pairs = DatasetIndex::scan(tmp.path(), tmp.path()).unwrap().pairs();
        let report =
            prune_dataset(&pairs, &catalog, &BTreeSet::from(["ghost".to_string()])).unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.rewritten, 0);
    }
}
