//! Reconciliation against a real directory.

#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::Path;

use gleaner_io::{DatasetIndex, OrphanKind};

fn touch(dir: &Path, name: &str) {
    fs::write(dir.join(name), b"x").unwrap();
}

#[test]
fn eight_pairs_and_two_orphans() {
    let tmp = tempfile::tempdir().unwrap();
    let images = tmp.path().join("images");
    let labels = tmp.path().join("labels");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(&labels).unwrap();

    for i in 0..8 {
        touch(&images, &format!("p{i}.jpg"));
        touch(&labels, &format!("p{i}.txt"));
    }
    touch(&labels, "lonely.txt");
    touch(&images, "unlabeled.png");

    let mut index = DatasetIndex::scan(&images, &labels).unwrap();
    assert_eq!(index.len(), 10);

    let report = index.reconcile().unwrap();
    let counts = report.counts();
    assert_eq!(counts.labels, 1);
    assert_eq!(counts.images, 1);
    assert_eq!(report.removed[0].kind, OrphanKind::Label);
    assert_eq!(report.removed[1].kind, OrphanKind::Image);

    assert_eq!(index.pairs().len(), 8);
    assert!(!labels.join("lonely.txt").exists());
    assert!(!images.join("unlabeled.png").exists());
    assert!(images.join("p3.jpg").exists());

    // A second pass finds nothing more to remove.
    assert!(index.reconcile().unwrap().removed.is_empty());
    let rescanned = DatasetIndex::scan(&images, &labels).unwrap();
    assert_eq!(rescanned.pairs(), index.pairs());
}
