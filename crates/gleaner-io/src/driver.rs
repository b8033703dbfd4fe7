//! End-to-end `prepare` run over a dataset on disk.
//!
//! Stages run strictly in order and are not resumable:
//!
//! 1. Validate the configuration and the input roots (nothing is
//!    touched until both pass).
//! 2. Clear and recreate `output/images/{train,val,test}` and
//!    `output/labels/{train,val,test}`.
//! 3. Scan and reconcile the inputs ([`DriverState::Scanned`],
//!    [`DriverState::Reconciled`]).
//! 4. Resolve the class catalog and prune removed classes.
//! 5. Partition the stems ([`DriverState::Split`]).
//! 6. Copy every image and write its normalized label
//!    ([`DriverState::Normalized`]).
//! 7. Balance the training split ([`DriverState::Balanced`]).
//! 8. Write `dataset.yaml` ([`DriverState::Manifested`]).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use gleaner_export::Manifest;
use gleaner_pipeline::codec::normalize_label_file;
use gleaner_pipeline::split::plan;
use gleaner_pipeline::{
    BalanceScheduler, ClassCatalog, ClassHistogram, DatasetError, LabelFile, NormalizeStats,
    PrepareConfig, RunSummary, SampleStore, Split, SplitSummary,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::IoError;
use crate::files::{read_label_file, write_label_file, write_manifest};
use crate::index::{DatasetIndex, LABEL_EXTENSION, SamplePair};
use crate::prune::plan_prune;
use crate::store::FsSampleStore;

/// File name of the manifest written into the output root.
pub const MANIFEST_FILE: &str = "dataset.yaml";

/// Input and output locations of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRoots {
    /// Directory holding the source images.
    pub images: PathBuf,
    /// Directory holding the source label files (may equal `images`).
    pub labels: PathBuf,
    /// Output dataset root.
    pub output: PathBuf,
}

impl DatasetRoots {
    /// Output image directory of a split.
    #[must_use]
    pub fn images_dir(&self, split: Split) -> PathBuf {
        self.output.join("images").join(split.dir_name())
    }

    /// Output label directory of a split.
    #[must_use]
    pub fn labels_dir(&self, split: Split) -> PathBuf {
        self.output.join("labels").join(split.dir_name())
    }
}

/// Last stage a run completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DriverState {
    /// Inputs listed.
    Scanned,
    /// Orphans removed; every stem is a complete pair.
    Reconciled,
    /// Stems assigned to splits.
    Split,
    /// Images copied and labels normalized into the output.
    Normalized,
    /// Training split balanced.
    Balanced,
    /// Manifest written.
    Manifested,
}

/// Runs the `prepare` stages over one dataset.
#[derive(Debug, Clone)]
pub struct PipelineDriver {
    config: PrepareConfig,
    state: Option<DriverState>,
}

impl PipelineDriver {
    /// Create a driver, validating the configuration up front.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Dataset`] if the configuration is invalid.
    pub fn new(config: PrepareConfig) -> Result<Self, IoError> {
        config.validate()?;
        Ok(Self {
            config,
            state: None,
        })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PrepareConfig {
        &self.config
    }

    /// Last completed stage, `None` before [`PipelineDriver::run`].
    #[must_use]
    pub const fn state(&self) -> Option<DriverState> {
        self.state
    }

    fn advance(&mut self, state: DriverState) {
        info!(?state, "stage complete");
        self.state = Some(state);
    }

    /// Run every stage.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingRoot`] if an input directory is missing,
    /// [`IoError::Dataset`] if the output would overlap an input, and
    /// [`IoError::Io`] or [`IoError::Image`] for filesystem failures.
    /// Malformed lines, orphans, failed attempts and donor exhaustion are
    /// not errors; they are counted in the returned summary.
    #[allow(clippy::too_many_lines)]
    pub fn run(&mut self, roots: &DatasetRoots) -> Result<RunSummary, IoError> {
        let started = Instant::now();
        self.state = None;
        check_roots(roots)?;
        prepare_output(roots)?;

        let mut index = DatasetIndex::scan(&roots.images, &roots.labels)?;
        self.advance(DriverState::Scanned);
        let orphans = index.reconcile()?.counts();
        self.advance(DriverState::Reconciled);

        let pairs: BTreeMap<String, SamplePair> = index
            .pairs()
            .into_iter()
            .map(|p| (p.stem.clone(), p))
            .collect();
        let mut labels = BTreeMap::new();
        for (stem, pair) in &pairs {
            labels.insert(stem.clone(), read_label_file(&pair.label)?);
        }
        let paired = labels.len();

        let observed = ClassHistogram::from_label_files(labels.values());
        let mut catalog =
            ClassCatalog::resolve(self.config.class_names.as_deref(), observed.max_class_id());
        let mut pruned = 0;
        let remove = self.config.removal_set();
        if !remove.is_empty() {
            let (kept_catalog, _, outcome) = plan_prune(
                &catalog,
                &remove,
                labels.iter().map(|(s, l)| (s.as_str(), l)),
            );
            catalog = kept_catalog;
            for (stem, label) in outcome {
                match label {
                    Some(label) => {
                        labels.insert(stem, label);
                    }
                    None => {
                        labels.remove(&stem);
                        pruned += 1;
                    }
                }
            }
            info!(pruned, classes = catalog.len(), "classes pruned");
        }

        let stems: Vec<&str> = labels.keys().map(String::as_str).collect();
        let split_plan = plan(&stems, self.config.fractions(), self.config.seed)?;
        self.advance(DriverState::Split);

        let mut normalize = NormalizeStats::default();
        let mut before: BTreeMap<Split, ClassHistogram> = Split::ALL
            .into_iter()
            .map(|s| (s, ClassHistogram::default()))
            .collect();
        for (stem, split) in split_plan.iter() {
            let (Some(pair), Some(label)) = (pairs.get(stem), labels.get(stem)) else {
                continue;
            };
            let (normalized, stats) = normalize_label_file(label, self.config.output_format);
            normalize.merge(stats);
            copy_pair(roots, split, pair, &normalized)?;
            if let Some(h) = before.get_mut(&split) {
                h.add(&normalized);
            }
        }
        self.advance(DriverState::Normalized);

        let scheduler = BalanceScheduler::new(
            self.config.filter(),
            self.config.profiles.clone(),
            self.config.balance(),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut store = FsSampleStore::open(
            &roots.images_dir(Split::Train),
            &roots.labels_dir(Split::Train),
        )?;
        let balance = scheduler.balance(&mut store, Split::Train, &catalog, &mut rng)?;
        let mut after = before.clone();
        let mut train_after = ClassHistogram::default();
        for stem in store.stems() {
            train_after.add(&store.label(&stem)?);
        }
        after.insert(Split::Train, train_after);
        self.advance(DriverState::Balanced);

        let splits: Vec<SplitSummary> = Split::ALL
            .into_iter()
            .map(|s| {
                let empty = ClassHistogram::default();
                SplitSummary::new(
                    s,
                    before.get(&s).unwrap_or(&empty),
                    after.get(&s).unwrap_or(&empty),
                )
            })
            .collect();

        let manifest = Manifest {
            path: absolute(&roots.output).display().to_string(),
            names: catalog.names().to_vec(),
            counts: splits.iter().map(|s| (s.split, s.images_after)).collect(),
        };
        write_manifest(&roots.output.join(MANIFEST_FILE), &manifest)?;
        self.advance(DriverState::Manifested);

        Ok(RunSummary {
            seed: self.config.seed,
            classes: catalog.names().to_vec(),
            paired,
            orphans,
            pruned,
            normalize,
            splits,
            balance,
            duration: started.elapsed(),
        })
    }
}

/// Inputs must exist and the output must not be one of them (or contain
/// them), since the output is cleared.
fn check_roots(roots: &DatasetRoots) -> Result<(), IoError> {
    for root in [&roots.images, &roots.labels] {
        if !root.is_dir() {
            return Err(IoError::MissingRoot(root.clone()));
        }
    }
    let output = absolute(&roots.output);
    for input in [&roots.images, &roots.labels] {
        if absolute(input).starts_with(&output) {
            return Err(DatasetError::InvalidConfig(format!(
                "output {} would overwrite input {}",
                roots.output.display(),
                input.display()
            ))
            .into());
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn prepare_output(roots: &DatasetRoots) -> Result<(), IoError> {
    for kind in ["images", "labels"] {
        let dir = roots.output.join(kind);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(IoError::at(&dir))?;
        }
    }
    for split in Split::ALL {
        for dir in [roots.images_dir(split), roots.labels_dir(split)] {
            fs::create_dir_all(&dir).map_err(IoError::at(&dir))?;
        }
    }
    Ok(())
}

fn copy_pair(
    roots: &DatasetRoots,
    split: Split,
    pair: &SamplePair,
    label: &LabelFile,
) -> Result<(), IoError> {
    let Some(file_name) = pair.image.file_name() else {
        warn!(path = %pair.image.display(), "image path has no file name; skipped");
        return Ok(());
    };
    let dest = roots.images_dir(split).join(file_name);
    fs::copy(&pair.image, &dest).map_err(IoError::at(&pair.image))?;
    let label_dest = roots
        .labels_dir(split)
        .join(format!("{}.{LABEL_EXTENSION}", pair.stem));
    write_label_file(&label_dest, label)
}
