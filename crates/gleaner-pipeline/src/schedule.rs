//! Class balancing: per-class targets, deficits and the synthesis loop.
//!
//! The scheduler is sans-IO. It reads and writes samples through the
//! [`SampleStore`] trait, so the same loop runs against the filesystem
//! (in `gleaner-io`) or an in-memory store in tests.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::ClassCatalog;
use crate::config::{BalanceConfig, FilterConfig, TransformProfile};
use crate::histogram::ClassHistogram;
use crate::transform::TransformEngine;
use crate::types::{AugmentationRecord, Instance, LabelFile, RgbImage, Split};

/// Storage for the samples of one split.
pub trait SampleStore {
    /// Storage failure. Write failures abort balancing; read failures
    /// only skip the sample or void the attempt.
    type Error: std::error::Error;

    /// Stems of the samples currently in the split, sorted.
    fn stems(&self) -> Vec<String>;

    /// Labels of a sample.
    ///
    /// # Errors
    ///
    /// Returns the store's error when the labels cannot be read.
    fn label(&self, stem: &str) -> Result<LabelFile, Self::Error>;

    /// Decoded image of a sample.
    ///
    /// # Errors
    ///
    /// Returns the store's error when the image cannot be read.
    fn image(&self, stem: &str) -> Result<RgbImage, Self::Error>;

    /// Whether a sample with this stem already exists.
    fn exists(&self, stem: &str) -> bool;

    /// Persist a synthesized sample under [`AugmentationRecord::stem`].
    ///
    /// # Errors
    ///
    /// Returns the store's error when the sample cannot be written.
    fn write(&mut self, record: &AugmentationRecord) -> Result<(), Self::Error>;
}

/// Target image count for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTarget {
    /// Class id.
    pub class_id: u32,
    /// Images containing the class before balancing.
    pub present: usize,
    /// Desired number of images containing the class.
    pub target: usize,
    /// `max(0, target - present)`.
    pub deficit: usize,
}

/// Per-class targets for a split.
///
/// `target = round(balance_factor * total_images / num_classes)` for every
/// class in the catalog.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn compute_targets(
    histogram: &ClassHistogram,
    catalog: &ClassCatalog,
    balance_factor: f64,
) -> Vec<ClassTarget> {
    if catalog.is_empty() {
        return Vec::new();
    }
    let average = histogram.total_images() as f64 / catalog.len() as f64;
    let target = (balance_factor * average).round().max(0.0) as usize;
    catalog
        .ids()
        .map(|class_id| {
            let present = histogram.presence(class_id);
            ClassTarget {
                class_id,
                present,
                target,
                deficit: target.saturating_sub(present),
            }
        })
        .collect()
}

/// Why a class did not reach its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallReason {
    /// No image in the split contains the class.
    NoDonors,
    /// The attempt budget ran out first.
    BudgetExhausted,
}

/// A class whose deficit could not be met (donor exhaustion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorExhausted {
    /// Class id.
    pub class_id: u32,
    /// Class name.
    pub name: String,
    /// Deficit left when the scheduler gave up.
    pub remaining: usize,
    /// Attempts spent on the class.
    pub attempts: usize,
    /// Why the scheduler gave up.
    pub reason: ShortfallReason,
}

/// Balancing result for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassBalance {
    /// Class id.
    pub class_id: u32,
    /// Class name.
    pub name: String,
    /// Images containing the class before balancing.
    pub present: usize,
    /// Target image count.
    pub target: usize,
    /// Images containing the class after balancing.
    pub reached: usize,
    /// Deficit left after balancing.
    pub remaining: usize,
    /// Samples written while this class was the one being balanced.
    pub synthesized: usize,
}

/// Result of balancing one split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceOutcome {
    /// The split that was considered.
    pub split: Split,
    /// Per-class results, ascending id. Empty for non-training splits.
    pub classes: Vec<ClassBalance>,
    /// Samples written.
    pub synthesized: usize,
    /// Attempts rejected because no instance (or no instance of the
    /// class being balanced) survived.
    pub discarded: usize,
    /// Attempts that raised a recoverable error, plus samples whose
    /// labels could not be read.
    pub failed: usize,
    /// Classes that did not reach their target.
    pub exhausted: Vec<DonorExhausted>,
}

impl BalanceOutcome {
    fn untouched(split: Split) -> Self {
        Self {
            split,
            classes: Vec::new(),
            synthesized: 0,
            discarded: 0,
            failed: 0,
            exhausted: Vec::new(),
        }
    }
}

/// Drives the transform engine against donor images until every class
/// reaches its target or runs out of donors.
///
/// Deficit counters and the variant allocator live in this single loop,
/// so targets are never overshot by concurrent writers and names never
/// collide.
#[derive(Debug, Clone)]
pub struct BalanceScheduler {
    engine: TransformEngine,
    profiles: Vec<TransformProfile>,
    config: BalanceConfig,
}

impl BalanceScheduler {
    /// Create a scheduler.
    #[must_use]
    pub const fn new(
        filter: FilterConfig,
        profiles: Vec<TransformProfile>,
        config: BalanceConfig,
    ) -> Self {
        Self {
            engine: TransformEngine::new(filter),
            profiles,
            config,
        }
    }

    /// Balance one split.
    ///
    /// Only [`Split::Train`] is ever augmented; any other split returns an
    /// empty outcome without touching the store.
    ///
    /// A sample whose labels or image cannot be read is skipped and
    /// counted as failed.
    ///
    /// # Errors
    ///
    /// Propagates store errors from writing samples.
    #[allow(clippy::too_many_lines)]
    pub fn balance<S, R>(
        &self,
        store: &mut S,
        split: Split,
        catalog: &ClassCatalog,
        rng: &mut R,
    ) -> Result<BalanceOutcome, S::Error>
    where
        S: SampleStore,
        R: Rng + ?Sized,
    {
        if split != Split::Train {
            debug!(%split, "split is never augmented");
            return Ok(BalanceOutcome::untouched(split));
        }
        let mut outcome = BalanceOutcome::untouched(split);

        // Donors are the samples present before balancing starts.
        let mut labels = BTreeMap::new();
        for stem in store.stems() {
            match store.label(&stem) {
                Ok(label) => {
                    labels.insert(stem, label);
                }
                Err(e) => {
                    warn!(stem = %stem, error = %e, "failed to read labels; sample skipped");
                    outcome.failed += 1;
                }
            }
        }
        let histogram = ClassHistogram::from_label_files(labels.values());
        let targets = compute_targets(&histogram, catalog, self.config.balance_factor);

        let mut deficits: BTreeMap<u32, usize> =
            targets.iter().map(|t| (t.class_id, t.deficit)).collect();
        let mut gained: BTreeMap<u32, usize> = BTreeMap::new();
        let mut synthesized_for: BTreeMap<u32, usize> = BTreeMap::new();
        let mut next_variant: HashMap<String, u32> = HashMap::new();

        for target in &targets {
            let class_id = target.class_id;
            let start = deficits.get(&class_id).copied().unwrap_or(0);
            if start == 0 {
                continue;
            }
            let name = catalog.name(class_id).unwrap_or_default().to_string();

            let donors: Vec<&str> = labels
                .iter()
                .filter(|(_, label)| label.contains_class(class_id))
                .map(|(stem, _)| stem.as_str())
                .collect();
            if donors.is_empty() || self.profiles.is_empty() {
                warn!(class_id, class = %name, remaining = start, "no donor images for class");
                outcome.exhausted.push(DonorExhausted {
                    class_id,
                    name,
                    remaining: start,
                    attempts: 0,
                    reason: ShortfallReason::NoDonors,
                });
                continue;
            }

            let budget = start.saturating_mul(self.config.attempts_per_sample as usize);
            let mut attempts = 0;
            while deficits.get(&class_id).copied().unwrap_or(0) > 0 && attempts < budget {
                attempts += 1;
                let donor = donors[rng.gen_range(0..donors.len())];
                let profile = &self.profiles[rng.gen_range(0..self.profiles.len())];

                let image = match store.image(donor) {
                    Ok(image) => image,
                    Err(e) => {
                        warn!(stem = donor, error = %e, "failed to load donor image");
                        outcome.failed += 1;
                        continue;
                    }
                };
                let instances: Vec<Instance> = labels
                    .get(donor)
                    .map(|l| l.instances().cloned().collect())
                    .unwrap_or_default();

                let transformed = match self.engine.apply(&image, &instances, profile, rng) {
                    Ok(t) => t,
                    Err(e) => {
                        debug!(stem = donor, profile = %profile.name, error = %e, "augmentation attempt failed");
                        outcome.failed += 1;
                        continue;
                    }
                };
                if !transformed.instances.iter().any(|i| i.class_id == class_id) {
                    debug!(
                        stem = donor,
                        class_id,
                        kept = transformed.instances.len(),
                        "augmented sample lost the target class; discarded",
                    );
                    outcome.discarded += 1;
                    continue;
                }

                let variant = allocate_variant(&*store, &mut next_variant, donor);
                let record = AugmentationRecord {
                    source_stem: donor.to_string(),
                    variant,
                    image: transformed.image,
                    label: LabelFile::from_instances(transformed.instances),
                };
                store.write(&record)?;
                debug!(stem = %record.stem(), class_id, "synthesized sample written");

                outcome.synthesized += 1;
                *synthesized_for.entry(class_id).or_default() += 1;
                for present in record.label.class_ids() {
                    *gained.entry(present).or_default() += 1;
                    if let Some(d) = deficits.get_mut(&present) {
                        *d = d.saturating_sub(1);
                    }
                }
            }

            let remaining = deficits.get(&class_id).copied().unwrap_or(0);
            if remaining > 0 {
                warn!(class_id, class = %name, remaining, attempts, "attempt budget exhausted");
                outcome.exhausted.push(DonorExhausted {
                    class_id,
                    name,
                    remaining,
                    attempts,
                    reason: ShortfallReason::BudgetExhausted,
                });
            }
        }

        outcome.classes = targets
            .iter()
            .map(|t| ClassBalance {
                class_id: t.class_id,
                name: catalog.name(t.class_id).unwrap_or_default().to_string(),
                present: t.present,
                target: t.target,
                reached: t.present + gained.get(&t.class_id).copied().unwrap_or(0),
                remaining: deficits.get(&t.class_id).copied().unwrap_or(0),
                synthesized: synthesized_for.get(&t.class_id).copied().unwrap_or(0),
            })
            .collect();

        info!(
            %split,
            synthesized = outcome.synthesized,
            discarded = outcome.discarded,
            failed = outcome.failed,
            exhausted = outcome.exhausted.len(),
            "balancing finished",
        );
        Ok(outcome)
    }
}

/// Next unused variant index for a donor, skipping names already taken.
fn allocate_variant<S: SampleStore + ?Sized>(
    store: &S,
    next: &mut HashMap<String, u32>,
    donor: &str,
) -> u32 {
    let counter = next.entry(donor.to_string()).or_insert(0);
    while store.exists(&AugmentationRecord::stem_for(donor, *counter)) {
        *counter += 1;
    }
    let variant = *counter;
    *counter += 1;
    variant
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
mod tests {
    use std::collections::BTreeSet;
    use std::convert::Infallible;

    use image::Rgb;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::config::{AffineOp, GeometricOps, ParamRange, Toggle};
    use crate::geometry::{BoxGeometry, Geometry};

    #[derive(Default)]
    struct MemoryStore {
        images: BTreeMap<String, RgbImage>,
        labels: BTreeMap<String, LabelFile>,
        written: Vec<String>,
    }

    impl MemoryStore {
        fn insert(&mut self, stem: &str, classes: &[u32]) {
            let image = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 90]));
            let instances = classes
                .iter()
                .enumerate()
                .map(|(i, &c)| {
                    let cx = 0.3 + 0.4 * (i % 2) as f64;
                    Instance::new(c, Geometry::Box(BoxGeometry::new(cx, 0.5, 0.25, 0.5)))
                })
                .collect();
            self.images.insert(stem.to_string(), image);
            self.labels
                .insert(stem.to_string(), LabelFile::from_instances(instances));
        }
    }

    impl SampleStore for MemoryStore {
        type Error = Infallible;

        fn stems(&self) -> Vec<String> {
            self.labels.keys().cloned().collect()
        }

        fn label(&self, stem: &str) -> Result<LabelFile, Infallible> {
            Ok(self.labels.get(stem).cloned().unwrap_or_default())
        }

        fn image(&self, stem: &str) -> Result<RgbImage, Infallible> {
            Ok(self.images.get(stem).cloned().unwrap_or_default())
        }

        fn exists(&self, stem: &str) -> bool {
            self.labels.contains_key(stem)
        }

        fn write(&mut self, record: &AugmentationRecord) -> Result<(), Infallible> {
            let stem = record.stem();
            self.images.insert(stem.clone(), record.image.clone());
            self.labels.insert(stem.clone(), record.label.clone());
            self.written.push(stem);
            Ok(())
        }
    }

    fn catalog(n: usize) -> ClassCatalog {
        ClassCatalog::new((0..n).map(|i| format!("class_{i}")).collect())
    }

    fn flip_only() -> TransformProfile {
        TransformProfile {
            name: "flip-only".to_string(),
            geometric: GeometricOps {
                hflip: Some(Toggle { p: 0.5 }),
                ..GeometricOps::default()
            },
            ..TransformProfile::identity()
        }
    }

    fn scheduler(profile: TransformProfile) -> BalanceScheduler {
        BalanceScheduler::new(FilterConfig::default(), vec![profile], BalanceConfig::default())
    }

    /// 100 single-class images with presence {40, 30, 20, 10}.
    fn skewed_store() -> MemoryStore {
        let mut store = MemoryStore::default();
        let mut n = 0;
        for (class_id, count) in [(0, 40), (1, 30), (2, 20), (3, 10)] {
            for _ in 0..count {
                store.insert(&format!("img_{n:03}"), &[class_id]);
                n += 1;
            }
        }
        store
    }

    #[test]
    fn targets_follow_balance_factor() {
        let store = skewed_store();
        let h = ClassHistogram::from_label_files(store.labels.values());
        let targets = compute_targets(&h, &catalog(4), 1.5);
        let summary: Vec<(usize, usize, usize)> =
            targets.iter().map(|t| (t.present, t.target, t.deficit)).collect();
        assert_eq!(summary, [(40, 38, 0), (30, 38, 8), (20, 38, 18), (10, 38, 28)]);
    }

    #[test]
    fn skewed_train_split_is_balanced_to_target() {
        let mut store = skewed_store();
        let outcome = scheduler(flip_only())
            .balance(&mut store, Split::Train, &catalog(4), &mut ChaCha8Rng::seed_from_u64(42))
            .unwrap();

        let per_class: Vec<usize> = outcome.classes.iter().map(|c| c.synthesized).collect();
        assert_eq!(per_class, [0, 8, 18, 28]);
        assert_eq!(outcome.synthesized, 54);
        assert!(outcome.exhausted.is_empty());
        assert!(outcome.classes.iter().all(|c| c.remaining == 0));
        assert_eq!(outcome.classes[3].reached, 38);

        let unique: BTreeSet<&String> = store.written.iter().collect();
        assert_eq!(unique.len(), 54);
        assert_eq!(store.labels.len(), 154);
    }

    #[test]
    fn other_splits_are_never_augmented() {
        for split in [Split::Val, Split::Test] {
            let mut store = skewed_store();
            let outcome = scheduler(flip_only())
                .balance(&mut store, split, &catalog(4), &mut ChaCha8Rng::seed_from_u64(1))
                .unwrap();
            assert_eq!(outcome.synthesized, 0);
            assert!(outcome.classes.is_empty());
            assert!(store.written.is_empty());
        }
    }

    #[test]
    fn class_without_donors_is_reported() {
        let mut store = MemoryStore::default();
        for i in 0..6 {
            store.insert(&format!("a{i}"), &[0]);
        }
        let outcome = scheduler(flip_only())
            .balance(&mut store, Split::Train, &catalog(2), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        // target = round(1.5 * 6 / 2) = 5; class 0 already has 6.
        assert_eq!(outcome.synthesized, 0);
        assert_eq!(outcome.exhausted.len(), 1);
        let shortfall = &outcome.exhausted[0];
        assert_eq!(shortfall.class_id, 1);
        assert_eq!(shortfall.remaining, 5);
        assert_eq!(shortfall.reason, ShortfallReason::NoDonors);
    }

    #[test]
    fn attempts_that_drop_everything_write_nothing() {
        let mut store = MemoryStore::default();
        for i in 0..4 {
            store.insert(&format!("a{i}"), &[0]);
        }
        store.insert("b0", &[1]);
        let before = store.labels.len();

        let off_frame = TransformProfile {
            name: "off-frame".to_string(),
            geometric: GeometricOps {
                affine: Some(AffineOp {
                    p: 1.0,
                    scale: ParamRange::fixed(1.0),
                    rotate: ParamRange::fixed(0.0),
                    shear: ParamRange::fixed(0.0),
                    translate: ParamRange::fixed(1.0),
                }),
                ..GeometricOps::default()
            },
            ..TransformProfile::identity()
        };
        let outcome = scheduler(off_frame)
            .balance(&mut store, Split::Train, &catalog(2), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();

        assert_eq!(store.labels.len(), before);
        assert!(store.written.is_empty());
        assert_eq!(outcome.synthesized, 0);
        // target = round(1.5 * 5 / 2) = 4; deficit 3 -> 30 attempts.
        assert_eq!(outcome.discarded, 30);
        assert_eq!(outcome.exhausted[0].reason, ShortfallReason::BudgetExhausted);
        assert_eq!(outcome.exhausted[0].remaining, 3);
    }

    #[test]
    fn shared_samples_decrement_every_present_class() {
        let mut store = MemoryStore::default();
        for i in 0..3 {
            store.insert(&format!("a{i}"), &[0]);
        }
        store.insert("pair", &[1, 2]);
        let sched = BalanceScheduler::new(
            FilterConfig::default(),
            vec![TransformProfile::identity()],
            BalanceConfig {
                balance_factor: 3.0,
                ..BalanceConfig::default()
            },
        );
        let outcome = sched
            .balance(&mut store, Split::Train, &catalog(3), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();

        // target = 4: class 0 needs 1, classes 1 and 2 need 3 each, and
        // every sample made for class 1 also counts for class 2.
        assert_eq!(outcome.synthesized, 4);
        assert_eq!(outcome.classes[1].synthesized, 3);
        assert_eq!(outcome.classes[2].synthesized, 0);
        assert_eq!(outcome.classes[2].reached, 4);
        assert!(outcome.classes.iter().all(|c| c.remaining == 0));
    }

    /// Wraps a store and fails label reads for one stem.
    struct UnreadableLabel {
        inner: MemoryStore,
        broken: &'static str,
    }

    impl SampleStore for UnreadableLabel {
        type Error = std::io::Error;

        fn stems(&self) -> Vec<String> {
            self.inner.stems()
        }

        fn label(&self, stem: &str) -> Result<LabelFile, std::io::Error> {
            if stem == self.broken {
                return Err(std::io::Error::other("unreadable"));
            }
            Ok(self.inner.labels.get(stem).cloned().unwrap_or_default())
        }

        fn image(&self, stem: &str) -> Result<RgbImage, std::io::Error> {
            Ok(self.inner.images.get(stem).cloned().unwrap_or_default())
        }

        fn exists(&self, stem: &str) -> bool {
            self.inner.exists(stem)
        }

        fn write(&mut self, record: &AugmentationRecord) -> Result<(), std::io::Error> {
            match self.inner.write(record) {
                Ok(()) => Ok(()),
                Err(never) => match never {},
            }
        }
    }

    #[test]
    fn unreadable_label_skips_the_sample() {
        let mut store = UnreadableLabel {
            inner: skewed_store(),
            broken: "img_000",
        };
        let outcome = scheduler(flip_only())
            .balance(&mut store, Split::Train, &catalog(4), &mut ChaCha8Rng::seed_from_u64(42))
            .unwrap();

        // 99 readable samples: target = round(1.5 * 99 / 4) = 37.
        assert_eq!(outcome.failed, 1);
        let per_class: Vec<usize> = outcome.classes.iter().map(|c| c.synthesized).collect();
        assert_eq!(per_class, [0, 7, 17, 27]);
        assert!(outcome.exhausted.is_empty());
        assert!(outcome.classes.iter().all(|c| c.remaining == 0));
        assert!(!store.inner.written.iter().any(|s| s.starts_with("img_000_")));
    }

    #[test]
    fn variant_names_skip_existing_samples() {
        let mut store = MemoryStore::default();
        store.insert("a", &[0]);
        store.insert("a_aug0", &[0]);
        store.insert("b", &[1]);
        let mut next = HashMap::new();
        assert_eq!(allocate_variant(&store, &mut next, "a"), 1);
        assert_eq!(allocate_variant(&store, &mut next, "a"), 2);
        assert_eq!(allocate_variant(&store, &mut next, "b"), 0);
    }

    #[test]
    fn same_seed_same_outcome() {
        let run = |seed| {
            let mut store = skewed_store();
            let sched = BalanceScheduler::new(
                FilterConfig::default(),
                crate::config::default_profiles(),
                BalanceConfig::default(),
            );
            let outcome = sched
                .balance(&mut store, Split::Train, &catalog(4), &mut ChaCha8Rng::seed_from_u64(seed))
                .unwrap();
            (outcome, store.written)
        };
        assert_eq!(run(9), run(9));
    }
}
