//! Run summary: counts from every stage of one `prepare` run.
//!
//! The driver fills a [`RunSummary`] as it goes. The CLI prints
//! [`RunSummary::report`] or the serde JSON form (`--json`).
//!
//! Durations are serialized as fractional seconds (`f64`) since
//! `std::time::Duration` does not implement serde traits.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::NormalizeStats;
use crate::histogram::ClassHistogram;
use crate::schedule::{BalanceOutcome, ShortfallReason};
use crate::types::Split;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Orphans removed while reconciling images with labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanCounts {
    /// Label files deleted because no image shared their stem.
    pub labels: usize,
    /// Images deleted because no label file shared their stem.
    pub images: usize,
}

impl OrphanCounts {
    /// Total orphans removed.
    #[must_use]
    pub const fn total(self) -> usize {
        self.labels + self.images
    }
}

/// Per-split image counts and class presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSummary {
    /// The split.
    pub split: Split,
    /// Images before balancing.
    pub images_before: usize,
    /// Images after balancing.
    pub images_after: usize,
    /// Class id to number of images containing it, before balancing.
    pub presence_before: BTreeMap<u32, usize>,
    /// Class id to number of images containing it, after balancing.
    pub presence_after: BTreeMap<u32, usize>,
}

impl SplitSummary {
    /// Build from the histograms taken before and after balancing.
    #[must_use]
    pub fn new(split: Split, before: &ClassHistogram, after: &ClassHistogram) -> Self {
        Self {
            split,
            images_before: before.total_images(),
            images_after: after.total_images(),
            presence_before: before.iter_presence().collect(),
            presence_after: after.iter_presence().collect(),
        }
    }
}

/// Everything a `prepare` run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Seed used for the split and augmentation.
    pub seed: u64,
    /// Final class names, indexed by class id.
    pub classes: Vec<String>,
    /// Complete image/label pairs after reconciliation.
    pub paired: usize,
    /// Orphans removed during reconciliation.
    pub orphans: OrphanCounts,
    /// Pairs removed because they contained a pruned class.
    pub pruned: usize,
    /// Label normalization counts (including malformed lines kept).
    pub normalize: NormalizeStats,
    /// Per-split counts, in canonical split order.
    pub splits: Vec<SplitSummary>,
    /// Balancing result for the training split.
    pub balance: BalanceOutcome,
    /// Wall time of the run.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl RunSummary {
    /// Format the summary as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Dataset Preparation Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Seed: {}  |  Classes: {}  |  Duration: {:.3}s",
            self.seed,
            self.classes.len(),
            self.duration.as_secs_f64(),
        ));
        lines.push(format!(
            "Pairs: {}  |  Orphans removed: {} ({} labels, {} images)  |  Pruned: {}",
            self.paired,
            self.orphans.total(),
            self.orphans.labels,
            self.orphans.images,
            self.pruned,
        ));
        lines.push(format!(
            "Labels: {} converted, {} out of range, {} malformed lines kept",
            self.normalize.converted, self.normalize.out_of_range, self.normalize.malformed,
        ));
        lines.push(String::new());

        lines.push(format!("{:<8} {:>10} {:>10}", "Split", "Before", "After"));
        lines.push("-".repeat(30));
        for s in &self.splits {
            lines.push(format!(
                "{:<8} {:>10} {:>10}",
                s.split.dir_name(),
                s.images_before,
                s.images_after,
            ));
        }
        lines.push(String::new());

        lines.push(format!(
            "{:<4} {:<20} {:>8} {:>8} {:>8} {:>10} {:>12}",
            "Id", "Class", "Present", "Target", "Reached", "Remaining", "Synthesized"
        ));
        lines.push("-".repeat(76));
        for c in &self.balance.classes {
            lines.push(format!(
                "{:<4} {:<20} {:>8} {:>8} {:>8} {:>10} {:>12}",
                c.class_id,
                truncate(&c.name, 20),
                c.present,
                c.target,
                c.reached,
                c.remaining,
                c.synthesized,
            ));
        }
        lines.push(String::new());
        lines.push(format!(
            "Synthesized: {}  |  Discarded: {}  |  Failed: {}",
            self.balance.synthesized, self.balance.discarded, self.balance.failed,
        ));

        for w in &self.balance.exhausted {
            let reason = match w.reason {
                ShortfallReason::NoDonors => "no donor images",
                ShortfallReason::BudgetExhausted => "attempt budget exhausted",
            };
            lines.push(format!(
                "warning: class {} ({}) short by {}: {reason} after {} attempts",
                w.class_id, w.name, w.remaining, w.attempts,
            ));
        }

        lines.join("\n")
    }
}

/// Cut a name to at most `width` characters for the fixed-width table.
fn truncate(name: &str, width: usize) -> String {
    name.chars().take(width).collect()
}
