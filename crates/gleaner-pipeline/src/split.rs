//! Deterministic train/val/test partitioning.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::types::{DatasetError, Split};

/// Allowed deviation of the fraction sum from 1.
pub const FRACTION_TOLERANCE: f64 = 1e-6;

/// Default training share.
pub const DEFAULT_TRAIN_FRAC: f64 = 0.8;
/// Default validation share.
pub const DEFAULT_VAL_FRAC: f64 = 0.1;
/// Default test share.
pub const DEFAULT_TEST_FRAC: f64 = 0.1;

/// Guards `floor` against products like `10 * 0.7 = 6.999...`.
const FLOOR_EPSILON: f64 = 1e-9;

/// Requested share of each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFractions {
    /// Training share.
    pub train: f64,
    /// Validation share.
    pub val: f64,
    /// Test share.
    pub test: f64,
}

impl Default for SplitFractions {
    fn default() -> Self {
        Self {
            train: DEFAULT_TRAIN_FRAC,
            val: DEFAULT_VAL_FRAC,
            test: DEFAULT_TEST_FRAC,
        }
    }
}

impl SplitFractions {
    /// Create fractions without validating them.
    #[must_use]
    pub const fn new(train: f64, val: f64, test: f64) -> Self {
        Self { train, val, test }
    }

    /// Check that every fraction lies in `[0, 1]` and they sum to 1.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidFractions`] otherwise.
    pub fn validate(&self) -> Result<(), DatasetError> {
        let parts = [self.train, self.val, self.test];
        let in_range = parts.iter().all(|f| f.is_finite() && (0.0..=1.0).contains(f));
        let sum: f64 = parts.iter().sum();
        if in_range && (sum - 1.0).abs() <= FRACTION_TOLERANCE {
            Ok(())
        } else {
            Err(DatasetError::InvalidFractions {
                train: self.train,
                val: self.val,
                test: self.test,
            })
        }
    }
}

/// Assignment of every stem to exactly one split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    assignments: BTreeMap<String, Split>,
}

impl SplitPlan {
    /// Split of a stem, if planned.
    #[must_use]
    pub fn split_of(&self, stem: &str) -> Option<Split> {
        self.assignments.get(stem).copied()
    }

    /// Stems assigned to a split, in sorted order.
    pub fn stems(&self, split: Split) -> impl Iterator<Item = &str> {
        self.assignments
            .iter()
            .filter(move |(_, s)| **s == split)
            .map(|(stem, _)| stem.as_str())
    }

    /// Number of stems in a split.
    #[must_use]
    pub fn count(&self, split: Split) -> usize {
        self.assignments.values().filter(|s| **s == split).count()
    }

    /// Total number of planned stems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Returns `true` if nothing was planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Iterate over `(stem, split)` pairs in stem order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Split)> {
        self.assignments.iter().map(|(stem, s)| (stem.as_str(), *s))
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn floor_share(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction + FLOOR_EPSILON).floor() as usize).min(n)
}

/// Partition stems into train/val/test.
///
/// The stems are sorted (so input order never matters), shuffled with a
/// ChaCha8 generator seeded from `seed`, then cut into three contiguous
/// slices. Train and val get `floor(n * fraction)` stems each, so they
/// are never more than one short of their share; test absorbs the
/// remainder. Duplicate stems are planned once.
///
/// # Errors
///
/// Returns [`DatasetError::InvalidFractions`] if the fractions do not
/// validate.
pub fn plan<S: AsRef<str>>(
    stems: &[S],
    fractions: SplitFractions,
    seed: u64,
) -> Result<SplitPlan, DatasetError> {
    fractions.validate()?;

    let mut ordered: Vec<&str> = stems.iter().map(AsRef::as_ref).collect();
    ordered.sort_unstable();
    ordered.dedup();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    ordered.shuffle(&mut rng);

    let n = ordered.len();
    let train_end = floor_share(n, fractions.train);
    let val_end = (train_end + floor_share(n, fractions.val)).min(n);

    let assignments = ordered
        .into_iter()
        .enumerate()
        .map(|(i, stem)| {
            let split = if i < train_end {
                Split::Train
            } else if i < val_end {
                Split::Val
            } else {
                Split::Test
            };
            (stem.to_string(), split)
        })
        .collect();

    Ok(SplitPlan { assignments })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use super::*;

    fn stems(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("img_{i:04}")).collect()
    }

    #[test]
    fn same_seed_same_plan() {
        let s = stems(57);
        let a = plan(&s, SplitFractions::default(), 42).unwrap();
        let b = plan(&s, SplitFractions::default(), 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn input_order_does_not_matter() {
        let s = stems(31);
        let mut reversed = s.clone();
        reversed.reverse();
        let a = plan(&s, SplitFractions::default(), 7).unwrap();
        let b = plan(&reversed, SplitFractions::default(), 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seed_changes_assignment() {
        let s = stems(100);
        let a = plan(&s, SplitFractions::default(), 1).unwrap();
        let b = plan(&s, SplitFractions::default(), 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn every_stem_in_exactly_one_split() {
        let s = stems(23);
        let p = plan(&s, SplitFractions::new(0.6, 0.2, 0.2), 3).unwrap();
        assert_eq!(p.len(), 23);
        let total: usize = Split::ALL.iter().map(|&sp| p.count(sp)).sum();
        assert_eq!(total, 23);
        for stem in &s {
            assert!(p.split_of(stem).is_some());
        }
    }

    #[test]
    fn sizes_follow_requested_shares() {
        let fractions = [
            SplitFractions::default(),
            SplitFractions::new(0.7, 0.2, 0.1),
            SplitFractions::new(0.5, 0.25, 0.25),
            SplitFractions::new(1.0, 0.0, 0.0),
            SplitFractions::new(0.0, 0.0, 1.0),
        ];
        for n in [0, 1, 2, 7, 10, 99, 100, 1001] {
            for f in fractions {
                let p = plan(&stems(n), f, 11).unwrap();
                for (split, share) in [(Split::Train, f.train), (Split::Val, f.val)] {
                    let want = n as f64 * share;
                    let got = p.count(split) as f64;
                    assert!(
                        got <= want + 1e-9 && want - got < 1.0,
                        "n={n} {f:?} {split}: got {got}, want {want}"
                    );
                }
                let want = n as f64 * f.test;
                let got = p.count(Split::Test) as f64;
                assert!(
                    got + 1e-9 >= want && got - want < 2.0,
                    "n={n} {f:?} test: got {got}, want {want}"
                );
            }
        }
    }

    #[test]
    fn exact_counts_for_round_numbers() {
        let p = plan(&stems(100), SplitFractions::default(), 42).unwrap();
        assert_eq!(p.count(Split::Train), 80);
        assert_eq!(p.count(Split::Val), 10);
        assert_eq!(p.count(Split::Test), 10);
    }

    #[test]
    fn each_share_is_floored_and_test_takes_the_rest() {
        // 7 * 0.5 = 3.5 and 7 * 0.25 = 1.75 floor to 3 and 1.
        let p = plan(&stems(7), SplitFractions::new(0.5, 0.25, 0.25), 0).unwrap();
        assert_eq!(p.count(Split::Train), 3);
        assert_eq!(p.count(Split::Val), 1);
        assert_eq!(p.count(Split::Test), 3);

        let p = plan(&stems(10), SplitFractions::new(0.7, 0.2, 0.1), 0).unwrap();
        assert_eq!(p.count(Split::Train), 7);
        assert_eq!(p.count(Split::Val), 2);
        assert_eq!(p.count(Split::Test), 1);
    }

    #[test]
    fn invalid_fractions_rejected() {
        let s = stems(10);
        for f in [
            SplitFractions::new(0.8, 0.1, 0.2),
            SplitFractions::new(1.2, -0.1, -0.1),
            SplitFractions::new(f64::NAN, 0.5, 0.5),
        ] {
            let err = plan(&s, f, 0).unwrap_err();
            assert!(matches!(err, DatasetError::InvalidFractions { .. }));
        }
    }

    #[test]
    fn fractions_within_tolerance_accepted() {
        assert!(SplitFractions::new(0.7, 0.2, 0.100_000_000_1).validate().is_ok());
    }
}
