//! Shared types for the gleaner dataset pipeline.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;

/// Re-export `RgbImage` so downstream crates can pass decoded rasters
/// around without depending on `image` directly.
pub use image::RgbImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of a decoded image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Width as `f64`.
    #[must_use]
    pub fn w(self) -> f64 {
        f64::from(self.width)
    }

    /// Height as `f64`.
    #[must_use]
    pub fn h(self) -> f64 {
        f64::from(self.height)
    }
}

/// One annotated object: a class id plus its geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Dense 0-based class id.
    pub class_id: u32,
    /// Normalized geometry.
    pub geometry: Geometry,
}

impl Instance {
    /// Create a new instance.
    #[must_use]
    pub const fn new(class_id: u32, geometry: Geometry) -> Self {
        Self { class_id, geometry }
    }
}

/// A single line of a label file.
///
/// Lines that cannot be parsed are kept verbatim so rewriting a label
/// file never silently loses data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LabelLine {
    /// A successfully parsed instance.
    Instance(Instance),
    /// An unparseable line, preserved as read.
    Malformed {
        /// The original line text.
        raw: String,
        /// Why parsing failed.
        reason: String,
    },
}

/// Ordered annotation lines for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelFile {
    lines: Vec<LabelLine>,
}

impl LabelFile {
    /// Create a label file from parsed lines.
    #[must_use]
    pub const fn new(lines: Vec<LabelLine>) -> Self {
        Self { lines }
    }

    /// Create a label file containing only well-formed instances.
    #[must_use]
    pub fn from_instances(instances: Vec<Instance>) -> Self {
        Self {
            lines: instances.into_iter().map(LabelLine::Instance).collect(),
        }
    }

    /// All lines, in file order.
    #[must_use]
    pub fn lines(&self) -> &[LabelLine] {
        &self.lines
    }

    /// Consume the file and return its lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<LabelLine> {
        self.lines
    }

    /// Iterate over the well-formed instances, skipping malformed lines.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.lines.iter().filter_map(|line| match line {
            LabelLine::Instance(instance) => Some(instance),
            LabelLine::Malformed { .. } => None,
        })
    }

    /// Number of malformed lines.
    #[must_use]
    pub fn malformed_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| matches!(line, LabelLine::Malformed { .. }))
            .count()
    }

    /// Distinct class ids present in this file.
    #[must_use]
    pub fn class_ids(&self) -> BTreeSet<u32> {
        self.instances().map(|i| i.class_id).collect()
    }

    /// Whether at least one instance has the given class.
    #[must_use]
    pub fn contains_class(&self, class_id: u32) -> bool {
        self.instances().any(|i| i.class_id == class_id)
    }

    /// Returns `true` if the file has no lines at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Dataset partition a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Training data; the only split that is ever augmented.
    Train,
    /// Validation data.
    Val,
    /// Held-out test data.
    Test,
}

impl Split {
    /// All splits in canonical order.
    pub const ALL: [Self; 3] = [Self::Train, Self::Val, Self::Test];

    /// Directory name used under `images/` and `labels/`.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A synthesized sample together with where it came from.
///
/// Always owns fresh copies of its image and labels; it never aliases
/// the donor's storage.
#[derive(Debug, Clone)]
pub struct AugmentationRecord {
    /// Stem of the donor image.
    pub source_stem: String,
    /// Per-donor variant index, unique within the split.
    pub variant: u32,
    /// Transformed image.
    pub image: RgbImage,
    /// Co-transformed labels.
    pub label: LabelFile,
}

impl AugmentationRecord {
    /// File stem for a given donor and variant.
    #[must_use]
    pub fn stem_for(source_stem: &str, variant: u32) -> String {
        format!("{source_stem}_aug{variant}")
    }

    /// File stem of this record.
    #[must_use]
    pub fn stem(&self) -> String {
        Self::stem_for(&self.source_stem, self.variant)
    }
}

/// Errors raised by the pure pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// A label line could not be parsed.
    #[error("malformed label line {line:?}: {reason}")]
    MalformedLabel {
        /// The offending line.
        line: String,
        /// Why parsing failed.
        reason: String,
    },

    /// Split fractions are out of range or do not sum to 1.
    #[error(
        "split fractions must lie in [0, 1] and sum to 1 (train={train}, val={val}, test={test})"
    )]
    InvalidFractions {
        /// Requested train fraction.
        train: f64,
        /// Requested validation fraction.
        val: f64,
        /// Requested test fraction.
        test: f64,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Geometry that a transform cannot handle (e.g. a degenerate polygon).
    #[error("unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    /// A single augmentation attempt failed; callers discard it and move on.
    #[error("transform attempt failed: {0}")]
    TransformAttemptFailed(String),

    /// Image data was empty.
    #[error("empty image data")]
    EmptyInput,

    /// Failed to decode or encode an image.
    #[error("image codec error: {0}")]
    ImageDecode(#[from] image::ImageError),
}
