//! Dataset manifest (`dataset.yaml`) serializer and reader.
//!
//! The written manifest looks like:
//!
//! ```text
//! # gleaner
//! path: /data/out
//! train: images/train
//! val: images/val
//! test: images/test
//! nc: 2
//! names:
//! - crop
//! - weed
//! counts:
//!   train: 154
//!   val: 10
//!   test: 10
//! ```
//!
//! Reading accepts any YAML document with the same keys. `names` may be
//! a list or an id-to-name map (`0: crop`), and keys this crate does not
//! know (e.g. `download`) are ignored.
//!
//! Both directions are pure functions with no I/O.

use std::collections::BTreeMap;

use gleaner_pipeline::Split;
use serde::{Deserialize, Serialize};

/// Contents of a dataset manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Document", into = "Document")]
pub struct Manifest {
    /// Dataset root; split directories are relative to it.
    pub path: String,
    /// Class names indexed by class id.
    pub names: Vec<String>,
    /// Image count per split.
    pub counts: BTreeMap<Split, usize>,
}

impl Manifest {
    /// Number of classes.
    #[must_use]
    pub const fn nc(&self) -> usize {
        self.names.len()
    }

    /// Image directory of a split, relative to [`Manifest::path`].
    #[must_use]
    pub fn split_dir(split: Split) -> String {
        format!("images/{}", split.dir_name())
    }
}

/// Errors raised when writing or reading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The text is not a YAML document with the manifest's keys.
    #[error("invalid manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// `nc` disagrees with the number of names.
    #[error("nc is {nc} but {names} names are listed")]
    ClassCountMismatch {
        /// Declared class count.
        nc: usize,
        /// Listed names.
        names: usize,
    },
}

/// `names` as training tools write it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Names {
    List(Vec<String>),
    Map(BTreeMap<usize, String>),
}

impl Names {
    /// Dense names; gaps in a map are filled with `class_{id}`.
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::List(names) => names,
            Self::Map(map) => {
                let len = map.keys().next_back().map_or(0, |&max| max + 1);
                (0..len)
                    .map(|id| {
                        map.get(&id)
                            .filter(|name| !name.trim().is_empty())
                            .cloned()
                            .unwrap_or_else(|| format!("class_{id}"))
                    })
                    .collect()
            }
        }
    }
}

/// On-disk layout of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    train: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    val: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nc: Option<usize>,
    names: Names,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    counts: BTreeMap<Split, usize>,
}

impl From<Manifest> for Document {
    fn from(m: Manifest) -> Self {
        Self {
            path: m.path,
            train: Some(Manifest::split_dir(Split::Train)),
            val: Some(Manifest::split_dir(Split::Val)),
            test: Some(Manifest::split_dir(Split::Test)),
            nc: Some(m.names.len()),
            names: Names::List(m.names),
            counts: m.counts,
        }
    }
}

impl TryFrom<Document> for Manifest {
    type Error = ManifestError;

    fn try_from(doc: Document) -> Result<Self, ManifestError> {
        let names = doc.names.into_vec();
        if let Some(nc) = doc.nc
            && nc != names.len()
        {
            return Err(ManifestError::ClassCountMismatch {
                nc,
                names: names.len(),
            });
        }
        Ok(Self {
            path: doc.path,
            names,
            counts: doc.counts,
        })
    }
}

/// Serialize a manifest.
///
/// # Errors
///
/// Returns [`ManifestError::Yaml`] if the YAML encoder fails.
///
/// # Examples
///
/// ```
/// use gleaner_export::manifest::{Manifest, to_manifest};
///
/// let m = Manifest {
///     path: "/data/out".to_string(),
///     names: vec!["crop".to_string(), "weed".to_string()],
///     ..Manifest::default()
/// };
/// let text = to_manifest(&m).unwrap();
/// assert!(text.starts_with("# gleaner"));
/// assert!(text.contains("nc: 2"));
/// ```
pub fn to_manifest(manifest: &Manifest) -> Result<String, ManifestError> {
    let body = serde_yaml::to_string(manifest)?;
    Ok(format!("# gleaner\n{body}"))
}

/// Read a manifest.
///
/// # Errors
///
/// Returns [`ManifestError::Yaml`] when the text is not YAML or lacks
/// `names`, and [`ManifestError::ClassCountMismatch`] when `nc`
/// disagrees with the names.
pub fn parse_manifest(text: &str) -> Result<Manifest, ManifestError> {
    let doc: Document = serde_yaml::from_str(text)?;
    Manifest::try_from(doc)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest {
            path: "/data/out".to_string(),
            names: vec!["crop".to_string(), "weed".to_string()],
            counts: BTreeMap::from([(Split::Train, 154), (Split::Val, 10), (Split::Test, 10)]),
        }
    }

    #[test]
    fn header_always_contains_gleaner_identifier() {
        assert!(to_manifest(&Manifest::default()).unwrap().starts_with("# gleaner\n"));
    }

    #[test]
    fn lists_split_dirs_names_and_counts() {
        let text = to_manifest(&sample()).unwrap();
        assert!(text.contains("train: images/train\n"));
        assert!(text.contains("val: images/val\n"));
        assert!(text.contains("test: images/test\n"));
        assert!(text.contains("nc: 2\n"));
        assert!(text.contains("- crop\n"));
        assert!(text.contains("counts:\n  train: 154\n  val: 10\n  test: 10\n"));
    }

    #[test]
    fn parse_reads_back_what_was_written() {
        let m = sample();
        assert_eq!(parse_manifest(&to_manifest(&m).unwrap()).unwrap(), m);
    }

    #[test]
    fn awkward_names_survive() {
        let m = Manifest {
            path: "/tmp/x".to_string(),
            names: vec![
                "yes".to_string(),
                "12".to_string(),
                "it's: odd".to_string(),
                "- dash".to_string(),
            ],
            counts: BTreeMap::new(),
        };
        let text = to_manifest(&m).unwrap();
        assert!(!text.contains("counts:"));
        assert_eq!(parse_manifest(&text).unwrap(), m);
    }

    #[test]
    fn names_as_id_map() {
        let m = parse_manifest("path: /x\nnc: 1\nnames:\n  0: crop\n").unwrap();
        assert_eq!(m.names, ["crop"]);

        let gaps = parse_manifest("path: /x\nnames:\n  0: crop\n  2: weed\n").unwrap();
        assert_eq!(gaps.names, ["crop", "class_1", "weed"]);
    }

    #[test]
    fn names_as_flow_list() {
        let m = parse_manifest("path: /x\nnc: 2\nnames: [crop, weed]\n").unwrap();
        assert_eq!(m.names, ["crop", "weed"]);
        assert!(m.counts.is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let m = parse_manifest("path: ../data\ndownload: https://example.com/d.zip\nnames: [a]\n")
            .unwrap();
        assert_eq!(m.path, "../data");
        assert_eq!(m.nc(), 1);
    }

    #[test]
    fn missing_names_is_an_error() {
        let err = parse_manifest("path: /x\nnc: 0\n").unwrap_err();
        assert!(matches!(err, ManifestError::Yaml(_)));
    }

    #[test]
    fn nc_must_match_names() {
        let err = parse_manifest("path: /x\nnc: 3\nnames:\n  - a\n").unwrap_err();
        assert!(matches!(
            err,
            ManifestError::ClassCountMismatch { nc: 3, names: 1 }
        ));
    }

    #[test]
    fn bad_count_is_rejected() {
        let err = parse_manifest("path: /x\nnc: two\nnames: []\n").unwrap_err();
        assert!(matches!(err, ManifestError::Yaml(_)));
    }
}
