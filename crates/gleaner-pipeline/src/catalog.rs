//! Class catalog: dense class id to human-readable name, plus the batch
//! prune/remap operation that produces a new catalog.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{Instance, LabelFile, LabelLine};

/// Dense, 0-based class id to name mapping.
///
/// Read-only once built; [`ClassCatalog::prune`] returns a new catalog
/// rather than mutating this one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    /// Build a catalog from names in id order.
    #[must_use]
    pub const fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Build the catalog for a corpus.
    ///
    /// Explicit names are used as given. When labels reference ids beyond
    /// the explicit list (or no list was given), the catalog is extended
    /// with `class_{id}` placeholders up to `max_observed`.
    #[must_use]
    pub fn resolve(explicit: Option<&[String]>, max_observed: Option<u32>) -> Self {
        let mut names: Vec<String> = explicit.map(<[String]>::to_vec).unwrap_or_default();
        if let Some(max) = max_observed {
            let needed = max as usize + 1;
            while names.len() < needed {
                names.push(format!("class_{}", names.len()));
            }
        }
        Self { names }
    }

    /// Number of classes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if the catalog has no classes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of a class id, if it exists.
    #[must_use]
    pub fn name(&self, class_id: u32) -> Option<&str> {
        self.names.get(class_id as usize).map(String::as_str)
    }

    /// Id of a class name, if it exists.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| u32::try_from(i).ok())
    }

    /// All class ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u32> {
        (0..self.names.len()).filter_map(|i| u32::try_from(i).ok())
    }

    /// Names in id order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Remove the named classes and compact the remaining ids.
    ///
    /// Returns the new catalog and the old-id to new-id mapping. Ids
    /// absent from the mapping are removed. Names not in the catalog are
    /// ignored.
    #[must_use]
    pub fn prune(&self, remove: &BTreeSet<String>) -> (Self, ClassRemap) {
        let mut kept = Vec::with_capacity(self.names.len());
        let mut mapping = BTreeMap::new();
        for (old_id, name) in self.ids().zip(&self.names) {
            if remove.contains(name) {
                continue;
            }
            if let Ok(new_id) = u32::try_from(kept.len()) {
                mapping.insert(old_id, new_id);
                kept.push(name.clone());
            }
        }
        (Self { names: kept }, ClassRemap { mapping })
    }
}

/// Old class id to new class id. Absent ids mark removed classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRemap {
    mapping: BTreeMap<u32, u32>,
}

impl ClassRemap {
    /// New id for an old id, or `None` when the class was removed.
    #[must_use]
    pub fn get(&self, old_id: u32) -> Option<u32> {
        self.mapping.get(&old_id).copied()
    }

    /// Whether the mapping leaves every id unchanged.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.mapping.iter().all(|(old, new)| old == new)
    }

    /// Rewrite a label file's class ids.
    ///
    /// Returns `None` when any instance references a removed class (the
    /// whole pair is dropped). Malformed lines are carried unchanged.
    #[must_use]
    pub fn apply(&self, file: &LabelFile) -> Option<LabelFile> {
        let lines = file
            .lines()
            .iter()
            .map(|line| match line {
                LabelLine::Instance(instance) => self.get(instance.class_id).map(|new_id| {
                    LabelLine::Instance(Instance::new(new_id, instance.geometry.clone()))
                }),
                LabelLine::Malformed { .. } => Some(line.clone()),
            })
            .collect::<Option<Vec<_>>>()?;
        Some(LabelFile::new(lines))
    }
}
