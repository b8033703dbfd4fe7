//! gleaner-export: Pure dataset manifest serializer (sans-IO)
//!
//! Renders the `dataset.yaml` manifest that training tools read to find
//! the split directories and class names, and reads it back.

pub mod manifest;

pub use manifest::{Manifest, ManifestError, parse_manifest, to_manifest};
