//! gleaner-pipeline: pure dataset preparation core (sans-IO).
//!
//! Prepares image/annotation datasets for training through:
//! label parsing -> split planning -> geometry normalization ->
//! class histograms -> augmentation-driven class balancing.
//!
//! This crate has **no filesystem dependencies** -- it operates on
//! in-memory labels, decoded rasters and byte slices, and reads or writes
//! samples only through the [`SampleStore`] trait. All filesystem
//! interaction lives in `gleaner-io`.

pub mod blur;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod geometry;
pub mod histogram;
pub mod raster;
pub mod schedule;
pub mod split;
pub mod summary;
pub mod transform;
pub mod types;

pub use catalog::{ClassCatalog, ClassRemap};
pub use codec::{GeometryFormat, NormalizeStats};
pub use config::{BalanceConfig, FilterConfig, PrepareConfig, TransformProfile};
pub use geometry::{BoxGeometry, Geometry, Point};
pub use histogram::ClassHistogram;
pub use schedule::{BalanceOutcome, BalanceScheduler, ClassTarget, DonorExhausted, SampleStore};
pub use split::{SplitFractions, SplitPlan};
pub use summary::{OrphanCounts, RunSummary, SplitSummary};
pub use transform::{TransformEngine, Transformed};
pub use types::{
    AugmentationRecord, DatasetError, Dimensions, Instance, LabelFile, LabelLine, RgbImage, Split,
};
