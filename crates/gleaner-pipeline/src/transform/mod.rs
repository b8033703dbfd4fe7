//! Randomized image augmentation with annotation co-transform.
//!
//! [`TransformEngine::apply`] runs in a fixed order:
//!
//! 1. Sample every geometric operator into one [`GeometricPlan`]
//!    (flips, affine and perspective compose into a single homography;
//!    elastic and optical distortion follow as non-linear stages).
//! 2. Warp the pixels and map every instance through the same plan,
//!    dropping instances that end up mostly outside the frame or too
//!    small.
//! 3. Run the photometric operators, which never touch geometry.
//!
//! All randomness comes from the caller's generator, so a seeded
//! generator replays the same sequence of augmentations.

pub mod clahe;
pub mod clip;
pub mod photometric;
pub mod warp;
pub mod weather;

use rand::Rng;
use tracing::trace;

pub use self::warp::{GeometricPlan, Homography};
use crate::config::{FilterConfig, TransformProfile};
use crate::geometry::{BoxGeometry, Geometry, Point, bounds};
use crate::types::{DatasetError, Dimensions, Instance, RgbImage};

/// Subdivisions per outline edge when the plan bends straight lines.
const DENSIFY_STEPS: usize = 8;

/// Mapped areas below this (px²) count as collapsed.
const AREA_EPSILON: f64 = 1e-9;

/// Output of one augmentation attempt.
#[derive(Debug, Clone)]
pub struct Transformed {
    /// The new image; the input is never modified.
    pub image: RgbImage,
    /// Surviving instances, in input order, with every coordinate in `[0, 1]`.
    pub instances: Vec<Instance>,
    /// Number of instances dropped by the visibility and size filters.
    pub dropped: usize,
}

/// Applies transform profiles to images and their annotations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformEngine {
    filter: FilterConfig,
}

impl TransformEngine {
    /// Create an engine with the given drop thresholds.
    #[must_use]
    pub const fn new(filter: FilterConfig) -> Self {
        Self { filter }
    }

    /// The drop thresholds in use.
    #[must_use]
    pub const fn filter(&self) -> FilterConfig {
        self.filter
    }

    /// Augment one image and co-transform its instances.
    ///
    /// Parameters are drawn fresh from `rng` on every call.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::TransformAttemptFailed`] for an empty image
    /// or a numerically broken plan, and
    /// [`DatasetError::UnsupportedGeometry`] for a polygon with fewer than
    /// three points. Both only void this attempt.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        image: &RgbImage,
        instances: &[Instance],
        profile: &TransformProfile,
        rng: &mut R,
    ) -> Result<Transformed, DatasetError> {
        let dims = Dimensions::of(image);
        if dims.width == 0 || dims.height == 0 {
            return Err(DatasetError::TransformAttemptFailed(
                "image has no pixels".to_string(),
            ));
        }

        let plan = GeometricPlan::sample(&profile.geometric, dims, rng)?;

        let mut kept = Vec::with_capacity(instances.len());
        let mut dropped = 0;
        for instance in instances {
            match self.co_transform(instance, &plan)? {
                Some(mapped) => kept.push(mapped),
                None => dropped += 1,
            }
        }

        let warped = plan.warp(image);
        let image = photometric::apply(warped, &profile.photometric, rng);

        trace!(
            profile = %profile.name,
            kept = kept.len(),
            dropped,
            "transform applied",
        );
        Ok(Transformed {
            image,
            instances: kept,
            dropped,
        })
    }

    /// Map one instance through the plan.
    ///
    /// Returns `Ok(None)` when the instance is dropped by the filters.
    fn co_transform(
        &self,
        instance: &Instance,
        plan: &GeometricPlan,
    ) -> Result<Option<Instance>, DatasetError> {
        let outline = instance.geometry.outline();
        if outline.len() < 3 {
            return Err(DatasetError::UnsupportedGeometry(format!(
                "polygon with {} points",
                outline.len()
            )));
        }

        let dims = plan.dims();
        let (w, h) = (dims.w(), dims.h());
        let pixels: Vec<Point> = outline
            .iter()
            .map(|p| Point::new(p.x * w, p.y * h))
            .collect();
        let pixels = if plan.is_nonlinear() {
            clip::densify(&pixels, DENSIFY_STEPS)
        } else {
            pixels
        };

        let mapped = pixels
            .iter()
            .map(|&p| plan.forward(p))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                DatasetError::TransformAttemptFailed("point mapped to a non-finite position".to_string())
            })?;

        let mapped_area = clip::outline_area(&mapped);
        let visible = clip::clip_to_frame(&mapped, w, h);
        if mapped_area < AREA_EPSILON || visible.len() < 3 {
            return Ok(None);
        }
        let visibility = clip::outline_area(&visible) / mapped_area;

        let (x0, y0, x1, y1) = bounds(&visible);
        let (bw, bh) = (x1 - x0, y1 - y0);
        let filter = &self.filter;
        if visibility < filter.min_visibility
            || bw * bh < filter.min_area
            || bw < filter.min_side
            || bh < filter.min_side
        {
            return Ok(None);
        }

        let geometry = match instance.geometry {
            Geometry::Box(_) => {
                Geometry::Box(BoxGeometry::from_corners(x0 / w, y0 / h, x1 / w, y1 / h).clip())
            }
            Geometry::Polygon(_) => Geometry::Polygon(
                visible
                    .iter()
                    .map(|p| Point::new(p.x / w, p.y / h).clamped())
                    .collect(),
            ),
        };
        Ok(Some(Instance::new(instance.class_id, geometry)))
    }
}

/// Whether an operator with probability `p` fires on this draw.
pub(crate) fn fires<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    rng.r#gen::<f64>() < p
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::config::{AffineOp, GeometricOps, ParamRange, Toggle};

    fn image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([u8::try_from(x % 256).unwrap(), u8::try_from(y % 256).unwrap(), 128])
        })
    }

    fn boxed(class_id: u32, cx: f64, cy: f64, bw: f64, bh: f64) -> Instance {
        Instance::new(class_id, Geometry::Box(BoxGeometry::new(cx, cy, bw, bh)))
    }

    fn profile(geometric: GeometricOps) -> TransformProfile {
        TransformProfile {
            name: "test".to_string(),
            geometric,
            ..TransformProfile::identity()
        }
    }

    fn translate_by(fraction: f64) -> GeometricOps {
        GeometricOps {
            affine: Some(AffineOp {
                p: 1.0,
                scale: ParamRange::fixed(1.0),
                rotate: ParamRange::fixed(0.0),
                shear: ParamRange::fixed(0.0),
                translate: ParamRange::fixed(fraction),
            }),
            ..GeometricOps::default()
        }
    }

    #[test]
    fn identity_profile_keeps_everything() {
        let img = image(100, 80);
        let instances = vec![boxed(0, 0.5, 0.5, 0.2, 0.25)];
        let engine = TransformEngine::default();
        let out = engine
            .apply(&img, &instances, &TransformProfile::identity(), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        assert_eq!(out.image, img);
        assert_eq!(out.dropped, 0);
        let b = out.instances[0].geometry.bounding_box();
        assert!((b.cx - 0.5).abs() < 1e-9 && (b.w - 0.2).abs() < 1e-9);
    }

    #[test]
    fn hflip_mirrors_boxes() {
        let img = image(100, 100);
        let instances = vec![boxed(1, 0.2, 0.5, 0.1, 0.1)];
        let p = profile(GeometricOps {
            hflip: Some(Toggle { p: 1.0 }),
            ..GeometricOps::default()
        });
        let out = TransformEngine::default()
            .apply(&img, &instances, &p, &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        let b = out.instances[0].geometry.bounding_box();
        assert!((b.cx - 0.8).abs() < 1e-9, "{b:?}");
        assert!(out.instances[0].geometry.is_box());
    }

    #[test]
    fn instance_pushed_out_of_frame_is_dropped() {
        let img = image(100, 100);
        // Box spans x in [0.75, 0.95]; a 0.2 shift leaves 1/4 of it visible.
        let instances = vec![boxed(0, 0.85, 0.5, 0.2, 0.2), boxed(1, 0.3, 0.5, 0.2, 0.2)];
        let out = TransformEngine::default()
            .apply(&img, &instances, &profile(translate_by(0.2)), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        assert_eq!(out.dropped, 1);
        assert_eq!(out.instances.len(), 1);
        assert_eq!(out.instances[0].class_id, 1);
    }

    #[test]
    fn partially_visible_box_is_clipped_to_frame() {
        let img = image(100, 100);
        // x in [0.7, 0.9] shifted by 0.2 -> [0.9, 1.1]: half visible.
        let instances = vec![boxed(0, 0.8, 0.5, 0.2, 0.2)];
        let out = TransformEngine::default()
            .apply(&img, &instances, &profile(translate_by(0.2)), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        let (x0, _, x1, _) = out.instances[0].geometry.bounding_box().corners();
        assert!((x0 - 0.9).abs() < 1e-9);
        assert!((x1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tiny_instances_are_dropped() {
        let img = image(100, 100);
        // 3 px wide: below the 4 px minimum side.
        let instances = vec![boxed(0, 0.5, 0.5, 0.03, 0.2)];
        let out = TransformEngine::default()
            .apply(&img, &instances, &TransformProfile::identity(), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        assert!(out.instances.is_empty());
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn degenerate_polygon_is_unsupported() {
        let img = image(10, 10);
        let instances = vec![Instance::new(
            0,
            Geometry::Polygon(vec![Point::new(0.1, 0.1), Point::new(0.5, 0.5)]),
        )];
        let err = TransformEngine::default()
            .apply(&img, &instances, &TransformProfile::identity(), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, DatasetError::UnsupportedGeometry(_)));
    }

    #[test]
    fn empty_image_fails_attempt() {
        let err = TransformEngine::default()
            .apply(&RgbImage::new(0, 0), &[], &TransformProfile::identity(), &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, DatasetError::TransformAttemptFailed(_)));
    }

    #[test]
    fn outputs_respect_bounds_and_size_limits_for_every_builtin_profile() {
        let img = image(160, 120);
        let instances = vec![
            boxed(0, 0.5, 0.5, 0.3, 0.3),
            boxed(1, 0.1, 0.1, 0.15, 0.2),
            boxed(2, 0.92, 0.85, 0.12, 0.2),
            Instance::new(
                3,
                Geometry::Polygon(vec![
                    Point::new(0.3, 0.6),
                    Point::new(0.6, 0.55),
                    Point::new(0.55, 0.95),
                    Point::new(0.35, 0.9),
                ]),
            ),
        ];
        let engine = TransformEngine::default();
        let filter = engine.filter();
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        for name in TransformProfile::BUILTIN {
            let p = TransformProfile::named(name).unwrap();
            for _ in 0..15 {
                let Ok(out) = engine.apply(&img, &instances, &p, &mut rng) else {
                    continue;
                };
                assert_eq!(out.image.dimensions(), img.dimensions());
                assert_eq!(out.instances.len() + out.dropped, instances.len());
                for inst in &out.instances {
                    assert!(inst.geometry.is_normalized(), "{name}: {inst:?}");
                    let b = inst.geometry.bounding_box();
                    let (pw, ph) = (b.w * 160.0, b.h * 120.0);
                    assert!(pw >= filter.min_side - 1e-6, "{name}: width {pw}");
                    assert!(ph >= filter.min_side - 1e-6, "{name}: height {ph}");
                    assert!(pw * ph >= filter.min_area - 1e-6, "{name}: area {}", pw * ph);
                }
            }
        }
    }

    #[test]
    fn same_seed_replays_same_augmentation() {
        let img = image(64, 48);
        let instances = vec![boxed(0, 0.5, 0.5, 0.4, 0.4)];
        let p = TransformProfile::field();
        let engine = TransformEngine::default();
        let a = engine.apply(&img, &instances, &p, &mut ChaCha8Rng::seed_from_u64(8));
        let b = engine.apply(&img, &instances, &p, &mut ChaCha8Rng::seed_from_u64(8));
        match (a, b) {
            (Ok(a), Ok(b)) => {
                assert_eq!(a.image, b.image);
                assert_eq!(a.instances, b.instances);
            }
            (Err(a), Err(b)) => assert_eq!(a.to_string(), b.to_string()),
            _ => unreachable!("seeded runs diverged"),
        }
    }
}
