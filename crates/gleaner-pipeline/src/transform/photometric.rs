//! Photometric stage: color, tone, local contrast, blur, noise and occlusion.
//!
//! Runs after the geometric stage and never touches annotations.
//! Operators fire independently with their own probability, in the
//! order of the fields of [`PhotometricOps`].

use image::imageops;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::{clahe, fires, weather};
use crate::blur::{gaussian_blur_rgb, motion_blur_rgb};
use crate::config::{DropoutOp, PhotometricOps};
use crate::types::RgbImage;

/// Mid-gray pivot for contrast changes.
const CONTRAST_PIVOT: f64 = 127.5;

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(super) fn to_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Apply a per-level mapping to every channel through a lookup table.
pub(super) fn apply_lut(image: &mut RgbImage, f: impl Fn(f64) -> f64) {
    let lut: [u8; 256] = std::array::from_fn(|i| {
        #[allow(clippy::cast_precision_loss)]
        let level = i as f64;
        to_u8(f(level))
    });
    for channel in image.iter_mut() {
        *channel = lut[usize::from(*channel)];
    }
}

/// Run every enabled photometric operator.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn apply<R: Rng + ?Sized>(image: RgbImage, ops: &PhotometricOps, rng: &mut R) -> RgbImage {
    let mut img = image;

    if let Some(op) = ops.brightness
        && fires(rng, op.p)
    {
        let shift = (op.range.sample(rng) * 255.0).round() as i32;
        img = imageops::brighten(&img, shift);
    }
    if let Some(op) = ops.contrast
        && fires(rng, op.p)
    {
        let gain = 1.0 + op.range.sample(rng);
        apply_lut(&mut img, |v| (v - CONTRAST_PIVOT).mul_add(gain, CONTRAST_PIVOT));
    }
    if let Some(op) = ops.hue
        && fires(rng, op.p)
    {
        let degrees = op.range.sample(rng).round() as i32;
        img = imageops::huerotate(&img, degrees);
    }
    if let Some(op) = ops.saturation
        && fires(rng, op.p)
    {
        saturate(&mut img, 1.0 + op.range.sample(rng));
    }
    if let Some(op) = ops.gamma
        && fires(rng, op.p)
    {
        let gamma = op.range.sample(rng);
        apply_lut(&mut img, |v| 255.0 * (v / 255.0).powf(gamma));
    }
    if let Some(op) = ops.clahe
        && fires(rng, op.p)
    {
        clahe::clahe(&mut img, op.clip_limit.sample(rng), op.tiles);
    }
    if let Some(op) = ops.blur
        && fires(rng, op.p)
    {
        img = gaussian_blur_rgb(&img, op.range.sample(rng) as f32);
    }
    if let Some(op) = ops.motion_blur
        && fires(rng, op.p)
    {
        let angle = rng.gen_range(0.0..std::f64::consts::PI);
        img = motion_blur_rgb(&img, op.kernel.sample(rng), angle);
    }
    if let Some(op) = ops.noise
        && fires(rng, op.p)
    {
        add_noise(&mut img, op.range.sample(rng).sqrt(), rng);
    }
    if let Some(op) = ops.dropout
        && fires(rng, op.p)
    {
        coarse_dropout(&mut img, &op, rng);
    }
    if let Some(op) = ops.spatter
        && fires(rng, op.p)
    {
        weather::spatter(&mut img, &op, rng);
    }
    if let Some(op) = ops.fog
        && fires(rng, op.p)
    {
        weather::fog(&mut img, op.coef.sample(rng));
    }
    if let Some(op) = ops.rain
        && fires(rng, op.p)
    {
        weather::rain(&mut img, &op, rng);
    }
    if let Some(op) = ops.sun_flare
        && fires(rng, op.p)
    {
        weather::sun_flare(&mut img, &op, rng);
    }
    if let Some(op) = ops.shadow
        && fires(rng, op.p)
    {
        weather::shadow(&mut img, &op, rng);
    }

    img
}

/// Scale each pixel's distance from its luma by `gain`.
fn saturate(image: &mut RgbImage, gain: f64) {
    for pixel in image.pixels_mut() {
        let [r, g, b] = pixel.0.map(f64::from);
        let luma = 0.299f64.mul_add(r, 0.587f64.mul_add(g, 0.114 * b));
        pixel.0 = [r, g, b].map(|c| to_u8((c - luma).mul_add(gain, luma)));
    }
}

/// Add zero-mean Gaussian noise with standard deviation `sigma` to
/// every channel.
fn add_noise<R: Rng + ?Sized>(image: &mut RgbImage, sigma: f64, rng: &mut R) {
    let Ok(normal) = Normal::new(0.0, sigma) else {
        return;
    };
    for channel in image.iter_mut() {
        *channel = to_u8(f64::from(*channel) + normal.sample(rng));
    }
}

/// Fill random rectangles with a constant gray level.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn coarse_dropout<R: Rng + ?Sized>(image: &mut RgbImage, op: &DropoutOp, rng: &mut R) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    for _ in 0..op.holes.sample(rng) {
        let hole_w = ((op.size.sample(rng) * f64::from(w)).round() as u32).clamp(1, w);
        let hole_h = ((op.size.sample(rng) * f64::from(h)).round() as u32).clamp(1, h);
        let x0 = rng.gen_range(0..=w - hole_w);
        let y0 = rng.gen_range(0..=h - hole_h);
        for y in y0..y0 + hole_h {
            for x in x0..x0 + hole_w {
                image.put_pixel(x, y, image::Rgb([op.fill; 3]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::config::{ClaheOp, CountRange, MotionBlurOp, ParamRange, RangeOp, SpatterOp};

    fn gray(level: u8) -> RgbImage {
        RgbImage::from_fn(16, 12, |_, _| Rgb([level; 3]))
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(5)
    }

    #[test]
    fn no_ops_is_identity() {
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([u8::try_from(x * 30).unwrap_or(0), u8::try_from(y).unwrap_or(0), 7]));
        let out = apply(img.clone(), &PhotometricOps::default(), &mut rng());
        assert_eq!(out, img);
    }

    #[test]
    fn brightness_shifts_levels() {
        let ops = PhotometricOps {
            brightness: Some(RangeOp::new(1.0, 0.2, 0.2)),
            ..PhotometricOps::default()
        };
        let out = apply(gray(100), &ops, &mut rng());
        assert_eq!(out.get_pixel(3, 3).0, [151; 3]);
    }

    #[test]
    fn contrast_pivots_on_mid_gray() {
        let ops = PhotometricOps {
            contrast: Some(RangeOp::new(1.0, 1.0, 1.0)),
            ..PhotometricOps::default()
        };
        let dark = apply(gray(100), &ops, &mut rng());
        let light = apply(gray(200), &ops, &mut rng());
        assert!(dark.get_pixel(0, 0).0[0] < 100);
        assert!(light.get_pixel(0, 0).0[0] > 200);
    }

    #[test]
    fn gamma_above_one_darkens() {
        let ops = PhotometricOps {
            gamma: Some(RangeOp::new(1.0, 2.0, 2.0)),
            ..PhotometricOps::default()
        };
        let out = apply(gray(128), &ops, &mut rng());
        assert_eq!(out.get_pixel(0, 0).0[0], 64);
    }

    #[test]
    fn zero_saturation_gives_gray() {
        let img = RgbImage::from_fn(4, 4, |_, _| Rgb([200, 40, 90]));
        let ops = PhotometricOps {
            saturation: Some(RangeOp::new(1.0, -1.0, -1.0)),
            ..PhotometricOps::default()
        };
        let out = apply(img, &ops, &mut rng());
        let [r, g, b] = out.get_pixel(1, 1).0;
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn noise_changes_pixels_but_keeps_size() {
        let ops = PhotometricOps {
            noise: Some(RangeOp::new(1.0, 30.0, 30.0)),
            ..PhotometricOps::default()
        };
        let out = apply(gray(128), &ops, &mut rng());
        assert_eq!(out.dimensions(), (16, 12));
        assert!(out.pixels().any(|p| p.0 != [128; 3]));
    }

    #[test]
    fn dropout_paints_fill_color() {
        let ops = PhotometricOps {
            dropout: Some(DropoutOp {
                p: 1.0,
                holes: CountRange(2, 2),
                size: ParamRange::new(0.25, 0.25),
                fill: 0,
            }),
            ..PhotometricOps::default()
        };
        let out = apply(gray(255), &ops, &mut rng());
        let black = out.pixels().filter(|p| p.0 == [0; 3]).count();
        // Each hole is 4x3; two holes may overlap.
        assert!((12..=24).contains(&black), "{black}");
    }

    #[test]
    fn clahe_spreads_a_dim_ramp() {
        let img = RgbImage::from_fn(32, 32, |x, _| Rgb([60 + u8::try_from(x).unwrap_or(0); 3]));
        let ops = PhotometricOps {
            clahe: Some(ClaheOp {
                p: 1.0,
                clip_limit: ParamRange::fixed(3.0),
                tiles: 2,
            }),
            ..PhotometricOps::default()
        };
        let out = apply(img, &ops, &mut rng());
        let first = out.get_pixel(0, 16).0[0];
        let last = out.get_pixel(31, 16).0[0];
        assert!(last - first > 31, "{first}..{last}");
    }

    #[test]
    fn motion_blur_keeps_flat_images_flat() {
        let ops = PhotometricOps {
            motion_blur: Some(MotionBlurOp {
                p: 1.0,
                kernel: CountRange(3, 7),
            }),
            ..PhotometricOps::default()
        };
        let out = apply(gray(120), &ops, &mut rng());
        assert!(out.pixels().all(|p| p.0.iter().all(|&c| (119..=120).contains(&c))));
    }

    #[test]
    fn spatter_only_darkens_a_white_frame() {
        let ops = PhotometricOps {
            spatter: Some(SpatterOp {
                p: 1.0,
                spots: CountRange(2, 4),
                radius: ParamRange::new(0.1, 0.2),
                opacity: ParamRange::new(0.5, 0.9),
            }),
            ..PhotometricOps::default()
        };
        let out = apply(gray(255), &ops, &mut rng());
        assert!(out.pixels().any(|p| p.0 != [255; 3]));
        assert!(out.pixels().all(|p| p.0[0] >= p.0[1] && p.0[1] >= p.0[2]));
    }

    #[test]
    fn same_seed_same_output() {
        let ops = crate::config::TransformProfile::field().photometric;
        let img = RgbImage::from_fn(20, 20, |x, y| Rgb([u8::try_from(x * 10).unwrap_or(0), u8::try_from(y * 10).unwrap_or(0), 50]));
        let a = apply(img.clone(), &ops, &mut ChaCha8Rng::seed_from_u64(11));
        let b = apply(img, &ops, &mut ChaCha8Rng::seed_from_u64(11));
        assert_eq!(a, b);
    }
}
