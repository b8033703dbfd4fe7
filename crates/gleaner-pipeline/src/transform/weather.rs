//! Weather overlays: fog, rain, sun flare, cast shadows and mud spatter.

use image::{GrayImage, Luma, Rgb};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use rand::Rng;

use super::photometric::{apply_lut, to_u8};
use crate::config::{FlareOp, RainOp, ShadowOp, SpatterOp};
use crate::geometry::Point;
use crate::types::RgbImage;

/// Color haze is blended toward.
const FOG_LEVEL: f64 = 230.0;

/// Rain streak color.
const RAIN_COLOR: Rgb<u8> = Rgb([200, 200, 200]);

/// Color of soil splashes.
const MUD_COLOR: [f64; 3] = [94.0, 72.0, 48.0];

/// Blend every pixel toward a light gray by `coef`.
pub fn fog(image: &mut RgbImage, coef: f64) {
    let coef = coef.clamp(0.0, 1.0);
    apply_lut(image, |v| (FOG_LEVEL - v).mul_add(coef, v));
}

/// Dim the image and draw slanted streaks.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn rain<R: Rng + ?Sized>(image: &mut RgbImage, op: &RainOp, rng: &mut R) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let brightness = op.brightness;
    apply_lut(image, |v| v * brightness);

    let (wf, hf) = (f64::from(w), f64::from(h));
    let slant = op.slant.sample(rng).to_radians();
    let length = (op.drop_length * hf).max(1.0);
    let (dx, dy) = (length * slant.sin(), length * slant.cos());
    let drops = (op.density * wf * hf / 10_000.0).round() as usize;
    for _ in 0..drops {
        let x = rng.gen_range(0.0..wf);
        let y = rng.gen_range(0.0..hf);
        draw_line_segment_mut(
            image,
            (x as f32, y as f32),
            ((x + dx) as f32, (y + dy) as f32),
            RAIN_COLOR,
        );
    }
}

/// Add a bright radial disc centered in the upper half of the frame.
pub fn sun_flare<R: Rng + ?Sized>(image: &mut RgbImage, op: &FlareOp, rng: &mut R) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let (wf, hf) = (f64::from(w), f64::from(h));
    let center = Point::new(rng.gen_range(0.0..wf), rng.gen_range(0.0..hf * 0.5));
    let radius = (op.radius.sample(rng) * wf).max(1.0);
    let intensity = op.intensity.sample(rng) * 255.0;

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let dx = f64::from(x) + 0.5 - center.x;
        let dy = f64::from(y) + 0.5 - center.y;
        let d = dx.hypot(dy);
        if d >= radius {
            continue;
        }
        let falloff = 1.0 - d / radius;
        let add = intensity * falloff * falloff;
        pixel.0 = pixel.0.map(|c| to_u8(f64::from(c) + add));
    }
}

/// Splash round mud spots over the frame.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
pub fn spatter<R: Rng + ?Sized>(image: &mut RgbImage, op: &SpatterOp, rng: &mut R) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let short = f64::from(w.min(h));
    let mut mask = GrayImage::new(w, h);
    for _ in 0..op.spots.sample(rng) {
        let center = (rng.gen_range(0..w) as i32, rng.gen_range(0..h) as i32);
        let radius = (op.radius.sample(rng) * short).round().max(1.0) as i32;
        draw_filled_circle_mut(&mut mask, center, radius, Luma([255]));
    }

    let opacity = op.opacity.sample(rng).clamp(0.0, 1.0);
    for (pixel, covered) in image.pixels_mut().zip(mask.pixels()) {
        if covered.0[0] == 0 {
            continue;
        }
        let old = pixel.0.map(f64::from);
        pixel.0 = std::array::from_fn(|c| to_u8((MUD_COLOR[c] - old[c]).mul_add(opacity, old[c])));
    }
}

/// Darken random quadrilaterals in the lower half of the frame.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn shadow<R: Rng + ?Sized>(image: &mut RgbImage, op: &ShadowOp, rng: &mut R) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let (wf, hf) = (f64::from(w), f64::from(h));
    for _ in 0..op.count.sample(rng) {
        let quad: Vec<Point> = (0..4)
            .map(|_| Point::new(rng.gen_range(0.0..=wf), rng.gen_range(hf * 0.5..=hf)))
            .collect();
        let quad = sort_around_centroid(quad);
        let factor = op.darkness.sample(rng);

        let (x0, y0, x1, y1) = crate::geometry::bounds(&quad);
        let (x0, x1) = (x0.floor().max(0.0) as u32, (x1.ceil() as u32).min(w));
        let (y0, y1) = (y0.floor().max(0.0) as u32, (y1.ceil() as u32).min(h));
        for y in y0..y1 {
            for x in x0..x1 {
                let center = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
                if contains(&quad, center) {
                    let pixel = image.get_pixel_mut(x, y);
                    pixel.0 = pixel.0.map(|c| to_u8(f64::from(c) * factor));
                }
            }
        }
    }
}

/// Order points by angle around their centroid so the quad is simple.
fn sort_around_centroid(mut points: Vec<Point>) -> Vec<Point> {
    #[allow(clippy::cast_precision_loss)]
    let n = points.len().max(1) as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    points.sort_by(|a, b| {
        let ta = (a.y - cy).atan2(a.x - cx);
        let tb = (b.y - cy).atan2(b.x - cx);
        ta.total_cmp(&tb)
    });
    points
}

/// Even-odd point-in-polygon test.
fn contains(polygon: &[Point], p: Point) -> bool {
    let mut inside = false;
    let mut j = polygon.len().wrapping_sub(1);
    for (i, a) in polygon.iter().enumerate() {
        let b = polygon[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::config::{CountRange, ParamRange};

    fn gray(level: u8) -> RgbImage {
        RgbImage::from_fn(40, 30, |_, _| Rgb([level; 3]))
    }

    #[test]
    fn fog_moves_toward_light_gray() {
        let mut img = gray(0);
        fog(&mut img, 0.5);
        assert_eq!(img.get_pixel(0, 0).0, [115; 3]);
    }

    #[test]
    fn rain_dims_and_streaks() {
        let mut img = gray(100);
        let op = RainOp {
            p: 1.0,
            slant: ParamRange::new(-10.0, 10.0),
            drop_length: 0.2,
            density: 50.0,
            brightness: 0.5,
        };
        rain(&mut img, &op, &mut ChaCha8Rng::seed_from_u64(1));
        assert!(img.pixels().any(|p| p.0 == [50; 3]));
        assert!(img.pixels().any(|p| p.0 == RAIN_COLOR.0));
    }

    #[test]
    fn flare_only_brightens() {
        let mut img = gray(80);
        let op = FlareOp {
            p: 1.0,
            radius: ParamRange::new(0.3, 0.3),
            intensity: ParamRange::new(0.5, 0.5),
        };
        sun_flare(&mut img, &op, &mut ChaCha8Rng::seed_from_u64(2));
        assert!(img.pixels().all(|p| p.0[0] >= 80));
        assert!(img.pixels().any(|p| p.0[0] > 80));
    }

    #[test]
    fn shadow_only_darkens_lower_half() {
        let mut img = gray(200);
        let op = ShadowOp {
            p: 1.0,
            count: CountRange(2, 2),
            darkness: ParamRange::new(0.5, 0.5),
        };
        shadow(&mut img, &op, &mut ChaCha8Rng::seed_from_u64(3));
        for (_, y, p) in img.enumerate_pixels() {
            assert!(p.0[0] <= 200);
            if y < 15 {
                assert_eq!(p.0[0], 200, "upper half must be untouched");
            }
        }
    }

    #[test]
    fn point_in_polygon() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(contains(&square, Point::new(5.0, 5.0)));
        assert!(!contains(&square, Point::new(15.0, 5.0)));
    }

    #[test]
    fn spatter_paints_mud_and_leaves_the_rest() {
        let mut img = gray(200);
        let op = SpatterOp {
            p: 1.0,
            spots: CountRange(3, 3),
            radius: ParamRange::new(0.1, 0.1),
            opacity: ParamRange::fixed(1.0),
        };
        spatter(&mut img, &op, &mut ChaCha8Rng::seed_from_u64(9));
        let mud = img.pixels().filter(|p| p.0 == [94, 72, 48]).count();
        let clean = img.pixels().filter(|p| p.0 == [200; 3]).count();
        assert!(mud > 0);
        assert!(clean > 0);
        assert_eq!(mud + clean, img.pixels().count());
    }
}
