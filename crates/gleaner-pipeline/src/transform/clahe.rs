//! Contrast-limited adaptive histogram equalization.
//!
//! The luma plane is cut into a grid of tiles. Each tile gets its own
//! equalization curve built from a clipped histogram, and every pixel
//! interpolates bilinearly between the curves of the four nearest tile
//! centers. The luma change is added back to all three channels so hue
//! is roughly preserved.

use image::imageops;
use imageproc::stats::histogram;

use super::photometric::to_u8;
use crate::types::RgbImage;

/// Equalization curve of one tile.
type Lut = [u8; 256];

/// Build the clipped-histogram equalization curve for a tile.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tile_lut(bins: &[u32; 256], clip_limit: f64) -> Lut {
    let pixels: u32 = bins.iter().sum();
    if pixels == 0 {
        return std::array::from_fn(|i| i as u8);
    }
    let limit = (clip_limit * f64::from(pixels) / 256.0).max(1.0) as u32;

    let mut clipped = *bins;
    let mut excess = 0u32;
    for bin in &mut clipped {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let rest = (excess % 256) as usize;
    for (i, bin) in clipped.iter_mut().enumerate() {
        *bin += share + u32::from(i < rest);
    }

    let scale = 255.0 / f64::from(pixels);
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (out, bin) in lut.iter_mut().zip(clipped) {
        cdf += bin;
        *out = to_u8(f64::from(cdf) * scale);
    }
    lut
}

/// Neighboring tile indices and the weight of the second, for a pixel
/// coordinate along one axis.
fn neighbors(pos: u32, tile: u32, tiles: u32) -> (usize, usize, f64) {
    let f = ((f64::from(pos) + 0.5) / f64::from(tile) - 0.5).clamp(0.0, f64::from(tiles - 1));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = f.floor() as usize;
    let hi = (lo + 1).min(tiles as usize - 1);
    #[allow(clippy::cast_precision_loss)]
    let weight = f - lo as f64;
    (lo, hi, weight)
}

/// Equalize local contrast on a `tiles` x `tiles` grid.
///
/// `clip_limit` caps each histogram bin at that multiple of the mean bin
/// height before equalizing; 1.0 leaves the image nearly unchanged.
pub fn clahe(image: &mut RgbImage, clip_limit: f64, tiles: u32) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let tiles_x = tiles.clamp(1, w);
    let tiles_y = tiles.clamp(1, h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    let luma = imageops::grayscale(image);
    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = (tx * tile_w).min(w - 1);
            let y0 = (ty * tile_h).min(h - 1);
            let crop = imageops::crop_imm(&luma, x0, y0, tile_w, tile_h).to_image();
            luts.push(tile_lut(&histogram(&crop).channels[0], clip_limit));
        }
    }

    let lut_at = |tx: usize, ty: usize| &luts[ty * tiles_x as usize + tx];
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let v = usize::from(luma.get_pixel(x, y).0[0]);
        let (x0, x1, ax) = neighbors(x, tile_w, tiles_x);
        let (y0, y1, ay) = neighbors(y, tile_h, tiles_y);
        let top = f64::from(lut_at(x0, y0)[v])
            .mul_add(1.0 - ax, f64::from(lut_at(x1, y0)[v]) * ax);
        let bottom = f64::from(lut_at(x0, y1)[v])
            .mul_add(1.0 - ax, f64::from(lut_at(x1, y1)[v]) * ax);
        let target = top.mul_add(1.0 - ay, bottom * ay);
        #[allow(clippy::cast_precision_loss)]
        let delta = target - v as f64;
        pixel.0 = pixel.0.map(|c| to_u8(f64::from(c) + delta));
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn luma_range(image: &RgbImage) -> (u8, u8) {
        let luma = imageops::grayscale(image);
        let min = luma.pixels().map(|p| p.0[0]).min().unwrap_or(0);
        let max = luma.pixels().map(|p| p.0[0]).max().unwrap_or(0);
        (min, max)
    }

    #[test]
    fn stretches_a_low_contrast_ramp() {
        let mut img = RgbImage::from_fn(64, 64, |x, _| {
            let level = 100 + u8::try_from(x * 40 / 63).unwrap_or(0);
            Rgb([level; 3])
        });
        let (lo, hi) = luma_range(&img);
        clahe(&mut img, 4.0, 2);
        let (new_lo, new_hi) = luma_range(&img);
        assert!(
            new_hi - new_lo > hi - lo + 20,
            "range {lo}..{hi} became {new_lo}..{new_hi}"
        );
        assert_eq!(img.dimensions(), (64, 64));
    }

    #[test]
    fn clip_limit_bounds_the_tile_curve() {
        // A single spike holding every pixel.
        let mut bins = [0u32; 256];
        bins[128] = 1024;
        let unclipped = tile_lut(&bins, 256.0);
        assert_eq!(unclipped[127], 0);
        assert_eq!(unclipped[128], 255);

        // Clipped at the mean, the curve is close to the identity.
        let clipped = tile_lut(&bins, 1.0);
        for (level, out) in clipped.iter().enumerate() {
            let diff = i32::from(*out) - i32::try_from(level).unwrap_or(0);
            assert!(diff.abs() <= 2, "level {level} -> {out}");
        }
    }

    #[test]
    fn more_tiles_than_pixels_is_fine() {
        let mut img = RgbImage::from_fn(3, 2, |x, y| Rgb([u8::try_from(x * 50 + y).unwrap_or(0); 3]));
        clahe(&mut img, 2.0, 64);
        assert_eq!(img.dimensions(), (3, 2));
    }
}
