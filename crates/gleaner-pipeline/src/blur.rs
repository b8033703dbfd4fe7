//! Gaussian and motion blur for the photometric stage.
//!
//! [`gaussian_blur_rgb`] splits an RGB image into three gray channels,
//! runs [`imageproc::filter::gaussian_blur_f32`] on each and reassembles
//! them. Gaussian blur is linear and per-channel, so this equals blurring
//! in color space.
//!
//! [`motion_blur_rgb`] convolves with a normalized line kernel through
//! [`imageproc::filter::filter_clamped`].

use image::{GrayImage, Luma, Rgb};
use imageproc::filter::filter_clamped;
use imageproc::kernel::Kernel;

use crate::types::RgbImage;

/// Blur an RGB image with the given sigma in pixels.
///
/// Non-positive or non-finite sigma returns the image unchanged, since
/// `imageproc` panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur_rgb(image: &RgbImage, sigma: f32) -> RgbImage {
    if !(sigma.is_finite() && sigma > 0.0) {
        return image.clone();
    }

    let (w, h) = image.dimensions();
    let channels: [GrayImage; 3] = std::array::from_fn(|c| {
        GrayImage::from_fn(w, h, |x, y| Luma([image.get_pixel(x, y).0[c]]))
    });
    let blurred: [GrayImage; 3] =
        std::array::from_fn(|c| imageproc::filter::gaussian_blur_f32(&channels[c], sigma));

    RgbImage::from_fn(w, h, |x, y| {
        Rgb([
            blurred[0].get_pixel(x, y).0[0],
            blurred[1].get_pixel(x, y).0[0],
            blurred[2].get_pixel(x, y).0[0],
        ])
    })
}

/// Line kernel of side `size` through the center at `angle` radians,
/// normalized to sum to one. `size` must be odd.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn line_kernel(size: u32, angle: f64) -> Vec<f32> {
    let side = size as usize;
    let mut data = vec![0.0f32; side * side];
    let center = f64::from(size / 2);
    let (sin, cos) = angle.sin_cos();
    let steps = size * 4;
    for i in 0..=steps {
        let t = f64::from(i) / f64::from(steps) * 2.0 - 1.0;
        let x = t.mul_add(center * cos, center).round().clamp(0.0, center * 2.0) as usize;
        let y = t.mul_add(center * sin, center).round().clamp(0.0, center * 2.0) as usize;
        data[y * side + x] = 1.0;
    }
    let total: f32 = data.iter().sum();
    for v in &mut data {
        *v /= total;
    }
    data
}

/// Smear an RGB image along a line of `size` pixels at `angle` radians.
///
/// Even sizes are rounded up to the next odd size; sizes below 3 return
/// the image unchanged.
#[must_use = "returns the blurred image"]
pub fn motion_blur_rgb(image: &RgbImage, size: u32, angle: f64) -> RgbImage {
    if size < 3 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let size = size | 1;
    let data = line_kernel(size, angle);
    filter_clamped(image, Kernel::new(&data, size, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_color_image() -> RgbImage {
        // Left half red, right half blue, boundary at x=5.
        RgbImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        })
    }

    #[test]
    fn non_positive_sigma_returns_identical_image() {
        let img = split_color_image();
        assert_eq!(gaussian_blur_rgb(&img, 0.0), img);
        assert_eq!(gaussian_blur_rgb(&img, -1.0), img);
        assert_eq!(gaussian_blur_rgb(&img, f32::NAN), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = RgbImage::new(17, 31);
        let blurred = gaussian_blur_rgb(&img, 1.4);
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn blur_smooths_sharp_color_edge() {
        let blurred = gaussian_blur_rgb(&split_color_image(), 2.0);
        let left = blurred.get_pixel(4, 5).0[0];
        let right = blurred.get_pixel(5, 5).0[0];
        assert!(left < 255, "expected red to drop near the edge, got {left}");
        assert!(right > 0, "expected red to rise near the edge, got {right}");
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = RgbImage::from_fn(10, 10, |_, _| Rgb([100, 150, 200]));
        let blurred = gaussian_blur_rgb(&img, 1.4);
        for pixel in blurred.pixels() {
            for (c, expected) in [100i16, 150, 200].into_iter().enumerate() {
                let diff = i16::from(pixel.0[c]) - expected;
                assert!(diff.abs() <= 1, "channel {c}: got {}", pixel.0[c]);
            }
        }
    }

    #[test]
    fn line_kernel_is_normalized_and_follows_the_angle() {
        let horizontal = line_kernel(5, 0.0);
        let sum: f32 = horizontal.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        // Only the middle row is populated.
        for (i, v) in horizontal.iter().enumerate() {
            assert_eq!(*v > 0.0, i / 5 == 2, "cell {i}");
        }

        let vertical = line_kernel(5, std::f64::consts::FRAC_PI_2);
        for (i, v) in vertical.iter().enumerate() {
            assert_eq!(*v > 0.0, i % 5 == 2, "cell {i}");
        }
    }

    #[test]
    fn motion_blur_smears_across_a_vertical_edge() {
        let blurred = motion_blur_rgb(&split_color_image(), 5, 0.0);
        assert_eq!(blurred.dimensions(), (10, 10));
        assert!(blurred.get_pixel(4, 5).0[0] < 255);
        assert!(blurred.get_pixel(5, 5).0[0] > 0);
        // Far from the edge only float truncation shows.
        assert!(blurred.get_pixel(0, 5).0[0] >= 254);
        assert_eq!(blurred.get_pixel(0, 5).0[2], 0);
    }

    #[test]
    fn motion_blur_along_the_edge_keeps_it_sharp() {
        let blurred = motion_blur_rgb(&split_color_image(), 5, std::f64::consts::FRAC_PI_2);
        assert!(blurred.get_pixel(4, 5).0[0] >= 254);
        assert_eq!(blurred.get_pixel(5, 5).0[0], 0);
    }

    #[test]
    fn tiny_motion_kernel_is_identity() {
        let img = split_color_image();
        assert_eq!(motion_blur_rgb(&img, 1, 0.3), img);
    }
}
