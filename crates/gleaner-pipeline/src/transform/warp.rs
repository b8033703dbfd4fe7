//! Geometric stage: one composed homography plus optional non-linear
//! lens and elastic distortion.
//!
//! All coordinates are continuous pixel coordinates: `(0, 0)` is the
//! top-left corner of the frame and `(W, H)` the bottom-right, so pixel
//! `(i, j)` covers `[i, i+1) x [j, j+1)` and its center is
//! `(i + 0.5, j + 0.5)`.
//!
//! The non-linear stages are defined by their backward (output to
//! source) mapping, which is what pixel warping needs. Forward mapping
//! of annotation points inverts them by fixed-point iteration.

use std::f64::consts::PI;

use image::Rgb;
use imageproc::geometric_transformations::{Interpolation, warp_with};
use rand::Rng;

use super::fires;
use crate::config::GeometricOps;
use crate::geometry::Point;
use crate::types::{DatasetError, Dimensions, RgbImage};

/// Determinants below this are treated as singular.
const SINGULAR_EPSILON: f64 = 1e-12;

/// Fixed-point iterations when inverting a non-linear stage.
const FORWARD_ITERATIONS: usize = 30;

/// Convergence threshold for the fixed-point iteration, in pixels.
const FORWARD_TOLERANCE: f64 = 1e-7;

/// Number of sinusoids summed into the elastic displacement field.
const ELASTIC_WAVES: usize = 3;

/// Upper bound on the elastic field's Lipschitz constant. Keeping it
/// below 1 makes the backward map invertible and the iteration converge.
const ELASTIC_MAX_SLOPE: f64 = 0.5;

/// Keeps clamped sample positions strictly left of / above the last
/// pixel center so bilinear lookups always have a right/bottom neighbor.
const EDGE_INSET: f64 = 1e-4;

/// Smallest allowed radial scale factor in the lens model.
const OPTICAL_MIN_FACTOR: f64 = 0.1;

fn failed(msg: impl Into<String>) -> DatasetError {
    DatasetError::TransformAttemptFailed(msg.into())
}

/// A 3x3 projective transform acting on column vectors `(x, y, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: [[f64; 3]; 3],
}

impl Homography {
    /// The identity transform.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Build from a row-major matrix.
    #[must_use]
    pub const fn from_rows(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    /// Translation by `(tx, ty)`.
    #[must_use]
    pub const fn translate(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]],
        }
    }

    /// Axis-aligned scale.
    #[must_use]
    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self {
            m: [[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Rotation by `radians`. Positive is clockwise on screen (y down).
    #[must_use]
    pub fn rotate(radians: f64) -> Self {
        let (s, c) = radians.sin_cos();
        Self {
            m: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Horizontal shear: `x' = x + tan(radians) * y`.
    #[must_use]
    pub fn shear_x(radians: f64) -> Self {
        Self {
            m: [[1.0, radians.tan(), 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Matrix product `self * other`: applies `other` first, then `self`.
    #[must_use]
    pub fn matmul(&self, other: &Self) -> Self {
        let mut m = [[0.0; 3]; 3];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[i][k] * other.m[k][j]).sum();
            }
        }
        Self { m }
    }

    /// `next` applied after `self`.
    #[must_use]
    pub fn then(&self, next: &Self) -> Self {
        next.matmul(self)
    }

    /// Map a point. `None` when it lands at infinity.
    #[must_use]
    pub fn apply(&self, p: Point) -> Option<Point> {
        let m = &self.m;
        let w = m[2][0].mul_add(p.x, m[2][1] * p.y) + m[2][2];
        if w.abs() < SINGULAR_EPSILON {
            return None;
        }
        let x = (m[0][0].mul_add(p.x, m[0][1] * p.y) + m[0][2]) / w;
        let y = (m[1][0].mul_add(p.x, m[1][1] * p.y) + m[1][2]) / w;
        (x.is_finite() && y.is_finite()).then_some(Point::new(x, y))
    }

    /// Inverse transform, or `None` when singular.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.m;
        let cof = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0].mul_add(m[r1][c1], -(m[r0][c1] * m[r1][c0]))
        };
        let adj = [
            [cof(1, 2, 1, 2), -cof(0, 2, 1, 2), cof(0, 1, 1, 2)],
            [-cof(1, 2, 0, 2), cof(0, 2, 0, 2), -cof(0, 1, 0, 2)],
            [cof(1, 2, 0, 1), -cof(0, 2, 0, 1), cof(0, 1, 0, 1)],
        ];
        let det = m[0][0] * adj[0][0] + m[0][1] * adj[1][0] + m[0][2] * adj[2][0];
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return None;
        }
        let inv = adj.map(|row| row.map(|v| v / det));
        inv.iter().flatten().all(|v| v.is_finite()).then_some(Self { m: inv })
    }

    /// The homography mapping each `src[i]` onto `dst[i]`.
    ///
    /// Solves the standard 8-unknown linear system with `h33 = 1`.
    /// Returns `None` for degenerate quads.
    #[must_use]
    pub fn from_quad(src: [Point; 4], dst: [Point; 4]) -> Option<Self> {
        let mut a = [[0.0_f64; 9]; 8];
        for (i, (s, d)) in src.iter().zip(&dst).enumerate() {
            a[2 * i] = [s.x, s.y, 1.0, 0.0, 0.0, 0.0, -d.x * s.x, -d.x * s.y, d.x];
            a[2 * i + 1] = [0.0, 0.0, 0.0, s.x, s.y, 1.0, -d.y * s.x, -d.y * s.y, d.y];
        }
        let h = solve_augmented(&mut a)?;
        Some(Self {
            m: [[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], 1.0]],
        })
    }

    /// Whether this is exactly the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

/// Gaussian elimination with partial pivoting on an 8x9 augmented matrix.
fn solve_augmented(a: &mut [[f64; 9]; 8]) -> Option<[f64; 8]> {
    const N: usize = 8;
    for col in 0..N {
        let pivot = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < SINGULAR_EPSILON {
            return None;
        }
        a.swap(col, pivot);
        for row in (col + 1)..N {
            let factor = a[row][col] / a[col][col];
            for k in col..=N {
                a[row][k] -= factor * a[col][k];
            }
        }
    }
    let mut x = [0.0; N];
    for row in (0..N).rev() {
        let tail: f64 = ((row + 1)..N).map(|k| a[row][k] * x[k]).sum();
        x[row] = (a[row][N] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Radial lens distortion about a (possibly shifted) center.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Optical {
    center: Point,
    k: f64,
    radius_sq: f64,
}

impl Optical {
    fn factor(&self, q: Point) -> f64 {
        let dx = q.x - self.center.x;
        let dy = q.y - self.center.y;
        self.k.mul_add(dx.mul_add(dx, dy * dy) / self.radius_sq, 1.0)
    }

    /// Output point to source point.
    fn backward(&self, q: Point) -> Option<Point> {
        let f = self.factor(q);
        if f < OPTICAL_MIN_FACTOR {
            return None;
        }
        Some(Point::new(
            (q.x - self.center.x).mul_add(f, self.center.x),
            (q.y - self.center.y).mul_add(f, self.center.y),
        ))
    }

    /// Source point to output point.
    fn forward(&self, s: Point) -> Option<Point> {
        fixed_point(s, |q| {
            let f = self.factor(q);
            if f < OPTICAL_MIN_FACTOR {
                return None;
            }
            Some(Point::new(
                self.center.x + (s.x - self.center.x) / f,
                self.center.y + (s.y - self.center.y) / f,
            ))
        })
    }
}

/// One sinusoid of the elastic field.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Wave {
    /// Displacement amplitude vector, in pixels.
    amp: Point,
    /// Wave vector, radians per pixel.
    k: Point,
    phase: f64,
}

/// Smooth displacement field `d(q) = Σ amp * sin(k·q + phase)`.
#[derive(Debug, Clone, PartialEq)]
struct Elastic {
    waves: Vec<Wave>,
}

impl Elastic {
    fn displacement(&self, q: Point) -> Point {
        self.waves.iter().fold(Point::new(0.0, 0.0), |acc, w| {
            let s = w.k.x.mul_add(q.x, w.k.y * q.y + w.phase).sin();
            Point::new(w.amp.x.mul_add(s, acc.x), w.amp.y.mul_add(s, acc.y))
        })
    }

    /// Output point to source point.
    fn backward(&self, q: Point) -> Point {
        let d = self.displacement(q);
        Point::new(q.x + d.x, q.y + d.y)
    }

    /// Source point to output point.
    fn forward(&self, s: Point) -> Option<Point> {
        fixed_point(s, |q| {
            let d = self.displacement(q);
            Some(Point::new(s.x - d.x, s.y - d.y))
        })
    }
}

/// Iterate `q = step(q)` from `start` until it settles.
fn fixed_point(start: Point, step: impl Fn(Point) -> Option<Point>) -> Option<Point> {
    let mut q = start;
    for _ in 0..FORWARD_ITERATIONS {
        let next = step(q)?;
        if !(next.x.is_finite() && next.y.is_finite()) {
            return None;
        }
        let moved = (next.x - q.x).abs().max((next.y - q.y).abs());
        q = next;
        if moved < FORWARD_TOLERANCE {
            break;
        }
    }
    Some(q)
}

/// The sampled geometric stage for one augmentation attempt.
///
/// Forward mapping: homography, then elastic, then optical.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometricPlan {
    dims: Dimensions,
    forward: Homography,
    backward: Homography,
    elastic: Option<Elastic>,
    optical: Option<Optical>,
}

impl GeometricPlan {
    /// The plan that leaves the image and its annotations untouched.
    #[must_use]
    pub const fn identity(dims: Dimensions) -> Self {
        Self {
            dims,
            forward: Homography::identity(),
            backward: Homography::identity(),
            elastic: None,
            optical: None,
        }
    }

    /// Build a plan from a homography only.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::TransformAttemptFailed`] if the matrix is
    /// singular.
    pub fn from_homography(dims: Dimensions, forward: Homography) -> Result<Self, DatasetError> {
        let backward = forward
            .inverse()
            .ok_or_else(|| failed("singular geometric transform"))?;
        Ok(Self {
            dims,
            forward,
            backward,
            elastic: None,
            optical: None,
        })
    }

    /// Draw the parameters of every enabled geometric operator.
    ///
    /// Flips, affine and perspective compose into one homography; elastic
    /// and optical distortion are kept as separate non-linear stages.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::TransformAttemptFailed`] when the composed
    /// matrix is singular or not finite.
    pub fn sample<R: Rng + ?Sized>(
        ops: &GeometricOps,
        dims: Dimensions,
        rng: &mut R,
    ) -> Result<Self, DatasetError> {
        let (w, h) = (dims.w(), dims.h());
        let (cx, cy) = (w / 2.0, h / 2.0);
        let mut forward = Homography::identity();

        if let Some(flip) = ops.hflip
            && fires(rng, flip.p)
        {
            forward = forward.then(&Homography::from_rows([
                [-1.0, 0.0, w],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ]));
        }
        if let Some(flip) = ops.vflip
            && fires(rng, flip.p)
        {
            forward = forward.then(&Homography::from_rows([
                [1.0, 0.0, 0.0],
                [0.0, -1.0, h],
                [0.0, 0.0, 1.0],
            ]));
        }
        if let Some(affine) = ops.affine
            && fires(rng, affine.p)
        {
            let s = affine.scale.sample(rng);
            let theta = affine.rotate.sample(rng).to_radians();
            let shear = affine.shear.sample(rng).to_radians();
            let tx = affine.translate.sample(rng) * w;
            let ty = affine.translate.sample(rng) * h;
            let about_center = Homography::translate(-cx, -cy)
                .then(&Homography::scale(s, s))
                .then(&Homography::shear_x(shear))
                .then(&Homography::rotate(theta))
                .then(&Homography::translate(cx + tx, cy + ty));
            forward = forward.then(&about_center);
        }
        if let Some(persp) = ops.perspective
            && fires(rng, persp.p)
        {
            let frame = [
                Point::new(0.0, 0.0),
                Point::new(w, 0.0),
                Point::new(w, h),
                Point::new(0.0, h),
            ];
            // Pull each corner inward; the jittered quad is stretched back
            // over the whole frame.
            let inward = [(1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)];
            let mut quad = frame;
            for (corner, (sx, sy)) in quad.iter_mut().zip(inward) {
                corner.x += sx * persp.scale.sample(rng) * w;
                corner.y += sy * persp.scale.sample(rng) * h;
            }
            let warp = Homography::from_quad(quad, frame)
                .ok_or_else(|| failed("degenerate perspective quad"))?;
            forward = forward.then(&warp);
        }

        let elastic = match ops.elastic {
            Some(op) if fires(rng, op.p) => {
                let side = w.min(h);
                let amplitude = op.amplitude.sample(rng) * side;
                let wavelength = (op.wavelength.sample(rng) * side).max(1.0);
                Some(sample_elastic(rng, amplitude, wavelength))
            }
            _ => None,
        };

        let optical = match ops.optical {
            Some(op) if fires(rng, op.p) => Some(Optical {
                center: Point::new(
                    op.shift.sample(rng).mul_add(w, cx),
                    op.shift.sample(rng).mul_add(h, cy),
                ),
                k: op.distort.sample(rng),
                radius_sq: cx.mul_add(cx, cy * cy).max(1.0),
            }),
            _ => None,
        };

        let mut plan = Self::from_homography(dims, forward)?;
        plan.elastic = elastic;
        plan.optical = optical;
        Ok(plan)
    }

    /// Image dimensions the plan was sampled for.
    #[must_use]
    pub const fn dims(&self) -> Dimensions {
        self.dims
    }

    /// Whether any non-linear stage is active (straight edges may bend).
    #[must_use]
    pub const fn is_nonlinear(&self) -> bool {
        self.elastic.is_some() || self.optical.is_some()
    }

    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        !self.is_nonlinear() && self.forward.is_identity()
    }

    /// Map a source pixel-space point to its output position.
    #[must_use]
    pub fn forward(&self, p: Point) -> Option<Point> {
        let mut q = self.forward.apply(p)?;
        if let Some(elastic) = &self.elastic {
            q = elastic.forward(q)?;
        }
        if let Some(optical) = &self.optical {
            q = optical.forward(q)?;
        }
        Some(q)
    }

    /// Map an output pixel-space point back to its source position.
    #[must_use]
    pub fn backward(&self, q: Point) -> Option<Point> {
        let mut s = q;
        if let Some(optical) = &self.optical {
            s = optical.backward(s)?;
        }
        if let Some(elastic) = &self.elastic {
            s = elastic.backward(s);
        }
        self.backward.apply(s)
    }

    /// Resample the image through the plan with bilinear interpolation.
    ///
    /// Output pixels whose source falls outside the frame are black.
    /// Sources inside the frame but beyond the outermost pixel centers
    /// are pulled onto the last interpolable position, so edge rows and
    /// columns replicate instead of going black.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn warp(&self, image: &RgbImage) -> RgbImage {
        const OUTSIDE: (f32, f32) = (-1.0e6, -1.0e6);
        if self.is_identity() {
            return image.clone();
        }
        let max_x = (self.dims.w() - 1.0 - EDGE_INSET).max(0.0);
        let max_y = (self.dims.h() - 1.0 - EDGE_INSET).max(0.0);
        warp_with(
            image,
            |x, y| {
                let center = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
                let Some(s) = self.backward(center) else {
                    return OUTSIDE;
                };
                let inside = (0.0..=self.dims.w()).contains(&s.x)
                    && (0.0..=self.dims.h()).contains(&s.y);
                if !inside {
                    return OUTSIDE;
                }
                (
                    (s.x - 0.5).clamp(0.0, max_x) as f32,
                    (s.y - 0.5).clamp(0.0, max_y) as f32,
                )
            },
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
        )
    }
}

#[allow(clippy::cast_precision_loss)]
fn sample_elastic<R: Rng + ?Sized>(rng: &mut R, amplitude: f64, wavelength: f64) -> Elastic {
    let k_mag = 2.0 * PI / wavelength;
    let per_wave = amplitude / ELASTIC_WAVES as f64;
    // Lipschitz bound of the summed field is Σ |amp| * |k|.
    let slope = per_wave * k_mag * ELASTIC_WAVES as f64;
    let per_wave = if slope > ELASTIC_MAX_SLOPE {
        per_wave * ELASTIC_MAX_SLOPE / slope
    } else {
        per_wave
    };
    let waves = (0..ELASTIC_WAVES)
        .map(|_| {
            let dir = rng.gen_range(0.0..2.0 * PI);
            let push = rng.gen_range(0.0..2.0 * PI);
            Wave {
                amp: Point::new(per_wave * push.cos(), per_wave * push.sin()),
                k: Point::new(k_mag * dir.cos(), k_mag * dir.sin()),
                phase: rng.gen_range(0.0..2.0 * PI),
            }
        })
        .collect();
    Elastic { waves }
}
