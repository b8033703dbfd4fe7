//! Annotation geometry: axis-aligned boxes and polygons in normalized
//! image coordinates.
//!
//! Coordinates are fractions of the image width/height, so `(0, 0)` is
//! the top-left corner and `(1, 1)` the bottom-right. The box/polygon
//! decision is made once at parse time and carried as the
//! [`Geometry`] discriminant from then on.

use serde::{Deserialize, Serialize};

/// A 2D point. Normalized or pixel coordinates depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both coordinates lie in `[0, 1]`.
    #[must_use]
    pub fn is_normalized(self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }

    /// Clamp both coordinates into `[0, 1]`.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
        }
    }
}

/// Axis-aligned box in center/size form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxGeometry {
    /// Center x.
    pub cx: f64,
    /// Center y.
    pub cy: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl BoxGeometry {
    /// Create a box from center and size.
    #[must_use]
    pub const fn new(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self { cx, cy, w, h }
    }

    /// Create a box from its min/max corners.
    #[must_use]
    pub fn from_corners(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            cx: (x_min + x_max) / 2.0,
            cy: (y_min + y_max) / 2.0,
            w: x_max - x_min,
            h: y_max - y_min,
        }
    }

    /// Min/max corners as `(x_min, y_min, x_max, y_max)`.
    #[must_use]
    pub fn corners(self) -> (f64, f64, f64, f64) {
        let half_w = self.w / 2.0;
        let half_h = self.h / 2.0;
        (
            self.cx - half_w,
            self.cy - half_h,
            self.cx + half_w,
            self.cy + half_h,
        )
    }

    /// The four corners in fixed winding order: top-left, top-right,
    /// bottom-right, bottom-left.
    #[must_use]
    pub fn to_polygon(self) -> Vec<Point> {
        let (x_min, y_min, x_max, y_max) = self.corners();
        vec![
            Point::new(x_min, y_min),
            Point::new(x_max, y_min),
            Point::new(x_max, y_max),
            Point::new(x_min, y_max),
        ]
    }

    /// Clamp the corners into `[0, 1]` and rebuild the box.
    #[must_use]
    pub fn clip(self) -> Self {
        let (x_min, y_min, x_max, y_max) = self.corners();
        Self::from_corners(
            x_min.clamp(0.0, 1.0),
            y_min.clamp(0.0, 1.0),
            x_max.clamp(0.0, 1.0),
            y_max.clamp(0.0, 1.0),
        )
    }

    /// All four values lie in `[0, 1]`.
    #[must_use]
    pub fn values_normalized(self) -> bool {
        [self.cx, self.cy, self.w, self.h]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

/// Tagged annotation geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    /// Axis-aligned box (`class cx cy w h`).
    Box(BoxGeometry),
    /// Polygon with at least three points (`class x1 y1 x2 y2 ...`).
    Polygon(Vec<Point>),
}

impl Geometry {
    /// Convert to polygon form.
    ///
    /// Boxes become their four exact corners (see
    /// [`BoxGeometry::to_polygon`]); polygons are returned unchanged.
    #[must_use]
    pub fn to_polygon(&self) -> Self {
        match self {
            Self::Box(b) => Self::Polygon(b.to_polygon()),
            Self::Polygon(points) => Self::Polygon(points.clone()),
        }
    }

    /// Convert to box form via the axis-aligned bounding rectangle.
    ///
    /// Lossy for non-rectangular polygons.
    #[must_use]
    pub fn to_box(&self) -> Self {
        Self::Box(self.bounding_box())
    }

    /// Axis-aligned bounding rectangle.
    #[must_use]
    pub fn bounding_box(&self) -> BoxGeometry {
        match self {
            Self::Box(b) => *b,
            Self::Polygon(points) => {
                let (x_min, y_min, x_max, y_max) = bounds(points);
                BoxGeometry::from_corners(x_min, y_min, x_max, y_max)
            }
        }
    }

    /// Clamp every coordinate into `[0, 1]`.
    #[must_use]
    pub fn clip(&self) -> Self {
        match self {
            Self::Box(b) => Self::Box(b.clip()),
            Self::Polygon(points) => {
                Self::Polygon(points.iter().map(|p| p.clamped()).collect())
            }
        }
    }

    /// Outline points: box corners or polygon vertices.
    #[must_use]
    pub fn outline(&self) -> Vec<Point> {
        match self {
            Self::Box(b) => b.to_polygon(),
            Self::Polygon(points) => points.clone(),
        }
    }

    /// Whether this is box geometry.
    #[must_use]
    pub const fn is_box(&self) -> bool {
        matches!(self, Self::Box(_))
    }

    /// Every outline coordinate lies in `[0, 1]`.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.outline().iter().all(|p| p.is_normalized())
    }

    /// Flattened on-disk value list (without the class id).
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        match self {
            Self::Box(b) => vec![b.cx, b.cy, b.w, b.h],
            Self::Polygon(points) => points.iter().flat_map(|p| [p.x, p.y]).collect(),
        }
    }
}

/// Min/max over a point set as `(x_min, y_min, x_max, y_max)`.
///
/// Returns all zeros for an empty slice.
#[must_use]
pub fn bounds(points: &[Point]) -> (f64, f64, f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    points.iter().fold(
        (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < TOL
    }

    #[test]
    fn box_to_polygon_winding_order() {
        let b = BoxGeometry::new(0.5, 0.4, 0.2, 0.4);
        let poly = b.to_polygon();
        assert_eq!(poly.len(), 4);
        // top-left, top-right, bottom-right, bottom-left
        assert!(close(poly[0].x, 0.4) && close(poly[0].y, 0.2));
        assert!(close(poly[1].x, 0.6) && close(poly[1].y, 0.2));
        assert!(close(poly[2].x, 0.6) && close(poly[2].y, 0.6));
        assert!(close(poly[3].x, 0.4) && close(poly[3].y, 0.6));
    }

    #[test]
    fn polygon_bounding_box_recovers_original_box() {
        let boxes = [
            BoxGeometry::new(0.5, 0.5, 1.0, 1.0),
            BoxGeometry::new(0.1, 0.9, 0.05, 0.1),
            BoxGeometry::new(0.33, 0.66, 0.2, 0.5),
        ];
        for b in boxes {
            let recovered = Geometry::Box(b).to_polygon().bounding_box();
            assert!(close(recovered.cx, b.cx), "{recovered:?} vs {b:?}");
            assert!(close(recovered.cy, b.cy), "{recovered:?} vs {b:?}");
            assert!(close(recovered.w, b.w), "{recovered:?} vs {b:?}");
            assert!(close(recovered.h, b.h), "{recovered:?} vs {b:?}");
        }
    }

    #[test]
    fn triangle_bounding_box_is_lossy_rectangle() {
        let tri = Geometry::Polygon(vec![
            Point::new(0.2, 0.2),
            Point::new(0.6, 0.2),
            Point::new(0.4, 0.8),
        ]);
        let b = tri.bounding_box();
        assert!(close(b.cx, 0.4));
        assert!(close(b.cy, 0.5));
        assert!(close(b.w, 0.4));
        assert!(close(b.h, 0.6));
    }

    #[test]
    fn clip_box_overhanging_edge() {
        let b = BoxGeometry::new(0.95, 0.5, 0.2, 0.2).clip();
        let (x_min, _, x_max, _) = b.corners();
        assert!(close(x_min, 0.85));
        assert!(close(x_max, 1.0));
    }

    #[test]
    fn clip_polygon_clamps_each_point() {
        let poly = Geometry::Polygon(vec![
            Point::new(-0.1, 0.5),
            Point::new(1.2, 0.5),
            Point::new(0.5, 1.5),
        ])
        .clip();
        assert!(poly.is_normalized());
        assert_eq!(
            poly.outline(),
            vec![
                Point::new(0.0, 0.5),
                Point::new(1.0, 0.5),
                Point::new(0.5, 1.0)
            ]
        );
    }

    #[test]
    fn values_flatten_in_file_order() {
        let poly = Geometry::Polygon(vec![
            Point::new(0.1, 0.2),
            Point::new(0.3, 0.4),
            Point::new(0.5, 0.6),
        ]);
        assert_eq!(poly.values(), vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn bounds_of_empty_slice_is_zero() {
        assert_eq!(bounds(&[]), (0.0, 0.0, 0.0, 0.0));
    }
}
