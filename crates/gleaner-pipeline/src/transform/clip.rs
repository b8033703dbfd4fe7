//! Frame clipping and area for transformed outlines.

use geo::{Area, LineString, Polygon};

use crate::geometry::Point;

/// Unsigned area of a closed outline (shoelace, via `geo`).
///
/// Fewer than three points have zero area.
#[must_use]
pub fn outline_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let ring: LineString<f64> = points.iter().map(|p| (p.x, p.y)).collect::<Vec<_>>().into();
    Polygon::new(ring, Vec::new()).unsigned_area()
}

#[derive(Clone, Copy)]
enum Edge {
    Left(f64),
    Right(f64),
    Top(f64),
    Bottom(f64),
}

impl Edge {
    fn inside(self, p: Point) -> bool {
        match self {
            Self::Left(x) => p.x >= x,
            Self::Right(x) => p.x <= x,
            Self::Top(y) => p.y >= y,
            Self::Bottom(y) => p.y <= y,
        }
    }

    fn intersect(self, a: Point, b: Point) -> Point {
        match self {
            Self::Left(x) | Self::Right(x) => {
                let t = (x - a.x) / (b.x - a.x);
                Point::new(x, t.mul_add(b.y - a.y, a.y))
            }
            Self::Top(y) | Self::Bottom(y) => {
                let t = (y - a.y) / (b.y - a.y);
                Point::new(t.mul_add(b.x - a.x, a.x), y)
            }
        }
    }
}

/// Clip a closed outline to the rectangle `[0, width] x [0, height]`
/// (Sutherland-Hodgman).
///
/// Returns the clipped outline, which is empty when nothing remains.
/// Convex inputs give exact results; concave inputs may gain zero-width
/// slivers along the frame edge, which do not change the area.
#[must_use]
pub fn clip_to_frame(points: &[Point], width: f64, height: f64) -> Vec<Point> {
    let edges = [
        Edge::Left(0.0),
        Edge::Right(width),
        Edge::Top(0.0),
        Edge::Bottom(height),
    ];
    let mut output = points.to_vec();
    for edge in edges {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for &cur in &input {
            match (edge.inside(prev), edge.inside(cur)) {
                (true, true) => output.push(cur),
                (true, false) => output.push(edge.intersect(prev, cur)),
                (false, true) => {
                    output.push(edge.intersect(prev, cur));
                    output.push(cur);
                }
                (false, false) => {}
            }
            prev = cur;
        }
    }
    output
}

/// Insert `steps - 1` evenly spaced points along every edge of a closed
/// outline, so that a non-linear mapping bends straight edges.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn densify(points: &[Point], steps: usize) -> Vec<Point> {
    if steps <= 1 || points.len() < 2 {
        return points.to_vec();
    }
    let mut out = Vec::with_capacity(points.len() * steps);
    for (i, &a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        for s in 0..steps {
            let t = s as f64 / steps as f64;
            out.push(Point::new(t.mul_add(b.x - a.x, a.x), t.mul_add(b.y - a.y, a.y)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    fn square(x0: f64, y0: f64, side: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x0 + side, y0),
            Point::new(x0 + side, y0 + side),
            Point::new(x0, y0 + side),
        ]
    }

    #[test]
    fn area_of_square_and_degenerate() {
        assert!((outline_area(&square(2.0, 3.0, 4.0)) - 16.0).abs() < TOL);
        assert!(outline_area(&[Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).abs() < TOL);
    }

    #[test]
    fn fully_inside_is_unchanged() {
        let sq = square(10.0, 10.0, 5.0);
        let clipped = clip_to_frame(&sq, 100.0, 100.0);
        assert!((outline_area(&clipped) - 25.0).abs() < TOL);
        assert_eq!(clipped.len(), 4);
    }

    #[test]
    fn half_outside_keeps_half_the_area() {
        let sq = square(-5.0, 20.0, 10.0);
        let clipped = clip_to_frame(&sq, 100.0, 100.0);
        assert!((outline_area(&clipped) - 50.0).abs() < TOL);
        assert!(clipped.iter().all(|p| p.x >= 0.0));
    }

    #[test]
    fn fully_outside_is_empty() {
        let sq = square(150.0, 150.0, 10.0);
        assert!(clip_to_frame(&sq, 100.0, 100.0).is_empty());
    }

    #[test]
    fn corner_overlap_is_quarter() {
        let sq = square(95.0, 95.0, 10.0);
        let clipped = clip_to_frame(&sq, 100.0, 100.0);
        assert!((outline_area(&clipped) - 25.0).abs() < TOL);
    }

    #[test]
    fn densify_keeps_corners_and_area() {
        let sq = square(0.0, 0.0, 8.0);
        let dense = densify(&sq, 4);
        assert_eq!(dense.len(), 16);
        assert_eq!(dense[0], sq[0]);
        assert_eq!(dense[4], sq[1]);
        assert!((outline_area(&dense) - 64.0).abs() < TOL);
    }
}
