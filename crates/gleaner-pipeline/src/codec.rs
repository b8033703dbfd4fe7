//! Label line codec: parse and format the normalized
//! `class_id v1 v2 ... vn` annotation format.
//!
//! - 5 tokens: box, `class cx cy w h`
//! - 7 or more tokens with an even number of values: polygon,
//!   `class x1 y1 x2 y2 x3 y3 ...`
//!
//! Anything else is a [`DatasetError::MalformedLabel`]. At file level
//! malformed lines are never dropped: [`parse_label_file`] keeps them as
//! [`LabelLine::Malformed`] and [`format_label_file`] writes them back
//! verbatim.

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry::{BoxGeometry, Geometry, Point};
use crate::types::{DatasetError, Instance, LabelFile, LabelLine};

/// Decimal places written for every coordinate.
pub const COORD_PRECISION: usize = 6;

/// Target geometry form when normalizing a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryFormat {
    /// Convert every box to its 4-point polygon (segmentation labels).
    #[default]
    Polygon,
    /// Convert every polygon to its bounding box (detection labels).
    Box,
    /// Leave geometry as parsed.
    Preserve,
}

/// Counts from normalizing one or more label files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    /// Instances whose geometry form was converted.
    pub converted: usize,
    /// Boxes left unconverted because a value was outside `[0, 1]`.
    pub out_of_range: usize,
    /// Malformed lines carried through verbatim.
    pub malformed: usize,
}

impl NormalizeStats {
    /// Accumulate another file's counts.
    pub const fn merge(&mut self, other: Self) {
        self.converted += other.converted;
        self.out_of_range += other.out_of_range;
        self.malformed += other.malformed;
    }
}

fn malformed(line: &str, reason: impl Into<String>) -> DatasetError {
    DatasetError::MalformedLabel {
        line: line.to_string(),
        reason: reason.into(),
    }
}

/// Parse a class id token.
///
/// Accepts plain integers and integral floats (`"3.0"`), which some
/// exporters emit.
fn parse_class_id(line: &str, token: &str) -> Result<u32, DatasetError> {
    if let Ok(id) = token.parse::<u32>() {
        return Ok(id);
    }
    let value: f64 = token
        .parse()
        .map_err(|_| malformed(line, format!("invalid class id {token:?}")))?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
        return Err(malformed(line, format!("invalid class id {token:?}")));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value as u32)
}

/// Parse one annotation line.
///
/// # Errors
///
/// Returns [`DatasetError::MalformedLabel`] when the token count matches
/// neither a box nor a polygon, when a token is not a finite number, or
/// when a box has a non-positive width or height.
pub fn parse_line(line: &str) -> Result<Instance, DatasetError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 5 {
        return Err(malformed(
            line,
            format!("expected at least 5 tokens, found {}", tokens.len()),
        ));
    }

    let class_id = parse_class_id(line, tokens[0])?;
    let values = tokens[1..]
        .iter()
        .map(|t| match t.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(malformed(line, format!("invalid coordinate {t:?}"))),
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let geometry = match values.len() {
        4 => {
            let b = BoxGeometry::new(values[0], values[1], values[2], values[3]);
            if b.w <= 0.0 || b.h <= 0.0 {
                return Err(malformed(line, "box width and height must be positive"));
            }
            Geometry::Box(b)
        }
        n if n >= 6 && n % 2 == 0 => Geometry::Polygon(
            values
                .chunks_exact(2)
                .map(|xy| Point::new(xy[0], xy[1]))
                .collect(),
        ),
        n => {
            return Err(malformed(
                line,
                format!("{n} values is neither a box (4) nor a polygon (even, at least 6)"),
            ));
        }
    };

    Ok(Instance::new(class_id, geometry))
}

/// Format one instance as an annotation line (no trailing newline).
#[must_use]
pub fn format_instance(instance: &Instance) -> String {
    let mut out = instance.class_id.to_string();
    for v in instance.geometry.values() {
        let _ = write!(out, " {v:.COORD_PRECISION$}");
    }
    out
}

/// Format one label line; malformed lines are returned verbatim.
#[must_use]
pub fn format_line(line: &LabelLine) -> String {
    match line {
        LabelLine::Instance(instance) => format_instance(instance),
        LabelLine::Malformed { raw, .. } => raw.clone(),
    }
}

/// Parse a whole label file. Never fails.
///
/// Blank lines are skipped. Malformed lines are kept as
/// [`LabelLine::Malformed`] and logged.
#[must_use]
pub fn parse_label_file(text: &str) -> LabelFile {
    let lines = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match parse_line(line) {
            Ok(instance) => LabelLine::Instance(instance),
            Err(DatasetError::MalformedLabel { reason, .. }) => {
                warn!(line, %reason, "malformed label line preserved");
                LabelLine::Malformed {
                    raw: line.to_string(),
                    reason,
                }
            }
            Err(other) => {
                let reason = other.to_string();
                warn!(line, %reason, "malformed label line preserved");
                LabelLine::Malformed {
                    raw: line.to_string(),
                    reason,
                }
            }
        })
        .collect();
    LabelFile::new(lines)
}

/// Format a whole label file, one line per entry, newline-terminated.
#[must_use]
pub fn format_label_file(file: &LabelFile) -> String {
    let mut out = String::new();
    for line in file.lines() {
        out.push_str(&format_line(line));
        out.push('\n');
    }
    out
}

/// Rewrite a label file's geometry into the requested form.
///
/// - [`GeometryFormat::Polygon`]: boxes become their clipped 4-point
///   rectangle. A box with any value outside `[0, 1]` is left as is and
///   counted in [`NormalizeStats::out_of_range`].
/// - [`GeometryFormat::Box`]: polygons become their clipped bounding box.
/// - [`GeometryFormat::Preserve`]: geometry is untouched.
///
/// Malformed lines pass through unchanged.
#[must_use]
pub fn normalize_label_file(file: &LabelFile, format: GeometryFormat) -> (LabelFile, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let lines = file
        .lines()
        .iter()
        .map(|line| match line {
            LabelLine::Malformed { .. } => {
                stats.malformed += 1;
                line.clone()
            }
            LabelLine::Instance(instance) => {
                let geometry = match (format, &instance.geometry) {
                    (GeometryFormat::Polygon, Geometry::Box(b)) => {
                        if b.values_normalized() {
                            stats.converted += 1;
                            Geometry::Box(*b).to_polygon().clip()
                        } else {
                            stats.out_of_range += 1;
                            warn!(
                                class_id = instance.class_id,
                                ?b,
                                "box values outside [0, 1]; left unconverted",
                            );
                            instance.geometry.clone()
                        }
                    }
                    (GeometryFormat::Box, Geometry::Polygon(_)) => {
                        stats.converted += 1;
                        instance.geometry.to_box().clip()
                    }
                    _ => instance.geometry.clone(),
                };
                LabelLine::Instance(Instance::new(instance.class_id, geometry))
            }
        })
        .collect();
    (LabelFile::new(lines), stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-6;

    #[test]
    fn parse_box_line() {
        let inst = parse_line("3 0.5 0.25 0.1 0.2").unwrap();
        assert_eq!(inst.class_id, 3);
        assert_eq!(
            inst.geometry,
            Geometry::Box(BoxGeometry::new(0.5, 0.25, 0.1, 0.2))
        );
    }

    #[test]
    fn parse_polygon_line() {
        let inst = parse_line("1 0.1 0.1 0.9 0.1 0.5 0.9").unwrap();
        assert_eq!(inst.class_id, 1);
        assert!(matches!(&inst.geometry, Geometry::Polygon(points) if points.len() == 3));
    }

    #[test]
    fn parse_integral_float_class_id() {
        let inst = parse_line("2.0 0.5 0.5 0.1 0.1").unwrap();
        assert_eq!(inst.class_id, 2);
    }

    #[test]
    fn too_few_tokens_is_malformed() {
        let err = parse_line("0 0.5 0.5 0.1").unwrap_err();
        assert!(matches!(err, DatasetError::MalformedLabel { .. }));
    }

    #[test]
    fn odd_polygon_value_count_is_malformed() {
        // 5 values after the class id: neither box nor polygon.
        assert!(parse_line("0 0.1 0.1 0.9 0.1 0.5").is_err());
        // 7 values: odd coordinate count.
        assert!(parse_line("0 0.1 0.1 0.9 0.1 0.5 0.9 0.4").is_err());
    }

    #[test]
    fn non_numeric_tokens_are_malformed() {
        assert!(parse_line("cat 0.5 0.5 0.1 0.1").is_err());
        assert!(parse_line("0 0.5 abc 0.1 0.1").is_err());
        assert!(parse_line("-1 0.5 0.5 0.1 0.1").is_err());
        assert!(parse_line("0 0.5 NaN 0.1 0.1").is_err());
    }

    #[test]
    fn zero_size_box_is_malformed() {
        assert!(parse_line("0 0.5 0.5 0.0 0.1").is_err());
    }

    #[test]
    fn box_line_round_trips_within_tolerance() {
        let lines = [
            "0 0.5 0.5 0.2 0.3",
            "7 0.123456 0.654321 0.010000 0.999999",
            "12 0.0000004 1.0 0.3333333333 0.25",
        ];
        for line in lines {
            let formatted = format_instance(&parse_line(line).unwrap());
            let original: Vec<f64> = line.split_whitespace().map(|t| t.parse().unwrap()).collect();
            let reparsed: Vec<f64> = formatted
                .split_whitespace()
                .map(|t| t.parse().unwrap())
                .collect();
            assert_eq!(reparsed.len(), 5, "{formatted}");
            for (a, b) in original.iter().zip(&reparsed) {
                assert!((a - b).abs() <= TOL, "{line} -> {formatted}");
            }
        }
    }

    #[test]
    fn label_file_preserves_malformed_lines_verbatim() {
        let text = "0 0.5 0.5 0.2 0.2\nthis is   not a label\n\n1 0.1 0.1 0.9 0.1 0.5 0.9\n";
        let file = parse_label_file(text);
        assert_eq!(file.lines().len(), 3);
        assert_eq!(file.malformed_count(), 1);

        let written = format_label_file(&file);
        let written_lines: Vec<&str> = written.lines().collect();
        assert_eq!(written_lines[1], "this is   not a label");
    }

    #[test]
    fn normalize_to_polygon_converts_boxes_only() {
        let file = parse_label_file("0 0.5 0.5 0.2 0.2\n1 0.1 0.1 0.9 0.1 0.5 0.9\n");
        let (normalized, stats) = normalize_label_file(&file, GeometryFormat::Polygon);
        assert_eq!(stats.converted, 1);
        assert_eq!(stats.out_of_range, 0);
        assert!(normalized.instances().all(|i| !i.geometry.is_box()));
        let first = normalized.instances().next().unwrap();
        assert_eq!(first.geometry.outline().len(), 4);
    }

    #[test]
    fn normalize_keeps_out_of_range_box() {
        let file = parse_label_file("0 1.2 0.5 0.2 0.2\n");
        let (normalized, stats) = normalize_label_file(&file, GeometryFormat::Polygon);
        assert_eq!(stats.converted, 0);
        assert_eq!(stats.out_of_range, 1);
        assert!(normalized.instances().next().unwrap().geometry.is_box());
    }

    #[test]
    fn normalize_to_box_takes_bounding_rectangle() {
        let file = parse_label_file("4 0.2 0.2 0.6 0.2 0.4 0.8\n");
        let (normalized, stats) = normalize_label_file(&file, GeometryFormat::Box);
        assert_eq!(stats.converted, 1);
        let line = format_label_file(&normalized);
        assert_eq!(line, "4 0.400000 0.500000 0.400000 0.600000\n");
    }

    #[test]
    fn normalize_counts_malformed_passthrough() {
        let file = parse_label_file("garbage\n0 0.5 0.5 0.2 0.2\n");
        let (normalized, stats) = normalize_label_file(&file, GeometryFormat::Preserve);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.converted, 0);
        assert_eq!(normalized, file);
    }
}
