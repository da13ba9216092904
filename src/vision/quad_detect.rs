//! Edge-based document quadrilateral detection
//!
//! Grayscale, blur, Canny edges, Hough lines, then the four dominant edges
//! (top/bottom horizontals, left/right verticals) intersected into corner
//! points. This is the built-in stand-in for a platform rectangle
//! detector; SDK-backed detectors plug in through the same trait.

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use tracing::debug;

use super::{DetectionKind, Detector, RawDetection};
use crate::capture::frame::Frame;
use crate::geometry::{shoelace_area, DetectorConvention, Point};

/// Tuning knobs for [`EdgeQuadDetector`].
#[derive(Debug, Clone)]
pub struct QuadDetectorConfig {
    /// Frames larger than this on either axis are downscaled before edge
    /// detection to bound per-frame cost.
    pub max_dimension: u32,
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Minimum quad area as a fraction of the working image.
    pub min_area_fraction: f32,
}

impl Default for QuadDetectorConfig {
    fn default() -> Self {
        Self {
            max_dimension: 640,
            blur_sigma: 1.6,
            canny_low: 50.0,
            canny_high: 150.0,
            min_area_fraction: 0.05,
        }
    }
}

/// Document quad detector over Canny + Hough.
pub struct EdgeQuadDetector {
    config: QuadDetectorConfig,
}

impl EdgeQuadDetector {
    pub fn new(config: QuadDetectorConfig) -> Self {
        Self { config }
    }
}

impl Default for EdgeQuadDetector {
    fn default() -> Self {
        Self::new(QuadDetectorConfig::default())
    }
}

impl Detector for EdgeQuadDetector {
    fn name(&self) -> &str {
        "edge-quad"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let Some(rgba) = frame.to_rgba_image() else {
            debug!("Frame buffer inconsistent with geometry; skipping");
            return Ok(vec![]);
        };
        let mut gray = DynamicImage::ImageRgba8(rgba).to_luma8();

        let (fw, fh) = gray.dimensions();
        let max_dim = fw.max(fh);
        if max_dim > self.config.max_dimension {
            let scale = self.config.max_dimension as f32 / max_dim as f32;
            let nw = ((fw as f32 * scale) as u32).max(1);
            let nh = ((fh as f32 * scale) as u32).max(1);
            gray = imageops::resize(&gray, nw, nh, FilterType::Triangle);
        }
        let (w, h) = gray.dimensions();

        let blurred = gaussian_blur_f32(&gray, self.config.blur_sigma);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);

        let diagonal = ((w as f64).powi(2) + (h as f64).powi(2)).sqrt();
        let options = LineDetectionOptions {
            vote_threshold: (diagonal * 0.25).max(40.0) as u32,
            suppression_radius: 8,
        };
        let lines = detect_lines(&edges, options);
        if lines.len() < 4 {
            return Ok(vec![]);
        }

        let (horizontal, vertical) = classify_lines(&lines);
        if horizontal.len() < 2 || vertical.len() < 2 {
            return Ok(vec![]);
        }

        let top = extreme_horizontal(&horizontal, w, false);
        let bottom = extreme_horizontal(&horizontal, w, true);
        let left = extreme_vertical(&vertical, h, false);
        let right = extreme_vertical(&vertical, h, true);

        let corners = match quad_corners(&top, &bottom, &left, &right) {
            Some(c) => c,
            None => return Ok(vec![]),
        };

        // Reject corners wildly outside the frame; small spill from rounding
        // is tolerated and normalized out below.
        let slack_x = w as f32 * 0.1;
        let slack_y = h as f32 * 0.1;
        let in_frame = corners.iter().all(|p| {
            p.x > -slack_x && p.x < w as f32 + slack_x && p.y > -slack_y && p.y < h as f32 + slack_y
        });
        if !in_frame {
            return Ok(vec![]);
        }

        let area = shoelace_area(&corners);
        let min_area = w as f32 * h as f32 * self.config.min_area_fraction;
        if area < min_area {
            debug!("Quad candidate too small: {} < {}", area, min_area);
            return Ok(vec![]);
        }

        let confidence = corner_regularity(&corners);
        let normalized = corners.map(|p| {
            Point::new(
                (p.x / w as f32).clamp(0.0, 1.0),
                (p.y / h as f32).clamp(0.0, 1.0),
            )
        });

        Ok(vec![RawDetection {
            kind: DetectionKind::DocumentQuad,
            corners: normalized,
            convention: DetectorConvention::top_left(),
            confidence,
        }])
    }
}

/// A Hough line in radians: points satisfy x*cos(theta) + y*sin(theta) = r.
#[derive(Debug, Clone, Copy)]
struct Line {
    r: f32,
    theta: f32,
}

impl From<&PolarLine> for Line {
    fn from(line: &PolarLine) -> Self {
        Self {
            r: line.r,
            theta: (line.angle_in_degrees as f32).to_radians(),
        }
    }
}

/// Split detected lines into roughly horizontal and roughly vertical sets.
/// theta near 0 or 180 degrees means a vertical line (x = r); theta near 90
/// means horizontal (y = r). Diagonals are discarded.
fn classify_lines(lines: &[PolarLine]) -> (Vec<Line>, Vec<Line>) {
    let mut horizontal = Vec::new();
    let mut vertical = Vec::new();
    for line in lines {
        let degrees = line.angle_in_degrees as i32;
        if !(30..150).contains(&degrees) {
            vertical.push(Line::from(line));
        } else if (60..120).contains(&degrees) {
            horizontal.push(Line::from(line));
        }
    }
    (horizontal, vertical)
}

/// The horizontal line whose y at the frame's horizontal midpoint is
/// smallest (top edge) or largest (bottom edge).
fn extreme_horizontal(lines: &[Line], width: u32, want_max: bool) -> Line {
    let mid_x = width as f32 / 2.0;
    let key = |l: &Line| (l.r - mid_x * l.theta.cos()) / l.theta.sin();
    pick_extreme(lines, key, want_max)
}

/// The vertical line whose x at the frame's vertical midpoint is smallest
/// (left edge) or largest (right edge).
fn extreme_vertical(lines: &[Line], height: u32, want_max: bool) -> Line {
    let mid_y = height as f32 / 2.0;
    let key = |l: &Line| (l.r - mid_y * l.theta.sin()) / l.theta.cos();
    pick_extreme(lines, key, want_max)
}

fn pick_extreme(lines: &[Line], key: impl Fn(&Line) -> f32, want_max: bool) -> Line {
    let mut best = lines[0];
    let mut best_key = key(&best);
    for line in &lines[1..] {
        let k = key(line);
        if (want_max && k > best_key) || (!want_max && k < best_key) {
            best = *line;
            best_key = k;
        }
    }
    best
}

/// Intersect two polar lines. Returns `None` for near-parallel pairs.
fn intersect(a: &Line, b: &Line) -> Option<Point> {
    let det = (b.theta - a.theta).sin();
    if det.abs() < 1e-6 {
        return None;
    }
    let x = (a.r * b.theta.sin() - b.r * a.theta.sin()) / det;
    let y = (b.r * a.theta.cos() - a.r * b.theta.cos()) / det;
    if x.is_finite() && y.is_finite() {
        Some(Point::new(x, y))
    } else {
        None
    }
}

/// Corners in top-left, top-right, bottom-right, bottom-left order.
fn quad_corners(top: &Line, bottom: &Line, left: &Line, right: &Line) -> Option<[Point; 4]> {
    Some([
        intersect(left, top)?,
        intersect(right, top)?,
        intersect(right, bottom)?,
        intersect(left, bottom)?,
    ])
}

/// Confidence heuristic: how close the four corner angles are to right
/// angles. A perfect rectangle scores 1.0.
fn corner_regularity(corners: &[Point; 4]) -> f32 {
    let mut total = 0.0;
    for i in 0..4 {
        let prev = corners[(i + 3) % 4];
        let here = corners[i];
        let next = corners[(i + 1) % 4];
        let ax = prev.x - here.x;
        let ay = prev.y - here.y;
        let bx = next.x - here.x;
        let by = next.y - here.y;
        let denom = (ax * ax + ay * ay).sqrt() * (bx * bx + by * by).sqrt();
        if denom < 1e-6 {
            return 0.0;
        }
        let cos = ((ax * bx + ay * by) / denom).abs();
        total += cos;
    }
    (1.0 - total / 4.0).clamp(0.0, 1.0)
}
