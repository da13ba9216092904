//! Coordinate bookkeeping for detections
//!
//! Detections travel through three coordinate spaces: the detector's own
//! normalized output, a canonical normalized space, and display points.
//! Each space gets its own concrete type so a value's convention is carried
//! in its type rather than remembered by the caller.

pub mod normalize;

pub use normalize::{ViewTransform, Viewport};

use serde::{Deserialize, Serialize};

/// A 2D point. Its coordinate convention is given by the containing type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Rotation that must be applied to a sensor buffer so its content reads "up".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Parse a rotation from whole degrees (0, 90, 180, 270).
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// Whether this rotation swaps the buffer's width and height.
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Orientation tag carried by every frame: rotation to upright plus an
/// optional horizontal mirror (front cameras).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Orientation {
    pub rotation: Rotation,
    pub mirrored: bool,
}

impl Orientation {
    pub const UP: Self = Self {
        rotation: Rotation::Deg0,
        mirrored: false,
    };

    pub fn new(rotation: Rotation, mirrored: bool) -> Self {
        Self { rotation, mirrored }
    }
}

/// Map a normalized point from raw buffer space into upright space.
///
/// Rotation first (the buffer is turned so its content reads up), then the
/// mirror flip along the upright horizontal axis.
pub fn orient_norm_point(p: Point, orientation: Orientation) -> Point {
    let rotated = match orientation.rotation {
        Rotation::Deg0 => p,
        Rotation::Deg90 => Point::new(1.0 - p.y, p.x),
        Rotation::Deg180 => Point::new(1.0 - p.x, 1.0 - p.y),
        Rotation::Deg270 => Point::new(p.y, 1.0 - p.x),
    };
    if orientation.mirrored {
        Point::new(1.0 - rotated.x, rotated.y)
    } else {
        rotated
    }
}

/// Exact inverse of [`orient_norm_point`].
pub fn unorient_norm_point(p: Point, orientation: Orientation) -> Point {
    let unmirrored = if orientation.mirrored {
        Point::new(1.0 - p.x, p.y)
    } else {
        p
    };
    match orientation.rotation {
        Rotation::Deg0 => unmirrored,
        Rotation::Deg90 => Point::new(unmirrored.y, 1.0 - unmirrored.x),
        Rotation::Deg180 => Point::new(1.0 - unmirrored.x, 1.0 - unmirrored.y),
        Rotation::Deg270 => Point::new(1.0 - unmirrored.y, unmirrored.x),
    }
}

/// Which corner a detector's normalized output measures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadOrigin {
    /// Origin top-left, y grows down.
    TopLeft,
    /// Origin bottom-left, y grows up (vision-framework style).
    BottomLeft,
}

/// Coordinate convention of a detector's raw output. Converted to the
/// canonical convention (top-left origin, y down) at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConvention {
    pub origin: QuadOrigin,
    pub mirrored: bool,
}

impl DetectorConvention {
    /// The canonical convention itself; conversion is a no-op.
    pub fn top_left() -> Self {
        Self {
            origin: QuadOrigin::TopLeft,
            mirrored: false,
        }
    }

    /// Bottom-left origin with y up, as vision frameworks report.
    pub fn bottom_left() -> Self {
        Self {
            origin: QuadOrigin::BottomLeft,
            mirrored: false,
        }
    }

    /// Convert a raw normalized point into the canonical convention.
    pub fn to_canonical(&self, p: Point) -> Point {
        let x = if self.mirrored { 1.0 - p.x } else { p.x };
        let y = match self.origin {
            QuadOrigin::TopLeft => p.y,
            QuadOrigin::BottomLeft => 1.0 - p.y,
        };
        Point::new(x, y)
    }
}

/// Quadrilateral in canonical detector-normalized coordinates: 0..1 per
/// axis, origin top-left, y down. Corner order is top-left, top-right,
/// bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormQuad {
    pub corners: [Point; 4],
}

impl NormQuad {
    pub fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    /// Build from raw detector corners in the given convention.
    pub fn from_raw(corners: [Point; 4], convention: DetectorConvention) -> Self {
        Self {
            corners: corners.map(|p| convention.to_canonical(p)),
        }
    }

    /// Axis-aligned box helper for detectors that report bounds only.
    pub fn from_bounds(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            corners: [
                Point::new(x, y),
                Point::new(x + width, y),
                Point::new(x + width, y + height),
                Point::new(x, y + height),
            ],
        }
    }

    /// Signed-free area via the shoelace formula.
    pub fn area(&self) -> f32 {
        shoelace_area(&self.corners)
    }

    pub fn centroid(&self) -> Point {
        centroid(&self.corners)
    }

    /// Bounding box as (x, y, width, height).
    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        bounding_box(&self.corners)
    }

    /// True if the quad cannot support a meaningful transform: area below
    /// `min_area` or self-intersecting edges.
    pub fn is_degenerate(&self, min_area: f32) -> bool {
        corners_degenerate(&self.corners, min_area)
    }

    /// True if all corners lie within [0, 1] on both axes, with `slack`
    /// tolerance outside the range.
    pub fn in_unit_range(&self, slack: f32) -> bool {
        self.corners.iter().all(|p| {
            p.x >= -slack && p.x <= 1.0 + slack && p.y >= -slack && p.y <= 1.0 + slack
        })
    }

    /// Rotate/mirror the quad's coordinates into upright space, matching
    /// what the same orientation does to the pixels.
    pub fn oriented(&self, orientation: Orientation) -> NormQuad {
        NormQuad {
            corners: self.corners.map(|p| orient_norm_point(p, orientation)),
        }
    }
}

/// Quadrilateral in display coordinates: layout points on the visible
/// preview surface, origin top-left, y down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayQuad {
    pub corners: [Point; 4],
}

impl DisplayQuad {
    pub fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    pub fn centroid(&self) -> Point {
        centroid(&self.corners)
    }

    /// Bounding box as (x, y, width, height).
    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        bounding_box(&self.corners)
    }
}

/// Degeneracy test for any four corners, whatever their space: area below
/// `min_area` or self-intersecting edges.
pub fn corners_degenerate(corners: &[Point; 4], min_area: f32) -> bool {
    if shoelace_area(corners) < min_area {
        return true;
    }
    segments_intersect(corners[0], corners[1], corners[2], corners[3])
        || segments_intersect(corners[1], corners[2], corners[3], corners[0])
}

/// Shoelace polygon area (absolute value).
pub fn shoelace_area(corners: &[Point; 4]) -> f32 {
    let mut acc = 0.0;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        acc += a.x * b.y - b.x * a.y;
    }
    acc.abs() / 2.0
}

fn centroid(corners: &[Point; 4]) -> Point {
    let sx: f32 = corners.iter().map(|p| p.x).sum();
    let sy: f32 = corners.iter().map(|p| p.y).sum();
    Point::new(sx / 4.0, sy / 4.0)
}

fn bounding_box(corners: &[Point; 4]) -> (f32, f32, f32, f32) {
    let min_x = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let min_y = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let max_y = corners.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
    (min_x, min_y, max_x - min_x, max_y - min_y)
}

fn cross(o: Point, a: Point, b: Point) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Proper (interior) intersection test for segments p1-p2 and p3-p4.
/// Collinear overlap is not reported; the area check catches those quads.
fn segments_intersect(p1: Point, p2: Point, p3: Point, p4: Point) -> bool {
    let d1 = cross(p3, p4, p1);
    let d2 = cross(p3, p4, p2);
    let d3 = cross(p1, p2, p3);
    let d4 = cross(p1, p2, p4);
    ((d1 > 0.0) != (d2 > 0.0)) && ((d3 > 0.0) != (d4 > 0.0))
}
