//! Detection Layer
//!
//! Runs geometric detectors against delivered frames. Detectors report raw
//! corners in their own coordinate convention; everything downstream works
//! on canonical [`Detection`]s. Platform and vendor SDK detectors plug in
//! through the [`Detector`] trait; [`EdgeQuadDetector`] is the built-in
//! document detector.

pub mod filter;
pub mod quad_detect;

pub use filter::{EmptyFramePolicy, FilterConfig, ThrottleFilter};
pub use quad_detect::{EdgeQuadDetector, QuadDetectorConfig};

use anyhow::Result;

use crate::capture::frame::Frame;
use crate::geometry::{DetectorConvention, NormQuad, Point};

/// What kind of thing a detection is, with per-kind payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionKind {
    /// A document-shaped quadrilateral.
    DocumentQuad,
    /// A decoded barcode region. Symbology and payload come from the
    /// decoding engine behind the detector.
    Barcode { symbology: String, payload: String },
    /// A face bounding box.
    Face,
}

/// Raw detector output: corners still in the detector's own convention.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub kind: DetectionKind,
    pub corners: [Point; 4],
    pub convention: DetectorConvention,
    /// Detector confidence, 0.0 - 1.0.
    pub confidence: f32,
}

impl RawDetection {
    /// Convert into canonical normalized coordinates. This is the only
    /// place raw conventions are interpreted; after it, every quad in the
    /// pipeline is canonical.
    pub fn canonical(self) -> Detection {
        Detection {
            kind: self.kind,
            quad: NormQuad::from_raw(self.corners, self.convention),
            confidence: self.confidence,
        }
    }
}

/// A detection in canonical normalized coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: DetectionKind,
    pub quad: NormQuad,
    /// Detector confidence, 0.0 - 1.0.
    pub confidence: f32,
}

impl Detection {
    /// Quad area as a fraction of the frame.
    pub fn relative_area(&self) -> f32 {
        self.quad.area()
    }
}

/// A per-frame geometric detector.
///
/// Invoked synchronously on the engine's worker thread, one frame at a
/// time, preserving frame order. A failing detector contributes an empty
/// batch for that frame; it never fails the pipeline.
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;
}
