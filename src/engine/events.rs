//! Command and event types for the scan engine

use uuid::Uuid;

use crate::extract::ExtractionResult;
use crate::geometry::{DisplayQuad, Viewport};
use crate::vision::DetectionKind;

/// Commands accepted by the engine worker.
#[derive(Debug)]
pub enum EngineCommand {
    /// Register a one-shot capture request.
    Capture { id: Uuid },
    /// The display geometry changed (rotation, resize, density).
    SetViewport(Viewport),
    /// Stop the worker.
    Shutdown,
}

/// A detection mapped into display coordinates for overlay consumers.
#[derive(Debug, Clone)]
pub struct DisplayDetection {
    pub kind: DetectionKind,
    pub quad: DisplayQuad,
    pub confidence: f32,
}

/// How a capture request ended. Exactly one outcome is delivered per
/// request id.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Frame rectified and extraction finished.
    Completed {
        result: ExtractionResult,
        /// Rectified image width in pixels.
        width: u32,
        /// Rectified image height in pixels.
        height: u32,
    },
    /// No frame was available to capture.
    NoImage,
    /// Refused or superseded under the configured capture policy.
    Rejected,
}

/// Events published by the engine to its consumer.
#[derive(Debug)]
pub enum PipelineEvent {
    /// Throttled detection update in display coordinates. Published at
    /// most once per throttle interval, never per raw frame.
    Detections {
        detections: Vec<DisplayDetection>,
        frames_seen: u64,
    },
    /// A capture request completed.
    CaptureFinished { id: Uuid, outcome: CaptureOutcome },
    /// The frame source delivered its last frame; no further detection
    /// updates will follow.
    SourceEnded,
}
