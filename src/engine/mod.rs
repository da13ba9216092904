//! Pipeline orchestration
//!
//! Three threads run a scan session. The source thread drains the frame
//! source at its paced rate and pushes owned frames over a bounded
//! channel, dropping late frames instead of queueing them. The worker
//! thread owns every piece of mutable pipeline state (latest frame,
//! retained detection, pending capture), runs detectors synchronously per
//! frame to preserve ordering, and publishes throttled updates. The
//! extraction thread rectifies and extracts captured frames, which is
//! CPU-heavier than detection and must not stall the frame loop.
//!
//! Cross-thread publication is a single channel hop; consumers read
//! [`PipelineEvent`]s from their own thread with no further locking.

pub mod events;

pub use events::{CaptureOutcome, DisplayDetection, EngineCommand, PipelineEvent};

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::frame::Frame;
use crate::capture::{CaptureConfig, FrameSource};
use crate::extract::Extractor;
use crate::geometry::{NormQuad, ViewTransform, Viewport};
use crate::rectify::{Rectifier, RectifyConfig};
use crate::vision::{Detector, FilterConfig, ThrottleFilter};

/// What to do with a capture request while another is outstanding.
///
/// An in-flight extraction is never cancelled; `Replace` swaps out the
/// not-yet-served pending request only. A replaced or refused request
/// still completes, with [`CaptureOutcome::Rejected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    #[default]
    Reject,
    Replace,
}

/// Everything the engine needs to run a session.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub filter: FilterConfig,
    pub rectify: RectifyConfig,
    pub capture_policy: CapturePolicy,
    pub viewport: Viewport,
}

/// Runtime counters mirrored out of the worker for status displays.
#[derive(Debug, Clone, Default)]
pub struct RuntimeStatus {
    pub is_running: bool,
    pub frames_seen: u64,
    pub batches_published: u64,
    pub captures_completed: u64,
    pub last_error: Option<String>,
}

enum FrameMsg {
    Frame(Frame),
    Ended,
}

struct ExtractJob {
    id: Uuid,
    frame: Frame,
    quad: Option<NormQuad>,
}

/// A running scan session.
pub struct ScanEngine {
    commands: Sender<EngineCommand>,
    events: Receiver<PipelineEvent>,
    status: Arc<RwLock<RuntimeStatus>>,
    source_handle: Option<JoinHandle<()>>,
    worker_handle: Option<JoinHandle<()>>,
    extract_handle: Option<JoinHandle<()>>,
}

impl ScanEngine {
    /// Spawn the source, worker, and extraction threads and start
    /// processing frames immediately.
    pub fn start(
        config: EngineConfig,
        mut source: Box<dyn FrameSource>,
        detectors: Vec<Box<dyn Detector>>,
        extractor: Box<dyn Extractor>,
    ) -> Self {
        // Bounded by design: when the worker falls behind, late frames are
        // dropped at the channel rather than queued.
        let (frame_tx, frame_rx) = bounded::<FrameMsg>(2);
        let (cmd_tx, cmd_rx) = unbounded::<EngineCommand>();
        let (event_tx, event_rx) = unbounded::<PipelineEvent>();
        let (job_tx, job_rx) = unbounded::<ExtractJob>();
        let (done_tx, done_rx) = unbounded::<Uuid>();

        let status = Arc::new(RwLock::new(RuntimeStatus {
            is_running: true,
            ..RuntimeStatus::default()
        }));

        info!("Starting scan session: source = {}", source.describe());

        let source_status = status.clone();
        let pace = Duration::from_secs(1) / config.capture.max_fps.max(1);
        let source_handle = std::thread::spawn(move || {
            loop {
                match source.next_frame() {
                    Ok(Some(frame)) => match frame_tx.try_send(FrameMsg::Frame(frame)) {
                        Ok(()) => {}
                        Err(crossbeam_channel::TrySendError::Full(_)) => {
                            debug!("Worker busy, dropping late frame");
                        }
                        Err(crossbeam_channel::TrySendError::Disconnected(_)) => break,
                    },
                    Ok(None) => {
                        debug!("Frame source exhausted");
                        let _ = frame_tx.send(FrameMsg::Ended);
                        break;
                    }
                    Err(e) => {
                        warn!("Frame source failed: {e}");
                        source_status.write().last_error = Some(e.to_string());
                        let _ = frame_tx.send(FrameMsg::Ended);
                        break;
                    }
                }
                std::thread::sleep(pace);
            }
        });

        let worker = Worker {
            detectors,
            throttle: ThrottleFilter::new(config.filter.clone()),
            viewport: config.viewport,
            policy: config.capture_policy,
            latest_frame: None,
            pending: None,
            in_flight: None,
            source_ended: false,
            event_tx: event_tx.clone(),
            job_tx,
            status: status.clone(),
        };
        let worker_handle = std::thread::spawn(move || worker.run(frame_rx, cmd_rx, done_rx));

        let rectifier = Rectifier::new(config.rectify.clone());
        let extract_status = status.clone();
        let extract_handle = std::thread::spawn(move || {
            let mut extractor = extractor;
            for job in job_rx.iter() {
                let outcome = match job.frame.to_rgba_image() {
                    Some(image) => {
                        let rectified =
                            rectifier.rectify(&image, job.frame.orientation, job.quad.as_ref());
                        let (width, height) = rectified.dimensions();
                        let result = extractor.extract(&rectified);
                        CaptureOutcome::Completed {
                            result,
                            width,
                            height,
                        }
                    }
                    None => {
                        warn!("Captured frame buffer was inconsistent; reporting no image");
                        CaptureOutcome::NoImage
                    }
                };
                extract_status.write().captures_completed += 1;
                let _ = event_tx.send(PipelineEvent::CaptureFinished {
                    id: job.id,
                    outcome,
                });
                let _ = done_tx.send(job.id);
            }
        });

        Self {
            commands: cmd_tx,
            events: event_rx,
            status,
            source_handle: Some(source_handle),
            worker_handle: Some(worker_handle),
            extract_handle: Some(extract_handle),
        }
    }

    /// Register a one-shot capture request. The returned id matches the
    /// eventual [`PipelineEvent::CaptureFinished`].
    pub fn trigger_capture(&self) -> Uuid {
        let id = Uuid::new_v4();
        let _ = self.commands.send(EngineCommand::Capture { id });
        id
    }

    /// Update the display geometry used for published detections.
    pub fn set_viewport(&self, viewport: Viewport) {
        let _ = self.commands.send(EngineCommand::SetViewport(viewport));
    }

    /// Event stream: throttled detections and capture completions.
    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status.read().clone()
    }

    /// Stop the session and join all threads.
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
        for handle in [
            self.source_handle.take(),
            self.worker_handle.take(),
            self.extract_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
        self.status.write().is_running = false;
    }
}

impl Drop for ScanEngine {
    fn drop(&mut self) {
        self.finish();
    }
}

/// The worker thread's state. Only this thread reads or writes it.
struct Worker {
    detectors: Vec<Box<dyn Detector>>,
    throttle: ThrottleFilter,
    viewport: Viewport,
    policy: CapturePolicy,
    latest_frame: Option<Frame>,
    pending: Option<Uuid>,
    in_flight: Option<Uuid>,
    source_ended: bool,
    event_tx: Sender<PipelineEvent>,
    job_tx: Sender<ExtractJob>,
    status: Arc<RwLock<RuntimeStatus>>,
}

impl Worker {
    fn run(
        mut self,
        frame_rx: Receiver<FrameMsg>,
        cmd_rx: Receiver<EngineCommand>,
        done_rx: Receiver<Uuid>,
    ) {
        let mut frame_rx = frame_rx;
        loop {
            select! {
                recv(frame_rx) -> msg => match msg {
                    Ok(FrameMsg::Frame(frame)) => self.handle_frame(frame),
                    Ok(FrameMsg::Ended) | Err(_) => {
                        if !self.source_ended {
                            self.source_ended = true;
                            let _ = self.event_tx.send(PipelineEvent::SourceEnded);
                            // A registered request can no longer be served
                            // by a future delivery; use what we have.
                            if self.in_flight.is_none() {
                                if let Some(id) = self.pending.take() {
                                    self.serve_capture(id);
                                }
                            }
                        }
                        // Stop selecting on the dead channel.
                        frame_rx = never();
                    }
                },
                recv(done_rx) -> id => {
                    if let Ok(id) = id {
                        debug!("Capture {id} extraction finished");
                        self.in_flight = None;
                        if self.source_ended {
                            if let Some(next) = self.pending.take() {
                                self.serve_capture(next);
                            }
                        }
                    }
                },
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(EngineCommand::Capture { id }) => self.handle_capture(id),
                    Ok(EngineCommand::SetViewport(viewport)) => self.viewport = viewport,
                    Ok(EngineCommand::Shutdown) | Err(_) => break,
                },
            }
        }
        // Closing the job channel ends the extraction thread.
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.status.write().frames_seen += 1;

        let mut batch = Vec::new();
        for detector in &mut self.detectors {
            match detector.detect(&frame) {
                Ok(raw) => batch.extend(raw.into_iter().map(|d| d.canonical())),
                // Detector failures yield an empty contribution, never an
                // aborted frame.
                Err(e) => warn!("Detector {} failed: {e}", detector.name()),
            }
        }

        if let Some(published) = self.throttle.offer(batch, Instant::now()) {
            let transform =
                ViewTransform::new(frame.dimensions(), frame.orientation, self.viewport);
            let detections = published
                .into_iter()
                .map(|d| DisplayDetection {
                    quad: transform.map_quad(&d.quad),
                    kind: d.kind,
                    confidence: d.confidence,
                })
                .collect();
            let frames_seen = {
                let mut status = self.status.write();
                status.batches_published += 1;
                status.frames_seen
            };
            let _ = self.event_tx.send(PipelineEvent::Detections {
                detections,
                frames_seen,
            });
        }

        self.latest_frame = Some(frame);

        // A registered capture is served by this delivery, not a stored
        // older frame.
        if self.in_flight.is_none() {
            if let Some(id) = self.pending.take() {
                self.serve_capture(id);
            }
        }
    }

    fn handle_capture(&mut self, id: Uuid) {
        if self.latest_frame.is_none() {
            debug!("Capture {id} triggered before any frame was delivered");
            let _ = self.event_tx.send(PipelineEvent::CaptureFinished {
                id,
                outcome: CaptureOutcome::NoImage,
            });
            return;
        }

        let busy = self.pending.is_some() || self.in_flight.is_some();
        if busy {
            match self.policy {
                CapturePolicy::Reject => {
                    debug!("Capture {id} rejected: another capture is outstanding");
                    let _ = self.event_tx.send(PipelineEvent::CaptureFinished {
                        id,
                        outcome: CaptureOutcome::Rejected,
                    });
                }
                CapturePolicy::Replace => {
                    if let Some(old) = self.pending.replace(id) {
                        debug!("Capture {old} superseded by {id}");
                        let _ = self.event_tx.send(PipelineEvent::CaptureFinished {
                            id: old,
                            outcome: CaptureOutcome::Rejected,
                        });
                    }
                }
            }
            return;
        }

        if self.source_ended {
            // No further deliveries will come; serve from the stored frame.
            self.serve_capture(id);
        } else {
            self.pending = Some(id);
        }
    }

    fn serve_capture(&mut self, id: Uuid) {
        let Some(frame) = self.latest_frame.clone() else {
            let _ = self.event_tx.send(PipelineEvent::CaptureFinished {
                id,
                outcome: CaptureOutcome::NoImage,
            });
            return;
        };
        let quad = self.throttle.best().map(|d| d.quad);
        debug!(
            "Serving capture {id} from a {}x{} frame (quad: {})",
            frame.width,
            frame.height,
            if quad.is_some() { "yes" } else { "no" }
        );
        self.in_flight = Some(id);
        let _ = self.job_tx.send(ExtractJob { id, frame, quad });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SourceError, TestPatternSource};
    use crate::extract::{ExtractionResult, NullRecognizer, TextExtractor};
    use crate::geometry::{DetectorConvention, Orientation, Point};
    use crate::vision::{DetectionKind, RawDetection};

    /// Always reports the same document quad.
    struct FixedQuadDetector;

    impl Detector for FixedQuadDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
            Ok(vec![RawDetection {
                kind: DetectionKind::DocumentQuad,
                corners: [
                    Point::new(0.2, 0.2),
                    Point::new(0.8, 0.2),
                    Point::new(0.8, 0.8),
                    Point::new(0.2, 0.8),
                ],
                convention: DetectorConvention::top_left(),
                confidence: 0.9,
            }])
        }
    }

    struct SlowExtractor;

    impl Extractor for SlowExtractor {
        fn extract(&mut self, _image: &image::RgbaImage) -> ExtractionResult {
            std::thread::sleep(Duration::from_millis(300));
            ExtractionResult::empty()
        }
    }

    /// A source that ends before producing anything.
    struct EmptySource;

    impl FrameSource for EmptySource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            Ok(None)
        }

        fn describe(&self) -> String {
            "empty".to_string()
        }
    }

    fn fast_config(policy: CapturePolicy) -> EngineConfig {
        EngineConfig {
            capture: CaptureConfig {
                max_fps: 200,
                orientation: Orientation::UP,
            },
            capture_policy: policy,
            ..EngineConfig::default()
        }
    }

    fn recv_outcome(
        engine: &ScanEngine,
        id: Uuid,
        timeout: Duration,
    ) -> CaptureOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match engine.events().recv_timeout(remaining) {
                Ok(PipelineEvent::CaptureFinished { id: got, outcome }) if got == id => {
                    return outcome
                }
                Ok(_) => continue,
                Err(e) => panic!("no outcome for {id}: {e}"),
            }
        }
    }

    #[test]
    fn test_capture_before_any_frame_reports_no_image() {
        let engine = ScanEngine::start(
            fast_config(CapturePolicy::Reject),
            Box::new(EmptySource),
            vec![Box::new(FixedQuadDetector)],
            Box::new(TextExtractor::new(Box::new(NullRecognizer))),
        );
        let id = engine.trigger_capture();
        let outcome = recv_outcome(&engine, id, Duration::from_secs(2));
        assert!(matches!(outcome, CaptureOutcome::NoImage));
        engine.shutdown();
    }

    #[test]
    fn test_capture_completes_with_rectified_dimensions() {
        let engine = ScanEngine::start(
            fast_config(CapturePolicy::Reject),
            Box::new(TestPatternSource::new(320, 240, 100, Orientation::UP)),
            vec![Box::new(FixedQuadDetector)],
            Box::new(TextExtractor::new(Box::new(NullRecognizer))),
        );

        // Wait until the pipeline has seen at least one frame.
        loop {
            match engine.events().recv_timeout(Duration::from_secs(5)).unwrap() {
                PipelineEvent::Detections { detections, .. } => {
                    assert_eq!(detections.len(), 1);
                    break;
                }
                _ => continue,
            }
        }

        let id = engine.trigger_capture();
        match recv_outcome(&engine, id, Duration::from_secs(5)) {
            CaptureOutcome::Completed {
                result,
                width,
                height,
            } => {
                // The fixed quad covers 0.2..0.8 of a 320x240 frame.
                assert_eq!((width, height), (192, 144));
                assert!(result.is_empty());
            }
            other => panic!("expected completion, got {:?}", other),
        }
        engine.shutdown();
    }

    #[test]
    fn test_second_capture_is_rejected_while_busy() {
        let engine = ScanEngine::start(
            fast_config(CapturePolicy::Reject),
            Box::new(TestPatternSource::new(64, 64, 200, Orientation::UP)),
            vec![Box::new(FixedQuadDetector)],
            Box::new(SlowExtractor),
        );
        loop {
            if let PipelineEvent::Detections { .. } =
                engine.events().recv_timeout(Duration::from_secs(5)).unwrap()
            {
                break;
            }
        }

        let first = engine.trigger_capture();
        let second = engine.trigger_capture();

        let second_outcome = recv_outcome(&engine, second, Duration::from_secs(5));
        assert!(matches!(second_outcome, CaptureOutcome::Rejected));

        let first_outcome = recv_outcome(&engine, first, Duration::from_secs(5));
        assert!(matches!(first_outcome, CaptureOutcome::Completed { .. }));
        engine.shutdown();
    }

    #[test]
    fn test_replace_policy_supersedes_pending_capture() {
        // Slow frame pacing keeps both commands in the same gap between
        // deliveries, so the first request is still pending when the
        // second arrives.
        let mut config = fast_config(CapturePolicy::Replace);
        config.capture.max_fps = 5;
        let engine = ScanEngine::start(
            config,
            Box::new(TestPatternSource::new(64, 64, 50, Orientation::UP)),
            vec![Box::new(FixedQuadDetector)],
            Box::new(TextExtractor::new(Box::new(NullRecognizer))),
        );
        loop {
            if let PipelineEvent::Detections { .. } =
                engine.events().recv_timeout(Duration::from_secs(5)).unwrap()
            {
                break;
            }
        }

        let first = engine.trigger_capture();
        let second = engine.trigger_capture();

        let first_outcome = recv_outcome(&engine, first, Duration::from_secs(5));
        assert!(matches!(first_outcome, CaptureOutcome::Rejected));

        let second_outcome = recv_outcome(&engine, second, Duration::from_secs(5));
        assert!(matches!(second_outcome, CaptureOutcome::Completed { .. }));
        engine.shutdown();
    }

    #[test]
    fn test_source_end_is_reported_and_capture_still_served() {
        let engine = ScanEngine::start(
            fast_config(CapturePolicy::Reject),
            Box::new(TestPatternSource::new(64, 64, 2, Orientation::UP)),
            vec![Box::new(FixedQuadDetector)],
            Box::new(TextExtractor::new(Box::new(NullRecognizer))),
        );

        // Drain until the source ends.
        loop {
            match engine.events().recv_timeout(Duration::from_secs(5)).unwrap() {
                PipelineEvent::SourceEnded => break,
                _ => continue,
            }
        }

        // The stored latest frame still serves a late trigger.
        let id = engine.trigger_capture();
        let outcome = recv_outcome(&engine, id, Duration::from_secs(5));
        assert!(matches!(outcome, CaptureOutcome::Completed { .. }));
        engine.shutdown();
    }
}
