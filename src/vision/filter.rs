//! Detection throttling and filtering
//!
//! Raw batches arrive at sensor frame rate; overlay consumers want a
//! bounded update rate and only credible candidates. The filter keeps the
//! retained-best state fresh on every frame and gates publication to one
//! batch per interval.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::Detection;

/// What to publish when a frame produces no accepted detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyFramePolicy {
    /// Drop the retained batch; publish empty.
    Clear,
    /// Keep publishing the last accepted batch until it ages out, to avoid
    /// overlay flicker between detections.
    #[default]
    HoldLast,
}

/// Filtering and throttling parameters.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Minimum detector confidence to accept.
    pub min_confidence: f32,
    /// Minimum quad area as a fraction of the frame.
    pub min_relative_area: f32,
    /// How many detections to keep per batch, largest first.
    pub top_k: usize,
    /// Minimum time between published batches.
    pub interval: Duration,
    /// Behavior when a frame yields nothing.
    pub empty_frames: EmptyFramePolicy,
    /// Maximum age of a held batch under [`EmptyFramePolicy::HoldLast`].
    pub max_hold: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            min_relative_area: 0.01,
            top_k: 1,
            interval: Duration::from_millis(150),
            empty_frames: EmptyFramePolicy::HoldLast,
            max_hold: Duration::from_millis(500),
        }
    }
}

/// Stateful throttle/filter. Fed once per processed frame from the worker
/// thread; publication of the returned batch to the display side is the
/// caller's job.
pub struct ThrottleFilter {
    config: FilterConfig,
    last_publish: Option<Instant>,
    retained: Vec<Detection>,
    retained_at: Option<Instant>,
}

impl ThrottleFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            last_publish: None,
            retained: Vec::new(),
            retained_at: None,
        }
    }

    /// Feed one raw batch. Updates the retained-best state on every call;
    /// returns `Some(batch)` at most once per configured interval.
    pub fn offer(&mut self, batch: Vec<Detection>, now: Instant) -> Option<Vec<Detection>> {
        let accepted = self.apply_filters(batch);

        if accepted.is_empty() {
            match self.config.empty_frames {
                EmptyFramePolicy::Clear => {
                    self.retained.clear();
                    self.retained_at = None;
                }
                EmptyFramePolicy::HoldLast => {
                    let expired = self
                        .retained_at
                        .is_some_and(|at| now.duration_since(at) > self.config.max_hold);
                    if expired {
                        self.retained.clear();
                        self.retained_at = None;
                    }
                }
            }
        } else {
            self.retained = accepted;
            self.retained_at = Some(now);
        }

        let due = self
            .last_publish
            .is_none_or(|t| now.duration_since(t) >= self.config.interval);
        if due {
            self.last_publish = Some(now);
            Some(self.retained.clone())
        } else {
            None
        }
    }

    /// The best currently retained detection (largest accepted), if any.
    /// This is what a capture uses as its rectification quad.
    pub fn best(&self) -> Option<&Detection> {
        self.retained.first()
    }

    fn apply_filters(&self, batch: Vec<Detection>) -> Vec<Detection> {
        let mut kept: Vec<Detection> = batch
            .into_iter()
            .filter(|d| d.confidence >= self.config.min_confidence)
            .filter(|d| d.relative_area() >= self.config.min_relative_area)
            .filter(|d| d.quad.in_unit_range(0.0))
            .collect();
        kept.sort_by(|a, b| b.relative_area().total_cmp(&a.relative_area()));
        kept.truncate(self.config.top_k);
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormQuad;
    use crate::vision::DetectionKind;

    fn detection(x: f32, y: f32, size: f32, confidence: f32) -> Detection {
        Detection {
            kind: DetectionKind::DocumentQuad,
            quad: NormQuad::from_bounds(x, y, size, size),
            confidence,
        }
    }

    fn config(interval_ms: u64, policy: EmptyFramePolicy) -> FilterConfig {
        FilterConfig {
            interval: Duration::from_millis(interval_ms),
            empty_frames: policy,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn test_throttle_publishes_once_per_interval() {
        let mut filter = ThrottleFilter::new(config(100, EmptyFramePolicy::Clear));
        let now = Instant::now();
        let published: usize = (0..10)
            .map(|_| filter.offer(vec![detection(0.2, 0.2, 0.5, 0.9)], now))
            .filter(Option::is_some)
            .count();
        assert_eq!(published, 1);

        // The next interval boundary opens the gate again.
        let later = now + Duration::from_millis(100);
        assert!(filter.offer(vec![detection(0.2, 0.2, 0.5, 0.9)], later).is_some());
    }

    #[test]
    fn test_low_confidence_and_small_detections_are_dropped() {
        let mut filter = ThrottleFilter::new(config(0, EmptyFramePolicy::Clear));
        let now = Instant::now();
        let published = filter
            .offer(
                vec![
                    detection(0.1, 0.1, 0.5, 0.3),  // confidence too low
                    detection(0.1, 0.1, 0.05, 0.9), // area 0.0025 too small
                ],
                now,
            )
            .unwrap();
        assert!(published.is_empty());
    }

    #[test]
    fn test_top_k_keeps_largest() {
        let mut filter = ThrottleFilter::new(config(0, EmptyFramePolicy::Clear));
        let published = filter
            .offer(
                vec![
                    detection(0.1, 0.1, 0.2, 0.9),
                    detection(0.3, 0.3, 0.6, 0.9),
                    detection(0.5, 0.5, 0.3, 0.9),
                ],
                Instant::now(),
            )
            .unwrap();
        assert_eq!(published.len(), 1);
        assert!((published[0].relative_area() - 0.36).abs() < 1e-4);
    }

    #[test]
    fn test_out_of_range_quad_is_dropped() {
        let mut filter = ThrottleFilter::new(config(0, EmptyFramePolicy::Clear));
        let published = filter
            .offer(vec![detection(0.8, 0.8, 0.5, 0.9)], Instant::now())
            .unwrap();
        assert!(published.is_empty());
    }

    #[test]
    fn test_clear_policy_publishes_empty_on_miss() {
        let mut filter = ThrottleFilter::new(config(0, EmptyFramePolicy::Clear));
        let now = Instant::now();
        assert_eq!(filter.offer(vec![detection(0.2, 0.2, 0.5, 0.9)], now).unwrap().len(), 1);
        let published = filter.offer(vec![], now).unwrap();
        assert!(published.is_empty());
        assert!(filter.best().is_none());
    }

    #[test]
    fn test_hold_last_republishes_until_expiry() {
        let mut filter = ThrottleFilter::new(config(0, EmptyFramePolicy::HoldLast));
        let now = Instant::now();
        filter.offer(vec![detection(0.2, 0.2, 0.5, 0.9)], now);

        // Within the hold window the stale batch is republished.
        let held = filter.offer(vec![], now + Duration::from_millis(200)).unwrap();
        assert_eq!(held.len(), 1);

        // Past max_hold (500ms default) it is dropped.
        let expired = filter.offer(vec![], now + Duration::from_millis(700)).unwrap();
        assert!(expired.is_empty());
        assert!(filter.best().is_none());
    }
}
