//! Frame Source Layer
//!
//! Push-style frame delivery starts here: the engine drains a
//! [`FrameSource`] on a dedicated thread and republishes owned frames over
//! a channel, preserving delivery order. Camera drivers live behind this
//! trait; the built-in sources replay image folders or synthesize test
//! frames.

pub mod frame;

use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::geometry::Orientation;
use frame::Frame;

/// Frame delivery configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Maximum frames per second delivered to the pipeline.
    pub max_fps: u32,
    /// Orientation tag attached to delivered frames.
    pub orientation: Orientation,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_fps: 30,
            orientation: Orientation::UP,
        }
    }
}

/// Errors produced while reading frames from a source.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("failed to read frame input: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("no readable images in {0}")]
    EmptyFolder(PathBuf),
}

/// A supplier of camera-style frames.
///
/// `next_frame` is pulled from the engine's source thread; returning
/// `Ok(None)` ends the session. Every returned frame owns its buffer.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Replays a folder of image files in name order, one file per frame.
pub struct FolderSource {
    paths: Vec<PathBuf>,
    next: usize,
    orientation: Orientation,
}

impl FolderSource {
    pub fn new(dir: &Path, orientation: Orientation) -> Result<Self, SourceError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("png") | Some("jpg") | Some("jpeg") | Some("bmp")
                )
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(SourceError::EmptyFolder(dir.to_path_buf()));
        }

        debug!("Folder source ready: {} images in {:?}", paths.len(), dir);
        Ok(Self {
            paths,
            next: 0,
            orientation,
        })
    }
}

impl FrameSource for FolderSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        while self.next < self.paths.len() {
            let path = self.paths[self.next].clone();
            self.next += 1;
            match image::open(&path) {
                Ok(img) => {
                    return Ok(Some(Frame::from_image(img.to_rgba8(), self.orientation)));
                }
                Err(source) => {
                    // A single bad file should not end the session.
                    warn!("Skipping {:?}: {}", path, source);
                }
            }
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("folder ({} images)", self.paths.len())
    }
}

/// Synthesizes frames containing a dark document-shaped rectangle on a
/// light background, so the full pipeline can run without assets.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    remaining: u32,
    orientation: Orientation,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, count: u32, orientation: Orientation) -> Self {
        Self {
            width,
            height,
            remaining: count,
            orientation,
        }
    }

    fn render(&self) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(self.width, self.height, Rgba([235, 235, 235, 255]));
        // Document occupies the middle 60% of each axis.
        let x = (self.width as f32 * 0.2) as i32;
        let y = (self.height as f32 * 0.2) as i32;
        let w = (self.width as f32 * 0.6) as u32;
        let h = (self.height as f32 * 0.6) as u32;
        draw_filled_rect_mut(
            &mut img,
            Rect::at(x, y).of_size(w.max(1), h.max(1)),
            Rgba([40, 40, 40, 255]),
        );
        img
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(Frame::from_image(self.render(), self.orientation)))
    }

    fn describe(&self) -> String {
        format!("test pattern {}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_source_yields_count_then_none() {
        let mut source = TestPatternSource::new(64, 48, 3, Orientation::UP);
        for _ in 0..3 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.dimensions(), (64, 48));
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_pattern_contains_dark_document() {
        let mut source = TestPatternSource::new(100, 100, 1, Orientation::UP);
        let frame = source.next_frame().unwrap().unwrap();
        let img = frame.to_rgba_image().unwrap();
        // Center is document-dark, corner is background-light.
        assert!(img.get_pixel(50, 50).0[0] < 100);
        assert!(img.get_pixel(2, 2).0[0] > 200);
    }

    #[test]
    fn test_folder_source_reads_images_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("a.png", 10u8), ("b.png", 200u8)] {
            let img = RgbaImage::from_pixel(8, 8, Rgba([shade, shade, shade, 255]));
            img.save(dir.path().join(name)).unwrap();
        }
        // A non-image file is ignored.
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut source = FolderSource::new(dir.path(), Orientation::UP).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.to_rgba_image().unwrap().get_pixel(0, 0).0[0], 10);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.to_rgba_image().unwrap().get_pixel(0, 0).0[0], 200);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FolderSource::new(dir.path(), Orientation::UP).is_err());
    }
}
