//! Detector-space to display-space mapping
//!
//! Maps canonical normalized coordinates onto the visible preview surface,
//! accounting for buffer rotation, mirroring, aspect-fill cropping, and
//! pixel density. The mapping is exactly invertible; [`ViewTransform::unmap_point`]
//! reverses [`ViewTransform::map_point`] within floating-point tolerance.

use serde::{Deserialize, Serialize};

use super::{orient_norm_point, unorient_norm_point, DisplayQuad, NormQuad, Orientation, Point};

/// The visible preview surface: size in layout points plus the pixel
/// density factor relating points to physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Surface width in layout points.
    pub width: f32,
    /// Surface height in layout points.
    pub height: f32,
    /// Physical pixels per layout point.
    pub scale_factor: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32, scale_factor: f32) -> Self {
        Self {
            width,
            height,
            scale_factor,
        }
    }

    fn pixel_size(&self) -> (f32, f32) {
        (
            self.width * self.scale_factor,
            self.height * self.scale_factor,
        )
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 390.0,
            height: 844.0,
            scale_factor: 1.0,
        }
    }
}

/// Mapping between canonical detector-normalized coordinates and display
/// points for one buffer size, orientation, and viewport.
///
/// The display surface is assumed to show the buffer aspect-filled: scaled
/// uniformly to cover the whole surface, overflow cropped equally on both
/// sides of the overflowing axis.
#[derive(Debug, Clone, Copy)]
pub struct ViewTransform {
    buffer_width: f32,
    buffer_height: f32,
    orientation: Orientation,
    viewport: Viewport,
}

impl ViewTransform {
    pub fn new(buffer_size: (u32, u32), orientation: Orientation, viewport: Viewport) -> Self {
        Self {
            buffer_width: buffer_size.0 as f32,
            buffer_height: buffer_size.1 as f32,
            orientation,
            viewport,
        }
    }

    /// Buffer dimensions as seen after rotation to upright.
    fn effective_buffer(&self) -> (f32, f32) {
        if self.orientation.rotation.swaps_axes() {
            (self.buffer_height, self.buffer_width)
        } else {
            (self.buffer_width, self.buffer_height)
        }
    }

    /// Aspect-fill geometry in physical pixels:
    /// (scaled_width, scaled_height, crop_x, crop_y).
    fn fill_geometry(&self) -> (f32, f32, f32, f32) {
        let (ew, eh) = self.effective_buffer();
        let (dw, dh) = self.viewport.pixel_size();
        let scale = (dw / ew).max(dh / eh);
        let scaled_w = ew * scale;
        let scaled_h = eh * scale;
        let crop_x = (scaled_w - dw) / 2.0;
        let crop_y = (scaled_h - dh) / 2.0;
        (scaled_w, scaled_h, crop_x, crop_y)
    }

    /// Map a canonical normalized point to display points.
    pub fn map_point(&self, p: Point) -> Point {
        let upright = orient_norm_point(p, self.orientation);
        let (scaled_w, scaled_h, crop_x, crop_y) = self.fill_geometry();
        let px = upright.x * scaled_w - crop_x;
        let py = upright.y * scaled_h - crop_y;
        Point::new(
            px / self.viewport.scale_factor,
            py / self.viewport.scale_factor,
        )
    }

    /// Inverse of [`map_point`](Self::map_point): display points back to
    /// canonical normalized coordinates.
    pub fn unmap_point(&self, p: Point) -> Point {
        let (scaled_w, scaled_h, crop_x, crop_y) = self.fill_geometry();
        let px = p.x * self.viewport.scale_factor;
        let py = p.y * self.viewport.scale_factor;
        let upright = Point::new((px + crop_x) / scaled_w, (py + crop_y) / scaled_h);
        unorient_norm_point(upright, self.orientation)
    }

    pub fn map_quad(&self, quad: &NormQuad) -> DisplayQuad {
        DisplayQuad::new(quad.corners.map(|p| self.map_point(p)))
    }
}
