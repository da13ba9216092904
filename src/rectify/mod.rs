//! Perspective rectification
//!
//! Turns a detected quadrilateral region of a captured frame into a
//! top-down image. The orientation tag is baked into the pixel layout
//! first, the quad is mapped into that upright pixel space, then a
//! projective transform warps it to an axis-aligned rectangle.
//!
//! Rectification never fails a capture: with no quad, a degenerate quad,
//! or a transform that cannot be estimated, the unmodified upright image
//! is returned.

use image::{imageops, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::{corners_degenerate, NormQuad, Orientation, Point, Rotation};

/// Known physical document shapes; fixes the output aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Output dimensions follow the detected quad's bounding box.
    #[default]
    Free,
    /// ID-1 card, 85.6 x 54.0 mm.
    Id1,
    /// TD3 passport data page, 125.0 x 88.0 mm.
    Td3,
}

impl DocumentFormat {
    fn aspect(&self) -> Option<f32> {
        match self {
            DocumentFormat::Free => None,
            DocumentFormat::Id1 => Some(85.6 / 54.0),
            DocumentFormat::Td3 => Some(125.0 / 88.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RectifyConfig {
    pub format: DocumentFormat,
    /// Minimum quad area as a fraction of the upright image.
    pub min_area_fraction: f32,
}

impl Default for RectifyConfig {
    fn default() -> Self {
        Self {
            format: DocumentFormat::Free,
            min_area_fraction: 1e-4,
        }
    }
}

pub struct Rectifier {
    config: RectifyConfig,
}

impl Rectifier {
    pub fn new(config: RectifyConfig) -> Self {
        Self { config }
    }

    /// Bake an orientation tag into actual pixel layout: rotate to upright,
    /// then undo any mirror.
    pub fn upright(image: &RgbaImage, orientation: Orientation) -> RgbaImage {
        let rotated = match orientation.rotation {
            Rotation::Deg0 => image.clone(),
            Rotation::Deg90 => imageops::rotate90(image),
            Rotation::Deg180 => imageops::rotate180(image),
            Rotation::Deg270 => imageops::rotate270(image),
        };
        if orientation.mirrored {
            imageops::flip_horizontal(&rotated)
        } else {
            rotated
        }
    }

    /// Rectify `image` using `quad` (canonical normalized coordinates in
    /// raw buffer space). No quad means identity: the upright image is
    /// returned as-is.
    pub fn rectify(
        &self,
        image: &RgbaImage,
        orientation: Orientation,
        quad: Option<&NormQuad>,
    ) -> RgbaImage {
        let upright = Self::upright(image, orientation);
        let Some(quad) = quad else {
            return upright;
        };
        match self.warp_quad(&upright, quad, orientation) {
            Some(warped) => warped,
            None => {
                warn!("Rectification not possible for this quad; using unwarped image");
                upright
            }
        }
    }

    fn warp_quad(
        &self,
        upright: &RgbaImage,
        quad: &NormQuad,
        orientation: Orientation,
    ) -> Option<RgbaImage> {
        let (w, h) = upright.dimensions();
        let (wf, hf) = (w as f32, h as f32);

        // The quad was detected on the raw buffer; rotate its coordinates
        // the same way the pixels were rotated, then scale to pixels.
        // Clamping only catches rounding spill; detection already rejects
        // out-of-range quads.
        let corners = quad.oriented(orientation).corners.map(|p| {
            Point::new((p.x * wf).clamp(0.0, wf), (p.y * hf).clamp(0.0, hf))
        });

        let min_area = wf * hf * self.config.min_area_fraction;
        if corners_degenerate(&corners, min_area) {
            debug!("Degenerate quad, skipping warp");
            return None;
        }

        let min_x = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
        let min_y = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
        let max_y = corners.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
        let bbox_w = max_x - min_x;
        let bbox_h = max_y - min_y;

        let (out_w, out_h) = match self.config.format.aspect() {
            None => (bbox_w.round().max(1.0), bbox_h.round().max(1.0)),
            Some(aspect) => {
                let out_w = bbox_w.round().max(1.0);
                (out_w, (out_w / aspect).round().max(1.0))
            }
        };

        let src = [
            (corners[0].x, corners[0].y),
            (corners[1].x, corners[1].y),
            (corners[2].x, corners[2].y),
            (corners[3].x, corners[3].y),
        ];
        let dest = [(0.0, 0.0), (out_w, 0.0), (out_w, out_h), (0.0, out_h)];

        let projection = Projection::from_control_points(src, dest)?;

        let mut output = RgbaImage::new(out_w as u32, out_h as u32);
        warp_into(
            upright,
            &projection,
            Interpolation::Bilinear,
            Rgba([255u8, 255, 255, 255]),
            &mut output,
        );
        debug!("Rectified quad to {}x{}", out_w, out_h);
        Some(output)
    }
}
