//! Frame data structures for captured camera content

use std::time::Instant;

use image::RgbaImage;

use crate::geometry::Orientation;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel.
    #[default]
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// A frame delivered by a frame source.
///
/// The frame owns its byte buffer: sources hand out copies, never views
/// into driver-owned memory, so a frame stays valid after the delivery
/// callback returns and can cross threads freely.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per row; may exceed `width * bytes_per_pixel` for padded buffers.
    pub stride: u32,
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Rotation/mirror needed to read the content "up".
    pub orientation: Orientation,
    /// Timestamp when the frame was produced.
    pub timestamp: Instant,
}

impl Frame {
    /// Create a frame with a tightly packed buffer.
    pub fn new(data: Vec<u8>, width: u32, height: u32, orientation: Orientation) -> Self {
        let format = PixelFormat::Rgba8;
        Self {
            data,
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            format,
            orientation,
            timestamp: Instant::now(),
        }
    }

    /// Create a frame with an explicit row stride.
    pub fn with_stride(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
        orientation: Orientation,
    ) -> Self {
        Self {
            data,
            width,
            height,
            stride,
            format: PixelFormat::Rgba8,
            orientation,
            timestamp: Instant::now(),
        }
    }

    pub fn from_image(image: RgbaImage, orientation: Orientation) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, orientation)
    }

    /// Get frame dimensions as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy the buffer into a tightly packed [`RgbaImage`], dropping any
    /// row padding. Returns `None` if the buffer is shorter than the
    /// declared geometry.
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = (self.width * bpp) as usize;
        let stride = self.stride as usize;
        if stride < row_bytes || self.data.len() < stride * self.height as usize {
            return None;
        }
        if stride == row_bytes {
            return RgbaImage::from_raw(self.width, self.height, self.data.clone());
        }
        let mut packed = Vec::with_capacity(row_bytes * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * stride;
            packed.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        RgbaImage::from_raw(self.width, self.height, packed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tight_frame_round_trip() {
        let img = RgbaImage::from_fn(4, 3, |x, y| image::Rgba([x as u8, y as u8, 0, 255]));
        let frame = Frame::from_image(img.clone(), Orientation::UP);
        assert_eq!(frame.dimensions(), (4, 3));
        assert_eq!(frame.to_rgba_image().unwrap(), img);
    }

    #[test]
    fn test_padded_stride_is_stripped() {
        // 2x2 image, 8 bytes of pixels per row plus 4 bytes of padding.
        let mut data = Vec::new();
        for row in 0..2u8 {
            for col in 0..2u8 {
                data.extend_from_slice(&[row, col, 0, 255]);
            }
            data.extend_from_slice(&[0xAA; 4]);
        }
        let frame = Frame::with_stride(data, 2, 2, 12, Orientation::UP);
        let img = frame.to_rgba_image().unwrap();
        assert_eq!(img.get_pixel(1, 1).0, [1, 1, 0, 255]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let frame = Frame::new(vec![0u8; 8], 4, 4, Orientation::UP);
        assert!(frame.to_rgba_image().is_none());
    }
}
