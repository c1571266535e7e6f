//! Image views handed to the detection engine.
//!
//! - `ImageFrame`: borrowed interleaved raster (width, height, channel count).
//! - `FrameError`: why a raster was rejected before preprocessing.
//!
//! The detection engine never reads image files. Callers decode into memory and
//! pass an `ImageFrame`; only 3-channel rasters are accepted. Channel order is
//! passed through unchanged into the planar tensor, so a model trained on BGR
//! input should be handed BGR frames.

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

/// Channel count the detection engine accepts.
pub const COLOR_CHANNELS: u8 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("input image is empty ({width}x{height}, {len} bytes)")]
    Empty { width: u32, height: u32, len: usize },

    #[error("input image must have 3 channels, got {0}")]
    Channels(u8),

    #[error("pixel buffer length mismatch: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },
}

// ----------------------------------------------------------------------------
// ImageFrame: borrowed interleaved raster
// ----------------------------------------------------------------------------

/// Borrowed interleaved raster. The engine reads it, never retains it.
#[derive(Clone, Copy, Debug)]
pub struct ImageFrame<'a> {
    pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl<'a> ImageFrame<'a> {
    pub fn new(pixels: &'a [u8], width: u32, height: u32, channels: u8) -> Self {
        Self {
            pixels,
            width,
            height,
            channels,
        }
    }

    /// View an RGB image buffer.
    pub fn from_rgb(image: &'a RgbImage) -> Self {
        Self::new(image.as_raw(), image.width(), image.height(), COLOR_CHANNELS)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    /// Check the frame can be letterboxed: non-empty, 3 channels, and a buffer
    /// exactly `width * height * 3` bytes long.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.is_empty() {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
                len: self.pixels.len(),
            });
        }
        if self.channels != COLOR_CHANNELS {
            return Err(FrameError::Channels(self.channels));
        }
        let expected = (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(COLOR_CHANNELS as usize);
        if self.pixels.len() != expected {
            return Err(FrameError::Length {
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    /// Zero-copy `image` view over the pixels. `None` unless `validate` passes.
    pub(crate) fn as_rgb_view(&self) -> Option<ImageBuffer<Rgb<u8>, &'a [u8]>> {
        self.validate().ok()?;
        ImageBuffer::from_raw(self.width, self.height, self.pixels)
    }
}

impl<'a> From<&'a RgbImage> for ImageFrame<'a> {
    fn from(image: &'a RgbImage) -> Self {
        Self::from_rgb(image)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_is_rejected() {
        let frame = ImageFrame::new(&[], 0, 0, 3);
        assert!(matches!(frame.validate(), Err(FrameError::Empty { .. })));
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let pixels = vec![0u8; 4 * 4 * 4];
        let frame = ImageFrame::new(&pixels, 4, 4, 4);
        assert_eq!(frame.validate(), Err(FrameError::Channels(4)));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let pixels = vec![0u8; 10];
        let frame = ImageFrame::new(&pixels, 4, 4, 3);
        assert_eq!(
            frame.validate(),
            Err(FrameError::Length {
                expected: 48,
                actual: 10
            })
        );
    }

    #[test]
    fn rgb_image_view_is_valid() {
        let image = RgbImage::new(8, 6);
        let frame = ImageFrame::from(&image);
        assert!(frame.validate().is_ok());
        assert_eq!(frame.as_rgb_view().map(|v| v.dimensions()), Some((8, 6)));
    }
}
