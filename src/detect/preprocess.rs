//! Letterbox preprocessing into the planar float tensor the model expects.
//!
//! Two interchangeable implementations share the `Preprocessor` trait:
//! `ScalarPreprocessor` (plain per-pixel loop) and `SimdPreprocessor`
//! (fixed-width lanes the compiler lowers to vector instructions). Which one an
//! engine uses is decided once, at construction, by `select_preprocessor`.
//! Both produce bit-identical tensors.

use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use thiserror::Error;

use crate::detect::letterbox::{LetterboxParams, PAD_VALUE};
use crate::frame::{FrameError, ImageFrame};

const NORMALIZE: f32 = 1.0 / 255.0;
const LANES: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("tensor buffer length mismatch: expected {expected}, got {actual}")]
    OutputLength { expected: usize, actual: usize },

    #[error("preprocessing worker exited before finishing")]
    WorkerLost,
}

/// Turns one image into a `[3, height, width]` planar float tensor.
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Letterbox `frame` into `output` (exactly `3 * width * height` floats)
    /// and report the scale/offsets used.
    fn preprocess(
        &self,
        frame: &ImageFrame<'_>,
        width: u32,
        height: u32,
        output: &mut [f32],
    ) -> Result<LetterboxParams, PreprocessError>;
}

/// Pick the lane-based preprocessor when requested and the CPU has vector
/// units, the scalar one otherwise.
pub fn select_preprocessor(use_simd: bool) -> Box<dyn Preprocessor> {
    if use_simd && simd_supported() {
        log::debug!("Preprocessor: using SIMD lane conversion");
        Box::new(SimdPreprocessor)
    } else {
        if use_simd {
            log::info!("Preprocessor: SIMD requested but unsupported, using scalar path");
        }
        Box::new(ScalarPreprocessor)
    }
}

#[cfg(target_arch = "x86_64")]
pub fn simd_supported() -> bool {
    std::arch::is_x86_feature_detected!("sse4.1")
}

#[cfg(target_arch = "aarch64")]
pub fn simd_supported() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn simd_supported() -> bool {
    false
}

/// Resize preserving aspect ratio and pad to `width x height` with mid-gray.
pub(crate) fn letterbox_canvas(
    frame: &ImageFrame<'_>,
    width: u32,
    height: u32,
) -> Result<(RgbImage, LetterboxParams), PreprocessError> {
    frame.validate()?;
    let view = frame
        .as_rgb_view()
        .ok_or(PreprocessError::Frame(FrameError::Length {
            expected: frame.width as usize * frame.height as usize * 3,
            actual: frame.pixels().len(),
        }))?;
    let params = LetterboxParams::compute(frame.width, frame.height, width, height);

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([PAD_VALUE; 3]));
    if params.resized_width == frame.width && params.resized_height == frame.height {
        imageops::replace(
            &mut canvas,
            &view,
            params.x_offset as i64,
            params.y_offset as i64,
        );
    } else {
        let resized = imageops::resize(
            &view,
            params.resized_width,
            params.resized_height,
            FilterType::Triangle,
        );
        imageops::replace(
            &mut canvas,
            &resized,
            params.x_offset as i64,
            params.y_offset as i64,
        );
    }
    Ok((canvas, params))
}

fn check_output_len(output: &[f32], width: u32, height: u32) -> Result<usize, PreprocessError> {
    let plane = width as usize * height as usize;
    if output.len() != plane * 3 {
        return Err(PreprocessError::OutputLength {
            expected: plane * 3,
            actual: output.len(),
        });
    }
    Ok(plane)
}

// ----------------------------------------------------------------------------
// Scalar implementation
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
pub struct ScalarPreprocessor;

impl Preprocessor for ScalarPreprocessor {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn preprocess(
        &self,
        frame: &ImageFrame<'_>,
        width: u32,
        height: u32,
        output: &mut [f32],
    ) -> Result<LetterboxParams, PreprocessError> {
        let plane = check_output_len(output, width, height)?;
        let (canvas, params) = letterbox_canvas(frame, width, height)?;
        let src = canvas.as_raw();
        let w = width as usize;

        for c in 0..3 {
            for y in 0..height as usize {
                for x in 0..w {
                    let src_idx = (y * w + x) * 3 + c;
                    let dst_idx = c * plane + y * w + x;
                    output[dst_idx] = src[src_idx] as f32 * NORMALIZE;
                }
            }
        }
        Ok(params)
    }
}

// ----------------------------------------------------------------------------
// Lane-based implementation
// ----------------------------------------------------------------------------

/// Deinterleaves `LANES` pixels at a time into fixed arrays before scaling and
/// storing, so the inner loops vectorize.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimdPreprocessor;

impl Preprocessor for SimdPreprocessor {
    fn name(&self) -> &'static str {
        "simd"
    }

    fn preprocess(
        &self,
        frame: &ImageFrame<'_>,
        width: u32,
        height: u32,
        output: &mut [f32],
    ) -> Result<LetterboxParams, PreprocessError> {
        let plane = check_output_len(output, width, height)?;
        let (canvas, params) = letterbox_canvas(frame, width, height)?;
        let (p0, rest) = output.split_at_mut(plane);
        let (p1, p2) = rest.split_at_mut(plane);

        let mut chunks = canvas.as_raw().chunks_exact(3 * LANES);
        let mut base = 0;
        for chunk in &mut chunks {
            let mut c0 = [0f32; LANES];
            let mut c1 = [0f32; LANES];
            let mut c2 = [0f32; LANES];
            for lane in 0..LANES {
                c0[lane] = chunk[lane * 3] as f32;
                c1[lane] = chunk[lane * 3 + 1] as f32;
                c2[lane] = chunk[lane * 3 + 2] as f32;
            }
            for lane in 0..LANES {
                c0[lane] *= NORMALIZE;
                c1[lane] *= NORMALIZE;
                c2[lane] *= NORMALIZE;
            }
            p0[base..base + LANES].copy_from_slice(&c0);
            p1[base..base + LANES].copy_from_slice(&c1);
            p2[base..base + LANES].copy_from_slice(&c2);
            base += LANES;
        }
        for (i, px) in chunks.remainder().chunks_exact(3).enumerate() {
            p0[base + i] = px[0] as f32 * NORMALIZE;
            p1[base + i] = px[1] as f32 * NORMALIZE;
            p2[base + i] = px[2] as f32 * NORMALIZE;
        }
        Ok(params)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn implementations_agree() {
        let image = gradient(123, 77);
        let frame = ImageFrame::from(&image);
        let mut scalar = vec![0f32; 3 * 64 * 64];
        let mut simd = vec![0f32; 3 * 64 * 64];

        let a = ScalarPreprocessor
            .preprocess(&frame, 64, 64, &mut scalar)
            .unwrap();
        let b = SimdPreprocessor.preprocess(&frame, 64, 64, &mut simd).unwrap();

        assert_eq!(a, b);
        assert_eq!(scalar, simd);
    }

    #[test]
    fn padding_is_mid_gray() {
        let image = RgbImage::from_pixel(64, 32, Rgb([255, 255, 255]));
        let frame = ImageFrame::from(&image);
        let mut out = vec![0f32; 3 * 64 * 64];
        let params = ScalarPreprocessor.preprocess(&frame, 64, 64, &mut out).unwrap();

        assert_eq!(params.y_offset, 16);
        let pad = PAD_VALUE as f32 * NORMALIZE;
        // Top-left corner is padding, the center is image.
        assert_eq!(out[0], pad);
        assert_eq!(out[32 * 64 + 32], 255.0 * NORMALIZE);
        // Same in the last plane.
        assert_eq!(out[2 * 64 * 64], pad);
    }

    #[test]
    fn unscaled_frame_is_copied_verbatim() {
        let image = gradient(32, 32);
        let frame = ImageFrame::from(&image);
        let mut out = vec![0f32; 3 * 32 * 32];
        let params = SimdPreprocessor.preprocess(&frame, 32, 32, &mut out).unwrap();

        assert_eq!(params.scale, 1.0);
        let px = image.get_pixel(5, 9);
        assert_eq!(out[9 * 32 + 5], px[0] as f32 * NORMALIZE);
        assert_eq!(out[32 * 32 + 9 * 32 + 5], px[1] as f32 * NORMALIZE);
    }

    #[test]
    fn wrong_output_length_is_rejected() {
        let image = gradient(16, 16);
        let frame = ImageFrame::from(&image);
        let mut out = vec![0f32; 10];
        let err = ScalarPreprocessor
            .preprocess(&frame, 16, 16, &mut out)
            .unwrap_err();
        assert_eq!(
            err,
            PreprocessError::OutputLength {
                expected: 768,
                actual: 10
            }
        );
    }

    #[test]
    fn four_channel_frame_is_rejected() {
        let pixels = vec![0u8; 16 * 16 * 4];
        let frame = ImageFrame::new(&pixels, 16, 16, 4);
        let mut out = vec![0f32; 3 * 16 * 16];
        assert!(matches!(
            SimdPreprocessor.preprocess(&frame, 16, 16, &mut out),
            Err(PreprocessError::Frame(FrameError::Channels(4)))
        ));
    }
}
