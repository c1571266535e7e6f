use std::borrow::Cow;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Raw layouts a camera can deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    /// Y plane followed by interleaved UV at half resolution, rounded up.
    Nv12,
    /// Y plane, then U plane, then V plane, chroma at half resolution
    /// rounded up.
    Yuv420,
}

impl PixelFormat {
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Yuv420 => *b"YU12",
        }
    }

    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"NV12" => Some(PixelFormat::Nv12),
            b"YU12" => Some(PixelFormat::Yuv420),
            _ => None,
        }
    }

    /// Byte length of one `width x height` frame.
    pub fn frame_len(&self, width: u32, height: u32) -> Option<usize> {
        let plane = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Rgb24 => plane.checked_mul(3),
            PixelFormat::Nv12 | PixelFormat::Yuv420 => {
                let (chroma_w, chroma_h) = chroma_dims(width, height);
                plane.checked_add(chroma_w.checked_mul(chroma_h)?.checked_mul(2)?)
            }
        }
    }
}

/// Chroma plane dimensions for 4:2:0 layouts. Odd sizes round up.
fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
    ((width as usize).div_ceil(2), (height as usize).div_ceil(2))
}

fn check_len(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<usize> {
    let expected = format
        .frame_len(width, height)
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    Ok(width as usize * height as usize)
}

/// Interleaved RGB copy of a raw frame.
pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let y_plane = check_len(pixels, width, height, format)?;
    let w = width as usize;
    let (chroma_w, chroma_h) = chroma_dims(width, height);
    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Nv12 => Ok(yuv_to_rgb(pixels, w, height as usize, |j, i| {
            let uv = y_plane + ((j / 2) * chroma_w + i / 2) * 2;
            (pixels[uv], pixels[uv + 1])
        })),
        PixelFormat::Yuv420 => {
            let u_plane = y_plane;
            let v_plane = y_plane + chroma_w * chroma_h;
            Ok(yuv_to_rgb(pixels, w, height as usize, |j, i| {
                let idx = (j / 2) * chroma_w + i / 2;
                (pixels[u_plane + idx], pixels[v_plane + idx])
            }))
        }
    }
}

/// Luma plane of a raw frame. Borrowed for YUV layouts, computed for RGB.
pub fn luma(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Cow<'_, [u8]>> {
    let y_plane = check_len(pixels, width, height, format)?;
    match format {
        PixelFormat::Nv12 | PixelFormat::Yuv420 => Ok(Cow::Borrowed(&pixels[..y_plane])),
        PixelFormat::Rgb24 => Ok(Cow::Owned(
            pixels
                .chunks_exact(3)
                .map(|px| {
                    clamp_to_u8(0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
                })
                .collect(),
        )),
    }
}

fn yuv_to_rgb(
    pixels: &[u8],
    w: usize,
    h: usize,
    chroma: impl Fn(usize, usize) -> (u8, u8),
) -> Vec<u8> {
    let mut rgb = vec![0u8; w * h * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let (u, v) = chroma(j, i);
            let u = u as f32 - 128.0;
            let v = v as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
