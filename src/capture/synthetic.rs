use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{CameraDevice, CameraMessage, CapturedFrame, CompletedRequest, PixelFormat};

const BACKGROUND_LUMA: u8 = 40;
const BALL_LUMA: u8 = 235;

/// Knobs for the `stub://` camera.
#[derive(Clone, Debug)]
pub struct SyntheticCameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// A ball rolls into view starting at this frame; `None` keeps the scene
    /// static forever.
    pub ball_after: Option<u64>,
    /// Frame numbers before which one device timeout is reported.
    pub timeouts_before: BTreeSet<u64>,
    /// Report `Quit` instead of this frame.
    pub quit_at: Option<u64>,
    /// Peak amplitude of per-pixel luma noise.
    pub noise: u8,
    pub seed: u64,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 320,
            height: 240,
            ball_after: Some(30),
            timeouts_before: BTreeSet::new(),
            quit_at: None,
            noise: 3,
            seed: 7,
        }
    }
}

/// Call counts, for checking how the capture loop drove the camera.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyntheticCameraStats {
    pub opens: u32,
    pub starts: u32,
    pub stops: u32,
    pub waits: u64,
    pub frames: u64,
    pub timeouts: u32,
}

/// NV12 test camera: a noisy dark background, optionally with a bright ball
/// rolling across it.
pub struct SyntheticCamera {
    config: SyntheticCameraConfig,
    rng: StdRng,
    opened: bool,
    configured: bool,
    streaming: bool,
    sequence: u64,
    stats: SyntheticCameraStats,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            opened: false,
            configured: false,
            streaming: false,
            sequence: 0,
            stats: SyntheticCameraStats::default(),
        }
    }

    pub fn stats(&self) -> SyntheticCameraStats {
        self.stats
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn render(&mut self, sequence: u64) -> CapturedFrame {
        let w = self.config.width as usize;
        let h = self.config.height as usize;
        let noise = self.config.noise as i16;
        let len = PixelFormat::Nv12
            .frame_len(self.config.width, self.config.height)
            .unwrap_or(w * h);
        let mut data = Vec::with_capacity(len);
        for _ in 0..w * h {
            let jitter = if noise > 0 {
                self.rng.gen_range(-noise..=noise)
            } else {
                0
            };
            data.push((BACKGROUND_LUMA as i16 + jitter).clamp(0, 255) as u8);
        }
        data.resize(len, 128);

        if let Some(start) = self.config.ball_after {
            if sequence >= start {
                let radius = (w.min(h) / 10).max(2);
                let travelled = (sequence - start) as usize * radius;
                let cx = radius + travelled % w.max(1);
                let cy = h / 2;
                draw_disc(&mut data[..w * h], w, h, cx, cy, radius);
            }
        }

        CapturedFrame {
            data,
            width: self.config.width,
            height: self.config.height,
            format: PixelFormat::Nv12,
        }
    }
}

fn draw_disc(plane: &mut [u8], w: usize, h: usize, cx: usize, cy: usize, radius: usize) {
    let r2 = (radius * radius) as i64;
    for y in cy.saturating_sub(radius)..(cy + radius + 1).min(h) {
        for x in cx.saturating_sub(radius)..(cx + radius + 1).min(w) {
            let dx = x as i64 - cx as i64;
            let dy = y as i64 - cy as i64;
            if dx * dx + dy * dy <= r2 {
                plane[y * w + x] = BALL_LUMA;
            }
        }
    }
}

impl CameraDevice for SyntheticCamera {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn open_camera(&mut self) -> Result<()> {
        self.opened = true;
        self.stats.opens += 1;
        log::info!("SyntheticCamera: opened {} (synthetic)", self.config.device);
        Ok(())
    }

    fn configure_video(&mut self) -> Result<()> {
        if !self.opened {
            return Err(anyhow!("camera not opened"));
        }
        if self.config.width % 2 != 0 || self.config.height % 2 != 0 {
            return Err(anyhow!(
                "NV12 needs even dimensions, got {}x{}",
                self.config.width,
                self.config.height
            ));
        }
        self.configured = true;
        Ok(())
    }

    fn start_camera(&mut self) -> Result<()> {
        if !self.configured {
            return Err(anyhow!("camera not configured"));
        }
        self.streaming = true;
        self.stats.starts += 1;
        Ok(())
    }

    fn stop_camera(&mut self) -> Result<()> {
        if self.streaming {
            self.stats.stops += 1;
        }
        self.streaming = false;
        Ok(())
    }

    fn wait(&mut self) -> Result<CameraMessage> {
        if !self.streaming {
            return Err(anyhow!("wait on a camera that is not streaming"));
        }
        self.stats.waits += 1;

        let sequence = self.sequence;
        if self.config.timeouts_before.remove(&sequence) {
            self.stats.timeouts += 1;
            return Ok(CameraMessage::Timeout);
        }
        if self.config.quit_at == Some(sequence) {
            return Ok(CameraMessage::Quit);
        }

        let frame = self.render(sequence);
        self.sequence += 1;
        self.stats.frames += 1;
        Ok(CameraMessage::RequestComplete(CompletedRequest::new(
            sequence, frame,
        )))
    }
}
