//! Frame-difference motion detection.
//!
//! Every `frame_period` frames the stage samples the luma plane inside the
//! region of interest (every `hskip`-th column, every `vskip`-th row) and
//! compares it with the previous sample. A pixel counts as changed when
//! `|new - old| > difference_m * old + difference_c`; motion is reported when
//! at least `region_threshold` of the sampled pixels changed. Frames between
//! periods get no result at all.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::{luma, CompletedRequest};

/// Metadata key the stage writes its boolean verdict to.
pub const MOTION_RESULT_KEY: &str = "motion_detect.result";
/// Fraction of sampled pixels that changed, written alongside the verdict.
pub const MOTION_FRACTION_KEY: &str = "motion_detect.changed_fraction";

/// A processing stage that may annotate a completed request.
pub trait MotionStage {
    fn name(&self) -> &'static str;
    fn process(&mut self, request: &mut CompletedRequest) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Region of interest as fractions of the frame.
    pub roi_x: f32,
    pub roi_y: f32,
    pub roi_width: f32,
    pub roi_height: f32,
    pub hskip: u32,
    pub vskip: u32,
    pub difference_m: f32,
    pub difference_c: f32,
    pub region_threshold: f32,
    /// Compare every n-th frame; 0 compares every frame.
    pub frame_period: u32,
    pub verbose: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            roi_x: 0.0,
            roi_y: 0.0,
            roi_width: 1.0,
            roi_height: 1.0,
            hskip: 1,
            vskip: 1,
            difference_m: 0.1,
            difference_c: 10.0,
            region_threshold: 0.005,
            frame_period: 5,
            verbose: false,
        }
    }
}

impl MotionConfig {
    pub fn validate(&self) -> Result<()> {
        let fractions = [self.roi_x, self.roi_y, self.roi_width, self.roi_height];
        if fractions.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(anyhow!("motion roi fractions must be within [0, 1]"));
        }
        if self.roi_x + self.roi_width > 1.0 || self.roi_y + self.roi_height > 1.0 {
            return Err(anyhow!("motion roi extends past the frame"));
        }
        if self.hskip == 0 || self.vskip == 0 {
            return Err(anyhow!("motion hskip/vskip must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.region_threshold) {
            return Err(anyhow!("motion region_threshold must be within [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Region {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    frame_width: usize,
    frame_height: usize,
}

impl Region {
    fn for_frame(config: &MotionConfig, frame_width: u32, frame_height: u32) -> Self {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        Self {
            x: (config.roi_x * fw) as usize,
            y: (config.roi_y * fh) as usize,
            width: (config.roi_width * fw) as usize,
            height: (config.roi_height * fh) as usize,
            frame_width: frame_width as usize,
            frame_height: frame_height as usize,
        }
    }

    fn sample(&self, luma: &[u8], hskip: usize, vskip: usize, out: &mut Vec<u8>) {
        out.clear();
        let x_end = (self.x + self.width).min(self.frame_width);
        let y_end = (self.y + self.height).min(self.frame_height);
        for y in (self.y..y_end).step_by(vskip) {
            let row = y * self.frame_width;
            out.extend((self.x..x_end).step_by(hskip).map(|x| luma[row + x]));
        }
    }
}

pub struct FrameDiffMotionStage {
    config: MotionConfig,
    region: Option<Region>,
    previous: Vec<u8>,
    current: Vec<u8>,
    motion_detected: bool,
}

impl FrameDiffMotionStage {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            region: None,
            previous: Vec::new(),
            current: Vec::new(),
            motion_detected: false,
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Forget the reference frame; the next compared frame only primes it.
    pub fn reset(&mut self) {
        self.region = None;
        self.previous.clear();
        self.motion_detected = false;
    }
}

impl MotionStage for FrameDiffMotionStage {
    fn name(&self) -> &'static str {
        "motion_detect"
    }

    fn process(&mut self, request: &mut CompletedRequest) -> Result<()> {
        let period = self.config.frame_period as u64;
        if period != 0 && request.sequence % period != 0 {
            return Ok(());
        }

        let frame = &request.frame;
        let plane = luma(&frame.data, frame.width, frame.height, frame.format)?;
        let region = Region::for_frame(&self.config, frame.width, frame.height);
        region.sample(
            &plane,
            self.config.hskip as usize,
            self.config.vskip as usize,
            &mut self.current,
        );

        let fraction = if self.region != Some(region) || self.previous.len() != self.current.len()
        {
            // First frame (or the camera changed size): prime only.
            self.region = Some(region);
            self.motion_detected = false;
            0.0
        } else {
            let changed = self
                .current
                .iter()
                .zip(&self.previous)
                .filter(|(new, old)| {
                    let old = **old as f32;
                    (**new as f32 - old).abs()
                        > self.config.difference_m * old + self.config.difference_c
                })
                .count();
            let total = self.current.len().max(1);
            let detected = changed as f32 >= self.config.region_threshold * total as f32;
            if self.config.verbose && detected != self.motion_detected {
                log::info!(
                    "MotionDetect: motion {} at frame {} ({}/{} changed)",
                    if detected { "detected" } else { "stopped" },
                    request.sequence,
                    changed,
                    total
                );
            }
            self.motion_detected = detected && !self.current.is_empty();
            changed as f64 / total as f64
        };
        std::mem::swap(&mut self.previous, &mut self.current);

        request
            .metadata
            .set_bool(MOTION_RESULT_KEY, self.motion_detected);
        request.metadata.set_float(MOTION_FRACTION_KEY, fraction);
        Ok(())
    }
}
