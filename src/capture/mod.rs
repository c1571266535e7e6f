//! Motion-triggered capture.
//!
//! A `BallWatcher` drives one camera session and returns as soon as the motion
//! stage reports movement or the process asks it to stop:
//! - `CameraDevice`: the camera session (V4L2 behind `ingest-v4l2`, or the
//!   synthetic `stub://` camera)
//! - `EncoderSink`: where completed frames are recorded
//! - `MotionStage`: frame-difference detector writing `motion_detect.result`
//!
//! Completed requests carry their frame and a small metadata map that stages
//! write into and the watcher reads back.

use std::collections::BTreeMap;

use anyhow::Result;
use image::RgbImage;

mod encoder;
pub mod motion;
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;
mod watcher;

pub use encoder::{EncoderSink, GatedEncoder};
pub use motion::{
    FrameDiffMotionStage, MotionConfig, MotionStage, MOTION_FRACTION_KEY, MOTION_RESULT_KEY,
};
pub use normalize::{luma, normalize_to_rgb, PixelFormat};
pub use synthetic::{SyntheticCamera, SyntheticCameraConfig, SyntheticCameraStats};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;
pub use watcher::{BallWatcher, CaptureOutcome, CaptureReport, CaptureState};

/// One frame as delivered by the camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl CapturedFrame {
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let rgb = normalize_to_rgb(&self.data, self.width, self.height, self.format)?;
        RgbImage::from_raw(self.width, self.height, rgb).ok_or_else(|| {
            anyhow::anyhow!("RGB buffer does not match {}x{}", self.width, self.height)
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    Float(f64),
}

/// Per-request values written by processing stages.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestMetadata {
    values: BTreeMap<String, MetadataValue>,
}

impl RequestMetadata {
    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.values.insert(key.to_string(), MetadataValue::Bool(value));
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), MetadataValue::Float(value));
    }

    /// `None` when the key is absent or holds another type.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(MetadataValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(MetadataValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// A finished capture request.
#[derive(Clone, Debug)]
pub struct CompletedRequest {
    /// Monotonic frame number from the camera.
    pub sequence: u64,
    pub frame: CapturedFrame,
    pub metadata: RequestMetadata,
}

impl CompletedRequest {
    pub fn new(sequence: u64, frame: CapturedFrame) -> Self {
        Self {
            sequence,
            frame,
            metadata: RequestMetadata::default(),
        }
    }
}

/// What `CameraDevice::wait` can hand back.
#[derive(Debug)]
pub enum CameraMessage {
    RequestComplete(CompletedRequest),
    /// The device stopped delivering frames within its timeout.
    Timeout,
    /// The session was asked to end.
    Quit,
}

/// A camera session the capture loop can drive.
///
/// Calls arrive in order: `open_camera`, `configure_video`, `start_camera`,
/// then `wait` repeatedly, with `stop_camera`/`start_camera` pairs for
/// recovery.
pub trait CameraDevice {
    fn name(&self) -> &str;
    fn open_camera(&mut self) -> Result<()>;
    fn configure_video(&mut self) -> Result<()>;
    fn start_camera(&mut self) -> Result<()>;
    fn stop_camera(&mut self) -> Result<()>;
    /// Block until the next message.
    fn wait(&mut self) -> Result<CameraMessage>;
}

impl<T: CameraDevice + ?Sized> CameraDevice for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open_camera(&mut self) -> Result<()> {
        (**self).open_camera()
    }

    fn configure_video(&mut self) -> Result<()> {
        (**self).configure_video()
    }

    fn start_camera(&mut self) -> Result<()> {
        (**self).start_camera()
    }

    fn stop_camera(&mut self) -> Result<()> {
        (**self).stop_camera()
    }

    fn wait(&mut self) -> Result<CameraMessage> {
        (**self).wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_type_mismatch_reads_as_missing() {
        let mut metadata = RequestMetadata::default();
        metadata.set_float(MOTION_RESULT_KEY, 1.0);
        assert!(metadata.contains(MOTION_RESULT_KEY));
        assert_eq!(metadata.get_bool(MOTION_RESULT_KEY), None);
        metadata.set_bool(MOTION_RESULT_KEY, true);
        assert_eq!(metadata.get_bool(MOTION_RESULT_KEY), Some(true));
    }

    #[test]
    fn nv12_frame_converts_to_rgb_image() -> Result<()> {
        let frame = CapturedFrame {
            data: [vec![200u8; 16], vec![128u8; 8]].concat(),
            width: 4,
            height: 4,
            format: PixelFormat::Nv12,
        };
        let image = frame.to_rgb_image()?;
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.get_pixel(3, 3).0, [200, 200, 200]);
        Ok(())
    }
}
