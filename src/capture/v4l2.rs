//! V4L2 camera session.
//!
//! Opens a local device node, negotiates size/format/frame rate, and streams
//! through memory-mapped buffers. A poll timeout on the stream surfaces as
//! `CameraMessage::Timeout` so the capture loop can restart the camera.

use std::io;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{CameraDevice, CameraMessage, CapturedFrame, CompletedRequest, PixelFormat};
use crate::config::CameraSettings;

const BUFFER_COUNT: u32 = 4;

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Camera {
    settings: CameraSettings,
    device: Option<v4l::Device>,
    stream: Option<StreamState>,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
    frames: u64,
}

impl V4l2Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            active_format: settings.pixel_format,
            settings,
            device: None,
            stream: None,
            frames: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms)
    }
}

impl CameraDevice for V4l2Camera {
    fn name(&self) -> &str {
        &self.settings.device
    }

    fn open_camera(&mut self) -> Result<()> {
        let device = v4l::Device::with_path(&self.settings.device)
            .with_context(|| format!("open v4l2 device {}", self.settings.device))?;
        self.device = Some(device);
        log::info!("V4l2Camera: opened {}", self.settings.device);
        Ok(())
    }

    fn configure_video(&mut self) -> Result<()> {
        use v4l::video::Capture;

        let device = self
            .device
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 device not opened"))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(&self.settings.pixel_format.fourcc());

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.settings.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.settings.framerate > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.framerate);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    self.settings.device,
                    err
                );
            }
        }

        self.active_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} delivers unsupported format {}",
                self.settings.device,
                format.fourcc
            )
        })?;
        self.active_width = format.width;
        self.active_height = format.height;
        log::info!(
            "V4l2Camera: configured {} ({}x{} {:?})",
            self.settings.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn start_camera(&mut self) -> Result<()> {
        use v4l::buffer::Type;

        if self.stream.is_some() {
            return Ok(());
        }
        let device = self
            .device
            .take()
            .ok_or_else(|| anyhow!("v4l2 device not opened"))?;
        let timeout = self.timeout();
        let state = StreamStateBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })?;
                stream.set_timeout(timeout);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()?;
        self.stream = Some(state);
        Ok(())
    }

    fn stop_camera(&mut self) -> Result<()> {
        if let Some(state) = self.stream.take() {
            self.device = Some(state.into_heads().device);
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<CameraMessage> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 camera not started"))?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, meta)| (buf.to_vec(), meta.sequence as u64))
        });
        match captured {
            Ok((mut data, sequence)) => {
                // Mapped buffers can be larger than the frame.
                if let Some(len) = self
                    .active_format
                    .frame_len(self.active_width, self.active_height)
                {
                    data.truncate(len);
                }
                self.frames += 1;
                Ok(CameraMessage::RequestComplete(CompletedRequest::new(
                    sequence,
                    CapturedFrame {
                        data,
                        width: self.active_width,
                        height: self.active_height,
                        format: self.active_format,
                    },
                )))
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(CameraMessage::Timeout),
            Err(err) => Err(anyhow::Error::new(err).context("capture v4l2 frame")),
        }
    }
}
