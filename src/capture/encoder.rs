use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::CompletedRequest;

/// Destination for completed frames.
pub trait EncoderSink {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Record one frame. `false` means recording has not started yet.
    fn encode(&mut self, request: &CompletedRequest) -> bool;
}

/// Counts frames once a shared "recording started" signal is raised.
///
/// Until the signal is set (e.g. by a companion camera that needs to be in
/// sync first) every `encode` returns `false`.
#[derive(Debug)]
pub struct GatedEncoder {
    recording: Arc<AtomicBool>,
    running: bool,
    frames_encoded: u64,
}

impl GatedEncoder {
    pub fn new(recording: Arc<AtomicBool>) -> Self {
        Self {
            recording,
            running: false,
            frames_encoded: 0,
        }
    }

    /// Records from the first frame.
    pub fn ungated() -> Self {
        Self::new(Arc::new(AtomicBool::new(true)))
    }

    pub fn recording_signal(&self) -> Arc<AtomicBool> {
        self.recording.clone()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl EncoderSink for GatedEncoder {
    fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(anyhow!("encoder already started"));
        }
        self.running = true;
        self.frames_encoded = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.running {
            log::debug!("GatedEncoder: stopped after {} frame(s)", self.frames_encoded);
        }
        self.running = false;
        Ok(())
    }

    fn encode(&mut self, _request: &CompletedRequest) -> bool {
        if !self.running || !self.recording.load(Ordering::Acquire) {
            return false;
        }
        self.frames_encoded += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CapturedFrame, PixelFormat};

    fn request() -> CompletedRequest {
        CompletedRequest::new(
            0,
            CapturedFrame {
                data: vec![0; 6],
                width: 2,
                height: 2,
                format: PixelFormat::Nv12,
            },
        )
    }

    #[test]
    fn gate_holds_until_signal() -> Result<()> {
        let signal = Arc::new(AtomicBool::new(false));
        let mut encoder = GatedEncoder::new(signal.clone());
        encoder.start()?;
        assert!(!encoder.encode(&request()));
        signal.store(true, Ordering::Release);
        assert!(encoder.encode(&request()));
        assert_eq!(encoder.frames_encoded(), 1);
        Ok(())
    }

    #[test]
    fn stopped_encoder_refuses_frames() -> Result<()> {
        let mut encoder = GatedEncoder::ungated();
        assert!(!encoder.encode(&request()));
        encoder.start()?;
        assert!(encoder.start().is_err());
        encoder.stop()?;
        assert!(!encoder.encode(&request()));
        Ok(())
    }
}
