use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::{CameraDevice, CameraMessage, EncoderSink, MotionStage, MOTION_RESULT_KEY};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Starting,
    Streaming,
    DeviceTimeout,
    MotionConfirmed,
    StoppedExternally,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    MotionDetected,
    /// The keep-running flag was cleared.
    StoppedExternally,
    /// The camera asked the session to end.
    Quit { motion_detected: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureReport {
    pub outcome: CaptureOutcome,
    /// Frames since the last elapsed-time baseline.
    pub frames: u64,
    /// Time since the last elapsed-time baseline.
    pub elapsed: Duration,
    /// Camera stop/start cycles caused by device timeouts.
    pub restarts: u32,
    /// Sequence number of the request that confirmed motion.
    pub trigger_sequence: Option<u64>,
}

impl CaptureReport {
    pub fn motion_detected(&self) -> bool {
        matches!(
            self.outcome,
            CaptureOutcome::MotionDetected
                | CaptureOutcome::Quit {
                    motion_detected: true
                }
        )
    }
}

/// Watches a camera until the ball moves.
pub struct BallWatcher<C, E, M> {
    camera: C,
    encoder: E,
    motion: M,
    state: CaptureState,
}

impl<C, E, M> BallWatcher<C, E, M>
where
    C: CameraDevice,
    E: EncoderSink,
    M: MotionStage,
{
    pub fn new(camera: C, encoder: E, motion: M) -> Self {
        Self {
            camera,
            encoder,
            motion,
            state: CaptureState::Starting,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn into_parts(self) -> (C, E, M) {
        (self.camera, self.encoder, self.motion)
    }

    /// Block until motion is confirmed, `keep_running` is cleared, or the
    /// camera quits. `keep_running` is checked once per message.
    ///
    /// Errors only come from the camera or encoder themselves; the session is
    /// torn down before they are returned.
    pub fn run(&mut self, keep_running: &AtomicBool) -> Result<CaptureReport> {
        self.state = CaptureState::Starting;
        match self.watch(keep_running) {
            Ok(report) => Ok(report),
            Err(err) => {
                if let Err(stop_err) = self.shutdown() {
                    log::warn!("BallWatcher: teardown after failure: {}", stop_err);
                }
                Err(err)
            }
        }
    }

    fn watch(&mut self, keep_running: &AtomicBool) -> Result<CaptureReport> {
        let device = self.camera.name().to_string();
        self.camera
            .open_camera()
            .with_context(|| format!("open camera {}", device))?;
        self.camera
            .configure_video()
            .with_context(|| format!("configure camera {}", device))?;
        log::debug!("BallWatcher: starting encoder");
        self.encoder.start().context("start encoder")?;
        self.camera
            .start_camera()
            .with_context(|| format!("start camera {}", device))?;
        self.state = CaptureState::Streaming;

        let mut start_time = Instant::now();
        let mut frames: u64 = 0;
        let mut restarts: u32 = 0;

        loop {
            if !keep_running.load(Ordering::SeqCst) {
                self.shutdown()?;
                self.state = CaptureState::StoppedExternally;
                log::info!("BallWatcher: stopped externally after {} frame(s)", frames);
                return Ok(CaptureReport {
                    outcome: CaptureOutcome::StoppedExternally,
                    frames,
                    elapsed: start_time.elapsed(),
                    restarts,
                    trigger_sequence: None,
                });
            }

            let mut request = match self.camera.wait()? {
                CameraMessage::Timeout => {
                    self.state = CaptureState::DeviceTimeout;
                    log::error!("BallWatcher: device timeout on {}, restarting camera", device);
                    self.camera.stop_camera().context("stop camera after timeout")?;
                    self.camera.start_camera().context("restart camera after timeout")?;
                    restarts += 1;
                    self.state = CaptureState::Streaming;
                    continue;
                }
                CameraMessage::Quit => {
                    log::info!("BallWatcher: camera quit");
                    return Ok(CaptureReport {
                        outcome: CaptureOutcome::Quit {
                            motion_detected: false,
                        },
                        frames,
                        elapsed: start_time.elapsed(),
                        restarts,
                        trigger_sequence: None,
                    });
                }
                CameraMessage::RequestComplete(request) => request,
            };

            if self.encoder.encode(&request) {
                frames += 1;
            } else {
                // Still waiting for recording to start.
                start_time = Instant::now();
                frames = 0;
            }

            if let Err(err) = self.motion.process(&mut request) {
                log::warn!(
                    "BallWatcher: {} stage failed on frame {}: {}",
                    self.motion.name(),
                    request.sequence,
                    err
                );
                continue;
            }

            if request.metadata.get_bool(MOTION_RESULT_KEY) == Some(true) {
                self.shutdown()?;
                self.state = CaptureState::MotionConfirmed;
                let elapsed = start_time.elapsed();
                log::info!(
                    "BallWatcher: motion detected at frame {} ({} frame(s), {:.2}s)",
                    request.sequence,
                    frames,
                    elapsed.as_secs_f64()
                );
                return Ok(CaptureReport {
                    outcome: CaptureOutcome::MotionDetected,
                    frames,
                    elapsed,
                    restarts,
                    trigger_sequence: Some(request.sequence),
                });
            }
        }
    }

    /// Camera first: stopping it can stall while the encoder drains.
    fn shutdown(&mut self) -> Result<()> {
        self.camera.stop_camera().context("stop camera")?;
        self.encoder.stop().context("stop encoder")?;
        Ok(())
    }
}
