//! Launch Monitor Core
//!
//! Perception and flight-physics core of a camera-based golf launch monitor.
//!
//! # Architecture
//!
//! Three independent components, all synchronous at their public boundary:
//!
//! 1. **Detection engine**: one RGB frame in, ball candidates out. Letterbox
//!    preprocessing, a pluggable inference backend, decoding and per-class
//!    non-max suppression.
//! 2. **Capture loop**: drives a camera and encoder until a frame-difference
//!    stage reports motion, restarting the camera on device timeouts.
//! 3. **Trajectory engine**: launch conditions plus weather in, carry, flight
//!    time, apex and landing angle out.
//!
//! # Module Structure
//!
//! - `frame`: borrowed RGB frame views and their validation
//! - `detect`: detection engine, backends, buffer pool, scratch arena
//! - `capture`: camera sessions, motion stage, encoder sinks, capture loop
//! - `trajectory`: input validation and the flight integrator
//! - `config`: JSON file + environment configuration
//! - `web_api`: best-effort calibration push to the local web service

pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod trajectory;
pub mod web_api;

pub use capture::{BallWatcher, CaptureOutcome, CaptureReport};
pub use config::{CameraSettings, LaunchMonitorConfig};
pub use detect::{BoundingBox, Detection, DetectionEngine, ModelConfig, PerformanceMetrics};
pub use frame::{FrameError, ImageFrame};
pub use trajectory::{TrajectoryCalculator, TrajectoryInput, TrajectoryLimits, TrajectoryResult};
pub use web_api::WebApi;
