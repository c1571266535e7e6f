//! ball_watcher - Block until the ball moves.
//!
//! Streams the configured camera through the frame-difference motion stage
//! and exits once motion is confirmed (status 0), or with status 2 when the
//! session ends without motion (Ctrl-C or camera quit).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use launch_monitor_core::capture::{
    BallWatcher, CameraDevice, CaptureReport, FrameDiffMotionStage, GatedEncoder, MotionConfig,
    SyntheticCamera, SyntheticCameraConfig,
};
use launch_monitor_core::config::{CameraSettings, LaunchMonitorConfig};
use launch_monitor_core::web_api::WebApi;

const MOTION_ROI_KEY: &str = "motion_roi";

#[derive(Parser, Debug)]
#[command(author, version, about = "Wait for golf ball motion on a camera")]
struct Args {
    /// Camera device (/dev/videoN or stub://name). Overrides the config file.
    #[arg(long)]
    device: Option<String>,

    /// Synthetic cameras only: frame at which the ball starts rolling.
    #[arg(long, default_value = "30")]
    ball_after: u64,

    /// Compare every n-th frame (0 = every frame). Overrides the config file.
    #[arg(long)]
    frame_period: Option<u32>,

    /// Log motion state changes.
    #[arg(long)]
    verbose: bool,

    /// Push the motion ROI to the web service before watching.
    #[arg(long)]
    publish_roi: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = LaunchMonitorConfig::load()?;
    if let Some(device) = args.device {
        cfg.camera.device = device;
    }
    let mut motion = cfg.motion.clone();
    if let Some(period) = args.frame_period {
        motion.frame_period = period;
    }
    motion.verbose |= args.verbose;
    motion.validate()?;

    if args.publish_roi {
        publish_roi(&WebApi::from_config(&cfg), &motion);
    }

    let keep_running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&keep_running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let report = if cfg.camera.is_synthetic() {
        let camera = SyntheticCamera::new(SyntheticCameraConfig {
            device: cfg.camera.device.clone(),
            width: cfg.camera.width,
            height: cfg.camera.height,
            ball_after: Some(args.ball_after),
            ..SyntheticCameraConfig::default()
        });
        watch(camera, motion, &keep_running)?
    } else {
        watch(hardware_camera(&cfg.camera)?, motion, &keep_running)?
    };

    println!(
        "outcome={:?} frames={} elapsed_ms={} restarts={} trigger={}",
        report.outcome,
        report.frames,
        report.elapsed.as_millis(),
        report.restarts,
        report
            .trigger_sequence
            .map(|seq| seq.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    if !report.motion_detected() {
        std::process::exit(2);
    }
    Ok(())
}

/// Best effort: a missing web service only costs a log line.
fn publish_roi(api: &WebApi, motion: &MotionConfig) {
    if !api.is_web_server_available() {
        log::warn!("ball_watcher: web service at {} is not reachable", api.base_url());
        return;
    }
    let roi = [motion.roi_x, motion.roi_y, motion.roi_width, motion.roi_height].map(f64::from);
    api.update_calibration_values(MOTION_ROI_KEY, &roi);
}

fn watch<C: CameraDevice>(
    camera: C,
    motion: MotionConfig,
    keep_running: &AtomicBool,
) -> Result<CaptureReport> {
    log::info!("ball_watcher: watching {}", camera.name());
    let mut watcher = BallWatcher::new(
        camera,
        GatedEncoder::ungated(),
        FrameDiffMotionStage::new(motion),
    );
    watcher.run(keep_running)
}

#[cfg(feature = "ingest-v4l2")]
fn hardware_camera(settings: &CameraSettings) -> Result<Box<dyn CameraDevice>> {
    Ok(Box::new(launch_monitor_core::capture::V4l2Camera::new(
        settings.clone(),
    )))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn hardware_camera(settings: &CameraSettings) -> Result<Box<dyn CameraDevice>> {
    Err(anyhow::anyhow!(
        "camera {} needs the ingest-v4l2 feature; use a stub:// device otherwise",
        settings.device
    ))
}
