use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::capture::{MotionConfig, PixelFormat};
use crate::detect::ModelConfig;
use crate::trajectory::TrajectoryLimits;
use crate::web_api::{DEFAULT_WEB_URL, WEB_URL_ENV};

const DEFAULT_MODEL_PATH: &str = "models/ball.onnx";
const DEFAULT_CAMERA_DEVICE: &str = "stub://ball_camera";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 60;
const DEFAULT_CAMERA_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
struct LaunchMonitorConfigFile {
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfig>,
    trajectory: Option<TrajectoryConfigFile>,
    web: Option<WebConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    num_threads: Option<usize>,
    cpu_cores: Option<Vec<usize>>,
    use_thread_affinity: Option<bool>,
    use_memory_pool: Option<bool>,
    use_simd_preprocessing: Option<bool>,
    use_vectorized_backend: Option<bool>,
    single_class: Option<bool>,
    num_classes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<u32>,
    pixel_format: Option<PixelFormat>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TrajectoryConfigFile {
    min_speed_mph: Option<f64>,
    max_speed_mph: Option<f64>,
    min_launch_angle_deg: Option<f64>,
    max_launch_angle_deg: Option<f64>,
    max_side_angle_deg: Option<f64>,
    max_spin_rpm: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct WebConfigFile {
    url: Option<String>,
}

/// Everything the launch monitor binaries need, resolved from an optional
/// JSON file (`LAUNCH_MONITOR_CONFIG`), environment overrides, and defaults.
#[derive(Debug, Clone)]
pub struct LaunchMonitorConfig {
    pub model: ModelConfig,
    pub camera: CameraSettings,
    pub motion: MotionConfig,
    pub trajectory: TrajectoryLimits,
    pub web_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    /// Device node (e.g. "/dev/video0") or a `stub://` name for the
    /// synthetic camera.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub pixel_format: PixelFormat,
    pub timeout_ms: u64,
}

impl CameraSettings {
    pub fn is_synthetic(&self) -> bool {
        self.device.starts_with("stub://")
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA_DEVICE.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            framerate: DEFAULT_CAMERA_FPS,
            pixel_format: PixelFormat::Nv12,
            timeout_ms: DEFAULT_CAMERA_TIMEOUT_MS,
        }
    }
}

impl LaunchMonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LAUNCH_MONITOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LaunchMonitorConfigFile) -> Self {
        let model_file = file.model.unwrap_or_default();
        let defaults = ModelConfig::default();
        let model = ModelConfig {
            model_path: model_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            confidence_threshold: model_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            nms_threshold: model_file.nms_threshold.unwrap_or(defaults.nms_threshold),
            input_width: model_file.input_width.unwrap_or(defaults.input_width),
            input_height: model_file.input_height.unwrap_or(defaults.input_height),
            num_threads: model_file.num_threads.unwrap_or(defaults.num_threads),
            use_thread_affinity: model_file
                .use_thread_affinity
                .unwrap_or(defaults.use_thread_affinity),
            cpu_cores: model_file.cpu_cores.unwrap_or(defaults.cpu_cores),
            use_memory_pool: model_file.use_memory_pool.unwrap_or(defaults.use_memory_pool),
            use_simd_preprocessing: model_file
                .use_simd_preprocessing
                .unwrap_or(defaults.use_simd_preprocessing),
            use_vectorized_backend: model_file
                .use_vectorized_backend
                .unwrap_or(defaults.use_vectorized_backend),
            single_class: model_file.single_class.unwrap_or(defaults.single_class),
            num_classes: model_file.num_classes.unwrap_or(defaults.num_classes),
        };

        let camera_file = file.camera.unwrap_or_default();
        let camera_defaults = CameraSettings::default();
        let camera = CameraSettings {
            device: camera_file.device.unwrap_or(camera_defaults.device),
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
            framerate: camera_file.framerate.unwrap_or(camera_defaults.framerate),
            pixel_format: camera_file
                .pixel_format
                .unwrap_or(camera_defaults.pixel_format),
            timeout_ms: camera_file.timeout_ms.unwrap_or(camera_defaults.timeout_ms),
        };

        let limits_file = file.trajectory.unwrap_or_default();
        let limit_defaults = TrajectoryLimits::default();
        let trajectory = TrajectoryLimits {
            min_speed_mph: limits_file
                .min_speed_mph
                .unwrap_or(limit_defaults.min_speed_mph),
            max_speed_mph: limits_file
                .max_speed_mph
                .unwrap_or(limit_defaults.max_speed_mph),
            min_launch_angle_deg: limits_file
                .min_launch_angle_deg
                .unwrap_or(limit_defaults.min_launch_angle_deg),
            max_launch_angle_deg: limits_file
                .max_launch_angle_deg
                .unwrap_or(limit_defaults.max_launch_angle_deg),
            max_side_angle_deg: limits_file
                .max_side_angle_deg
                .unwrap_or(limit_defaults.max_side_angle_deg),
            max_spin_rpm: limits_file.max_spin_rpm.unwrap_or(limit_defaults.max_spin_rpm),
        };

        Self {
            model,
            camera,
            motion: file.motion.unwrap_or_default(),
            trajectory,
            web_url: file
                .web
                .and_then(|web| web.url)
                .unwrap_or_else(|| DEFAULT_WEB_URL.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("LAUNCH_MONITOR_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.model_path = PathBuf::from(path);
            }
        }
        if let Ok(confidence) = std::env::var("LAUNCH_MONITOR_CONFIDENCE") {
            self.model.confidence_threshold = confidence.trim().parse().map_err(|_| {
                anyhow!("LAUNCH_MONITOR_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Ok(device) = std::env::var("LAUNCH_MONITOR_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(url) = std::env::var(WEB_URL_ENV) {
            if !url.trim().is_empty() {
                self.web_url = url.trim().to_string();
            }
        }
        if let Ok(cores) = std::env::var("LAUNCH_MONITOR_CPU_CORES") {
            self.model.cpu_cores = split_csv(&cores)
                .iter()
                .map(|core| {
                    core.parse::<usize>().map_err(|_| {
                        anyhow!("LAUNCH_MONITOR_CPU_CORES must be a comma-separated list of core ids")
                    })
                })
                .collect::<Result<_>>()?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let model = &self.model;
        if !(model.confidence_threshold > 0.0 && model.confidence_threshold <= 1.0) {
            return Err(anyhow!("confidence_threshold must be within (0, 1]"));
        }
        if !(0.0..=1.0).contains(&model.nms_threshold) {
            return Err(anyhow!("nms_threshold must be within [0, 1]"));
        }
        if model.input_width == 0
            || model.input_height == 0
            || model.input_width % 32 != 0
            || model.input_height % 32 != 0
        {
            return Err(anyhow!(
                "model input size must be a non-zero multiple of 32, got {}x{}",
                model.input_width,
                model.input_height
            ));
        }
        if model.num_threads == 0 {
            return Err(anyhow!("num_threads must be at least 1"));
        }
        if !model.single_class && model.num_classes == 0 {
            return Err(anyhow!("num_classes must be at least 1 for multi-class models"));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be non-zero"));
        }
        if self.camera.timeout_ms == 0 {
            return Err(anyhow!("camera timeout_ms must be greater than zero"));
        }

        self.motion.validate()?;
        self.trajectory.validate()?;

        self.web_url = self.web_url.trim_end_matches('/').to_string();
        if !(self.web_url.starts_with("http://") || self.web_url.starts_with("https://")) {
            return Err(anyhow!("web url must start with http:// or https://"));
        }
        Ok(())
    }
}

impl Default for LaunchMonitorConfig {
    fn default() -> Self {
        Self::from_file(LaunchMonitorConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<LaunchMonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let mut cfg = LaunchMonitorConfig::default();
        cfg.validate()?;
        assert_eq!(cfg.web_url, DEFAULT_WEB_URL);
        assert!(cfg.camera.is_synthetic());
        assert_eq!(cfg.model.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        Ok(())
    }

    #[test]
    fn input_size_must_be_stride_aligned() {
        let mut cfg = LaunchMonitorConfig::default();
        cfg.model.input_width = 650;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn trailing_slash_is_trimmed_from_web_url() -> Result<()> {
        let mut cfg = LaunchMonitorConfig::default();
        cfg.web_url = "http://monitor.local:8080/".to_string();
        cfg.validate()?;
        assert_eq!(cfg.web_url, "http://monitor.local:8080");
        Ok(())
    }

    #[test]
    fn split_csv_skips_blanks() {
        assert_eq!(split_csv(" 1, ,2,3 "), vec!["1", "2", "3"]);
    }
}
