use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Channels per prediction for a single-class ("ball") model.
pub const SINGLE_CLASS_CHANNELS: usize = 5;
/// Channels per prediction for an 80-class COCO model.
pub const COCO_CHANNELS: usize = 84;
/// Class count assumed when `single_class` is off.
pub const COCO_CLASSES: usize = 80;

/// Blank-image inferences run at the end of `initialize`.
pub const WARM_UP_ITERATIONS: usize = 5;

/// Model and runtime settings for a `DetectionEngine`.
///
/// Copied into the engine at construction; changing the original afterwards
/// has no effect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub input_width: u32,
    pub input_height: u32,
    pub num_threads: usize,
    pub use_thread_affinity: bool,
    pub cpu_cores: Vec<usize>,
    pub use_memory_pool: bool,
    pub use_simd_preprocessing: bool,
    /// Prefer the backend's vectorized (XNNPACK-style) execution path.
    pub use_vectorized_backend: bool,
    pub single_class: bool,
    /// Only consulted when `single_class` is false.
    pub num_classes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            input_width: 640,
            input_height: 640,
            num_threads: 3,
            use_thread_affinity: true,
            cpu_cores: vec![1, 2, 3],
            use_memory_pool: true,
            use_simd_preprocessing: true,
            use_vectorized_backend: true,
            single_class: true,
            num_classes: 1,
        }
    }
}

impl ModelConfig {
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = path.into();
        self
    }

    /// Score channels the model is expected to produce.
    pub fn class_count(&self) -> usize {
        if self.single_class {
            1
        } else {
            self.num_classes.max(1)
        }
    }

    pub fn expected_channels(&self) -> usize {
        4 + self.class_count()
    }

    /// Floats in one planar input tensor.
    pub fn input_len(&self) -> usize {
        3 * self.input_width as usize * self.input_height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_single_class_640() {
        let config = ModelConfig::default();
        assert_eq!(config.expected_channels(), SINGLE_CLASS_CHANNELS);
        assert_eq!(config.input_len(), 3 * 640 * 640);
        assert_eq!(config.cpu_cores, vec![1, 2, 3]);
    }

    #[test]
    fn multi_class_uses_num_classes() {
        let config = ModelConfig {
            single_class: false,
            num_classes: COCO_CLASSES,
            ..ModelConfig::default()
        };
        assert_eq!(config.expected_channels(), COCO_CHANNELS);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"model_path":"ball.onnx","num_threads":4}"#).unwrap();
        assert_eq!(config.model_path, PathBuf::from("ball.onnx"));
        assert_eq!(config.num_threads, 4);
        assert_eq!(config.nms_threshold, 0.4);
    }
}
