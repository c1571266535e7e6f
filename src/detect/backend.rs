use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::detect::config::ModelConfig;

/// Name and shape of one model input or output, as reported by the backend.
/// Dynamic dimensions are `-1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<i64>,
}

/// Input/output metadata cached by the engine at initialization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelInfo {
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
}

impl ModelInfo {
    /// Per-prediction channel count of the first output, read from dim 1 of a
    /// `[batch, channels, predictions]` shape.
    pub fn output_channels(&self) -> Option<i64> {
        self.outputs.first().and_then(|o| o.shape.get(1).copied())
    }
}

/// How the backend should schedule work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Vectorized execution provider owns the threads; the session itself
    /// runs single-threaded.
    Vectorized { threads: usize },
    /// Default CPU execution.
    Default {
        intra_op_threads: usize,
        inter_op_threads: usize,
    },
}

impl ExecutionStrategy {
    pub fn select(config: &ModelConfig, vectorized_available: bool) -> Self {
        let threads = config.num_threads.max(1);
        if config.use_vectorized_backend && vectorized_available {
            ExecutionStrategy::Vectorized { threads }
        } else {
            ExecutionStrategy::Default {
                intra_op_threads: threads.saturating_sub(1).max(1),
                inter_op_threads: 1,
            }
        }
    }
}

/// Options handed to `ModelBackend::load`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub strategy: ExecutionStrategy,
    pub optimize_graph: bool,
    pub input_width: u32,
    pub input_height: u32,
}

impl SessionOptions {
    pub fn for_config(config: &ModelConfig, vectorized_available: bool) -> Self {
        Self {
            strategy: ExecutionStrategy::select(config, vectorized_available),
            optimize_graph: true,
            input_width: config.input_width,
            input_height: config.input_height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendErrorCode {
    Load,
    InvalidInput,
    Runtime,
    NoOutput,
    OutputType,
}

impl fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            BackendErrorCode::Load => "LOAD",
            BackendErrorCode::InvalidInput => "INVALID_INPUT",
            BackendErrorCode::Runtime => "RUNTIME",
            BackendErrorCode::NoOutput => "NO_OUTPUT",
            BackendErrorCode::OutputType => "OUTPUT_TYPE",
        };
        f.write_str(code)
    }
}

/// A failure inside an inference runtime, converted at the backend boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{backend} backend error [{code}]: {message}")]
pub struct BackendError {
    pub backend: &'static str,
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: &'static str, code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            backend,
            code,
            message: message.into(),
        }
    }
}

/// A loaded, runnable model.
///
/// # Audit Boundary
///
/// `run` receives the planar input tensor by reference and must not keep it.
/// Implementations write the raw output into `output` (reusing its allocation)
/// and return the output shape.
pub trait InferenceSession: Send + Sync {
    fn model_info(&self) -> &ModelInfo;

    fn run(
        &self,
        input: &[f32],
        shape: [usize; 4],
        output: &mut Vec<f32>,
    ) -> Result<Vec<usize>, BackendError>;
}

/// Inference runtime able to turn a model file into a session.
pub trait ModelBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend offers a vectorized execution path.
    fn supports_vectorized(&self) -> bool {
        false
    }

    fn load(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Box<dyn InferenceSession>, BackendError>;
}
