use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::{
    BackendError, BackendErrorCode, InferenceSession, ModelBackend, ModelInfo, SessionOptions,
    TensorInfo,
};
use crate::detect::postprocess::{prediction_count, BOX_CHANNELS};

#[derive(Clone, Debug)]
enum Script {
    Output { shape: Vec<usize>, data: Vec<f32> },
    FailLoad(BackendErrorCode, String),
    FailRun(BackendErrorCode, String),
}

/// Scripted backend for tests and the synthetic pipeline.
///
/// Every `run` returns the same canned output tensor (or error). The model
/// path is never opened.
#[derive(Clone, Debug)]
pub struct StubBackend {
    script: Script,
    vectorized: bool,
    runs: Arc<AtomicUsize>,
}

impl StubBackend {
    /// Empty single-class output sized for a `width x height` model input.
    pub fn single_class(width: u32, height: u32) -> Self {
        Self::with_balls(width, height, &[])
    }

    /// Single-class output with one prediction per `[cx, cy, w, h, confidence]`
    /// entry, in model-input pixels. Remaining slots score zero.
    pub fn with_balls(width: u32, height: u32, balls: &[[f32; 5]]) -> Self {
        let n = prediction_count(width, height);
        let mut data = vec![0.0; (BOX_CHANNELS + 1) * n];
        for (i, ball) in balls.iter().enumerate().take(n) {
            for (channel, value) in ball.iter().enumerate() {
                data[channel * n + i] = *value;
            }
        }
        Self::with_output(vec![1, BOX_CHANNELS + 1, n], data)
    }

    pub fn with_output(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self::from_script(Script::Output { shape, data })
    }

    /// Fails at load time.
    pub fn failing_load(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self::from_script(Script::FailLoad(code, message.into()))
    }

    /// Loads fine, fails every inference.
    pub fn failing_run(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self::from_script(Script::FailRun(code, message.into()))
    }

    pub fn vectorized(mut self, vectorized: bool) -> Self {
        self.vectorized = vectorized;
        self
    }

    /// Shared count of `run` calls across every session this backend loads.
    pub fn run_counter(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }

    fn from_script(script: Script) -> Self {
        Self {
            script,
            vectorized: false,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ModelBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports_vectorized(&self) -> bool {
        self.vectorized
    }

    fn load(
        &self,
        _model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Box<dyn InferenceSession>, BackendError> {
        if let Script::FailLoad(code, message) = &self.script {
            return Err(BackendError::new("stub", *code, message.clone()));
        }
        let output_shape = match &self.script {
            Script::Output { shape, .. } => shape.iter().map(|d| *d as i64).collect(),
            _ => Vec::new(),
        };
        let info = ModelInfo {
            inputs: vec![TensorInfo {
                name: "images".into(),
                shape: vec![
                    1,
                    3,
                    options.input_height as i64,
                    options.input_width as i64,
                ],
            }],
            outputs: vec![TensorInfo {
                name: "output0".into(),
                shape: output_shape,
            }],
        };
        Ok(Box::new(StubSession {
            script: self.script.clone(),
            info,
            runs: self.runs.clone(),
        }))
    }
}

struct StubSession {
    script: Script,
    info: ModelInfo,
    runs: Arc<AtomicUsize>,
}

impl InferenceSession for StubSession {
    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn run(
        &self,
        input: &[f32],
        shape: [usize; 4],
        output: &mut Vec<f32>,
    ) -> Result<Vec<usize>, BackendError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if input.len() != shape.iter().product::<usize>() {
            return Err(BackendError::new(
                "stub",
                BackendErrorCode::InvalidInput,
                format!("input holds {} values, shape {:?}", input.len(), shape),
            ));
        }
        match &self.script {
            Script::Output { shape, data } => {
                output.clear();
                output.extend_from_slice(data);
                Ok(shape.clone())
            }
            Script::FailRun(code, message) | Script::FailLoad(code, message) => {
                Err(BackendError::new("stub", *code, message.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::config::ModelConfig;

    fn options() -> SessionOptions {
        SessionOptions::for_config(
            &ModelConfig {
                input_width: 64,
                input_height: 64,
                ..ModelConfig::default()
            },
            false,
        )
    }

    #[test]
    fn scripted_output_is_returned_and_counted() {
        let backend = StubBackend::with_balls(64, 64, &[[32.0, 32.0, 8.0, 8.0, 0.9]]);
        let counter = backend.run_counter();
        let session = backend.load(Path::new("unused.onnx"), &options()).unwrap();
        assert_eq!(session.model_info().output_channels(), Some(5));

        let input = vec![0.0; 3 * 64 * 64];
        let mut output = Vec::new();
        let shape = session.run(&input, [1, 3, 64, 64], &mut output).unwrap();
        assert_eq!(shape, vec![1, 5, 84]);
        assert_eq!(output[4 * 84], 0.9);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_failure_carries_code() {
        let err = StubBackend::failing_load(BackendErrorCode::Load, "corrupt")
            .load(Path::new("x"), &options())
            .err()
            .unwrap();
        assert_eq!(err.code, BackendErrorCode::Load);
    }
}
