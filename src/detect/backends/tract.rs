#![cfg(feature = "backend-tract")]

use std::path::Path;

use tract_onnx::prelude::*;

use crate::detect::backend::{
    BackendError, BackendErrorCode, ExecutionStrategy, InferenceSession, ModelBackend, ModelInfo,
    SessionOptions, TensorInfo,
};

const NAME: &str = "tract";

fn fail(code: BackendErrorCode, err: impl std::fmt::Display) -> BackendError {
    BackendError::new(NAME, code, err.to_string())
}

/// Tract-based backend for ONNX inference.
///
/// Loads a local model file with a fixed `[1, 3, H, W]` input fact. Tract's
/// matrix kernels are always vectorized, so the engine's vectorized strategy
/// applies whenever it is requested.
#[derive(Clone, Copy, Debug, Default)]
pub struct TractBackend;

impl TractBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ModelBackend for TractBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports_vectorized(&self) -> bool {
        true
    }

    fn load(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Box<dyn InferenceSession>, BackendError> {
        match options.strategy {
            ExecutionStrategy::Vectorized { threads } => {
                log::info!("TractBackend: vectorized kernels, {} thread(s)", threads)
            }
            ExecutionStrategy::Default {
                intra_op_threads,
                inter_op_threads,
            } => log::info!(
                "TractBackend: default execution, intra-op {} inter-op {}",
                intra_op_threads,
                inter_op_threads
            ),
        }

        let shape = tvec!(
            1,
            3,
            options.input_height as usize,
            options.input_width as usize
        );
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| {
                fail(
                    BackendErrorCode::Load,
                    format!("failed to load ONNX model from {}: {}", model_path.display(), e),
                )
            })?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .map_err(|e| fail(BackendErrorCode::Load, format!("failed to set input fact: {}", e)))?;

        let model = if options.optimize_graph {
            model.into_optimized()
        } else {
            model.into_typed()
        }
        .map_err(|e| fail(BackendErrorCode::Load, format!("failed to type ONNX model: {}", e)))?;

        let info = ModelInfo {
            inputs: describe(&model, model.input_outlets())?,
            outputs: describe(&model, model.output_outlets())?,
        };

        let plan = model.into_runnable().map_err(|e| {
            fail(
                BackendErrorCode::Load,
                format!("failed to build runnable ONNX model: {}", e),
            )
        })?;

        Ok(Box::new(TractSession { plan, info }))
    }
}

fn describe(
    model: &TypedModel,
    outlets: TractResult<&[OutletId]>,
) -> Result<Vec<TensorInfo>, BackendError> {
    let outlets = outlets.map_err(|e| fail(BackendErrorCode::Load, e))?;
    outlets
        .iter()
        .map(|outlet| {
            let fact = model
                .outlet_fact(*outlet)
                .map_err(|e| fail(BackendErrorCode::Load, e))?;
            Ok(TensorInfo {
                name: model.node(outlet.node).name.clone(),
                shape: fact
                    .shape
                    .iter()
                    .map(|dim| dim.to_i64().unwrap_or(-1))
                    .collect(),
            })
        })
        .collect()
}

struct TractSession {
    plan: TypedRunnableModel<TypedModel>,
    info: ModelInfo,
}

impl InferenceSession for TractSession {
    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn run(
        &self,
        input: &[f32],
        shape: [usize; 4],
        output: &mut Vec<f32>,
    ) -> Result<Vec<usize>, BackendError> {
        let tensor = Tensor::from_shape(&shape, input)
            .map_err(|e| fail(BackendErrorCode::InvalidInput, e))?;
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| fail(BackendErrorCode::Runtime, format!("ONNX inference failed: {}", e)))?;
        let first = outputs
            .first()
            .ok_or_else(|| fail(BackendErrorCode::NoOutput, "model produced no outputs"))?;
        let values = first
            .as_slice::<f32>()
            .map_err(|e| fail(BackendErrorCode::OutputType, e))?;

        output.clear();
        output.extend_from_slice(values);
        Ok(first.shape().to_vec())
    }
}
