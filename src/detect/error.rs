use std::path::PathBuf;

use thiserror::Error;

use crate::detect::arena::ArenaError;
use crate::detect::backend::BackendError;
use crate::detect::pool::PoolError;
use crate::detect::preprocess::PreprocessError;

/// Everything that can go wrong inside the detection engine.
///
/// None of these escape `initialize`/`detect`: they are logged and turned into
/// `false` or an empty detection list.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("detection engine is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("malformed output tensor: {0}")]
    MalformedOutput(String),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error("thread affinity: {0}")]
    Affinity(String),
}
