mod affinity;
mod arena;
mod backend;
mod backends;
mod batch;
mod config;
mod engine;
mod error;
mod letterbox;
mod pool;
mod postprocess;
mod preprocess;
mod registry;
mod result;

pub use arena::{ArenaError, ArenaHandle, ScratchArena};
pub use backend::{
    BackendError, BackendErrorCode, ExecutionStrategy, InferenceSession, ModelBackend, ModelInfo,
    SessionOptions, TensorInfo,
};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use batch::{PreprocessedImage, PreprocessingPool};
pub use config::{
    ModelConfig, COCO_CHANNELS, COCO_CLASSES, SINGLE_CLASS_CHANNELS, WARM_UP_ITERATIONS,
};
pub use engine::{DetectionEngine, ModelFormat};
pub use error::DetectorError;
pub use letterbox::{LetterboxParams, PAD_VALUE};
pub use pool::{BufferKind, BufferLease, PoolError, PooledBuffers};
pub use postprocess::{
    decode_predictions, iou, non_max_suppression, prediction_count, OutputLayout,
};
pub use preprocess::{
    select_preprocessor, simd_supported, PreprocessError, Preprocessor, ScalarPreprocessor,
    SimdPreprocessor,
};
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Detection, PerformanceMetrics};
