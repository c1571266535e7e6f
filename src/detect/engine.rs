//! Single-image ball detection.
//!
//! `DetectionEngine` owns one inference session and turns arbitrary-size
//! 3-channel images into detections in original-image pixels:
//!
//! 1. acquire the pooled input buffer (or per-call scratch if it is busy)
//! 2. letterbox + normalize into a planar tensor
//! 3. run the session
//! 4. decode the channel-major output, filter by confidence
//! 5. per-class NMS
//!
//! Nothing in here returns an error to the caller. Failures are logged and
//! show up as `false` from `initialize` or an empty detection list.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::detect::affinity;
use crate::detect::arena::ScratchArena;
use crate::detect::backend::{InferenceSession, ModelBackend, ModelInfo, SessionOptions};
use crate::detect::batch::PreprocessedImage;
use crate::detect::config::{ModelConfig, COCO_CHANNELS, SINGLE_CLASS_CHANNELS, WARM_UP_ITERATIONS};
use crate::detect::error::DetectorError;
use crate::detect::letterbox::LetterboxParams;
use crate::detect::pool::{BufferLease, PoolError, PooledBuffers};
use crate::detect::postprocess::{decode_predictions, non_max_suppression, OutputLayout};
use crate::detect::preprocess::{select_preprocessor, PreprocessError, Preprocessor};
use crate::detect::registry::BackendRegistry;
use crate::detect::result::{Detection, PerformanceMetrics};
use crate::frame::ImageFrame;

/// Model format inferred from the output channel count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFormat {
    SingleClass,
    Coco,
    Unknown(i64),
}

impl ModelFormat {
    pub fn from_channels(channels: i64) -> Self {
        match channels {
            c if c == SINGLE_CLASS_CHANNELS as i64 => ModelFormat::SingleClass,
            c if c == COCO_CHANNELS as i64 => ModelFormat::Coco,
            other => ModelFormat::Unknown(other),
        }
    }
}

/// Running inference-time statistics, updated with atomics only.
#[derive(Debug, Default)]
struct InferenceStats {
    count: AtomicU64,
    /// `f64` milliseconds stored as raw bits.
    average_ms: AtomicU64,
}

impl InferenceStats {
    fn record(&self, current_ms: f64) {
        let n = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        let _ = self
            .average_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let avg = f64::from_bits(bits);
                Some(((avg * (n - 1) as f64 + current_ms) / n as f64).to_bits())
            });
    }

    fn average(&self) -> f64 {
        f64::from_bits(self.average_ms.load(Ordering::Acquire))
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Release);
        self.average_ms.store(0f64.to_bits(), Ordering::Release);
    }
}

struct Loaded {
    session: Box<dyn InferenceSession>,
    info: ModelInfo,
    format: Option<ModelFormat>,
}

pub struct DetectionEngine {
    config: ModelConfig,
    backend: Arc<dyn ModelBackend>,
    preprocessor: Box<dyn Preprocessor>,
    layout: OutputLayout,
    loaded: Option<Loaded>,
    pool: Option<PooledBuffers>,
    stats: InferenceStats,
}

impl DetectionEngine {
    /// Engine on an explicit backend. Call `initialize` before `detect`.
    pub fn new(config: ModelConfig, backend: Arc<dyn ModelBackend>) -> Self {
        let preprocessor = select_preprocessor(config.use_simd_preprocessing);
        let layout = OutputLayout::for_config(&config);
        Self {
            config,
            backend,
            preprocessor,
            layout,
            loaded: None,
            pool: None,
            stats: InferenceStats::default(),
        }
    }

    /// Engine on whichever registered backend suits the configuration.
    pub fn from_registry(config: ModelConfig, registry: &BackendRegistry) -> anyhow::Result<Self> {
        let backend = registry.select(config.use_vectorized_backend)?;
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_initialized(&self) -> bool {
        self.loaded.is_some()
    }

    /// Tensor names and shapes cached at initialization.
    pub fn model_info(&self) -> Option<&ModelInfo> {
        self.loaded.as_ref().map(|l| &l.info)
    }

    pub fn model_format(&self) -> Option<ModelFormat> {
        self.loaded.as_ref().and_then(|l| l.format)
    }

    /// Load the model and prepare buffers. Returns `false` on any failure; the
    /// engine stays unusable until a later call succeeds.
    pub fn initialize(&mut self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                log::error!("DetectionEngine: initialization failed: {}", e);
                self.loaded = None;
                self.pool = None;
                false
            }
        }
    }

    fn try_initialize(&mut self) -> Result<(), DetectorError> {
        let path = self.config.model_path.clone();
        if !path.is_file() {
            return Err(DetectorError::ModelNotFound(path));
        }

        let options = SessionOptions::for_config(&self.config, self.backend.supports_vectorized());
        log::info!(
            "DetectionEngine: loading {} with {} backend ({:?})",
            path.display(),
            self.backend.name(),
            options.strategy
        );
        let session = self.backend.load(&path, &options)?;
        let info = session.model_info().clone();
        log_model_info(&path, &info);
        let format = self.check_model_format(&info);

        self.pool = if self.config.use_memory_pool {
            Some(PooledBuffers::new(
                self.config.input_len(),
                self.layout.expected_len(),
            ))
        } else {
            None
        };

        if self.config.use_thread_affinity && !self.set_thread_affinity() {
            log::warn!("DetectionEngine: continuing without thread affinity");
        }

        self.loaded = Some(Loaded {
            session,
            info,
            format,
        });

        self.warm_up(WARM_UP_ITERATIONS);
        self.stats.reset();
        log::info!(
            "DetectionEngine: ready ({} preprocessing, {} bytes pooled)",
            self.preprocessor.name(),
            self.memory_usage()
        );
        Ok(())
    }

    /// Compare the model's output channels with the configured class mode.
    /// Mismatches are logged, never fatal.
    fn check_model_format(&self, info: &ModelInfo) -> Option<ModelFormat> {
        let channels = match info.output_channels() {
            Some(c) => c,
            None => {
                log::warn!("DetectionEngine: model output has no channel dimension");
                return None;
            }
        };
        let format = ModelFormat::from_channels(channels);
        match format {
            ModelFormat::SingleClass => log::info!("DetectionEngine: single-class ball model"),
            ModelFormat::Coco => log::info!("DetectionEngine: 80-class COCO model"),
            ModelFormat::Unknown(c) => {
                log::error!("DetectionEngine: unknown model format ({} output channels)", c)
            }
        }
        let expected = self.config.expected_channels() as i64;
        if channels != expected {
            log::warn!(
                "DetectionEngine: model has {} output channels, configuration expects {} (single_class={})",
                channels,
                expected,
                self.config.single_class
            );
        }
        Some(format)
    }

    /// Run `iterations` inferences on a blank image at the model input size.
    pub fn warm_up(&self, iterations: usize) {
        if self.loaded.is_none() || iterations == 0 {
            return;
        }
        let blank = RgbImage::new(self.config.input_width, self.config.input_height);
        let frame = ImageFrame::from(&blank);
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = self.detect(&frame, None);
        }
        log::info!(
            "DetectionEngine: warm-up {} iteration(s) in {:.1} ms",
            iterations,
            start.elapsed().as_secs_f64() * 1000.0
        );
    }

    /// Pin the calling thread to the configured cores.
    pub fn set_thread_affinity(&self) -> bool {
        match affinity::pin_current_thread(&self.config.cpu_cores) {
            Ok(()) => {
                log::info!(
                    "DetectionEngine: pinned thread to cores {:?}",
                    self.config.cpu_cores
                );
                true
            }
            Err(e) => {
                log::warn!("DetectionEngine: {}", e);
                false
            }
        }
    }

    /// Detect balls in one image. Empty on any failure.
    pub fn detect(
        &self,
        frame: &ImageFrame<'_>,
        metrics: Option<&mut PerformanceMetrics>,
    ) -> Vec<Detection> {
        match self.try_detect(frame, metrics) {
            Ok(detections) => detections,
            Err(e) => {
                log::error!("DetectionEngine: {}", e);
                Vec::new()
            }
        }
    }

    /// Sequential `detect` over several images.
    pub fn detect_batch(&self, frames: &[ImageFrame<'_>]) -> Vec<Vec<Detection>> {
        frames.iter().map(|frame| self.detect(frame, None)).collect()
    }

    /// Inference + postprocessing on an image already letterboxed by a
    /// `PreprocessingPool`.
    pub fn detect_preprocessed(
        &self,
        image: &PreprocessedImage,
        metrics: Option<&mut PerformanceMetrics>,
    ) -> Vec<Detection> {
        let result = if image.width != self.config.input_width
            || image.height != self.config.input_height
        {
            Err(DetectorError::Preprocess(PreprocessError::OutputLength {
                expected: self.config.input_len(),
                actual: image.tensor.len(),
            }))
        } else {
            self.session().and_then(|session| {
                let start = Instant::now();
                self.infer(session, &image.tensor, &image.letterbox, start, 0.0)
            })
        };
        match result {
            Ok((detections, timings)) => {
                self.fill_metrics(metrics, timings);
                detections
            }
            Err(e) => {
                log::error!("DetectionEngine: {}", e);
                Vec::new()
            }
        }
    }

    fn session(&self) -> Result<&dyn InferenceSession, DetectorError> {
        self.loaded
            .as_ref()
            .map(|l| l.session.as_ref())
            .ok_or(DetectorError::NotInitialized)
    }

    fn try_detect(
        &self,
        frame: &ImageFrame<'_>,
        metrics: Option<&mut PerformanceMetrics>,
    ) -> Result<Vec<Detection>, DetectorError> {
        let session = self.session()?;
        frame.validate().map_err(PreprocessError::from)?;

        let start = Instant::now();
        let input_len = self.config.input_len();
        let mut lease = self
            .pool
            .as_ref()
            .and_then(|pool| pooled(pool.acquire_input(input_len)));
        let mut arena = ScratchArena::new(input_len);
        let input: &mut [f32] = match lease.as_mut() {
            Some(lease) => lease.as_mut_slice(),
            None => {
                let handle = arena.allocate(input_len)?;
                arena.get_mut(handle)?
            }
        };

        let letterbox = self.preprocessor.preprocess(
            frame,
            self.config.input_width,
            self.config.input_height,
            input,
        )?;
        let preprocessing_ms = elapsed_ms(start);

        let (detections, timings) =
            self.infer(session, input, &letterbox, start, preprocessing_ms)?;
        drop(lease);
        self.fill_metrics(metrics, timings);
        Ok(detections)
    }

    /// Run the session on a filled input tensor and postprocess.
    fn infer(
        &self,
        session: &dyn InferenceSession,
        input: &[f32],
        letterbox: &LetterboxParams,
        start: Instant,
        preprocessing_ms: f32,
    ) -> Result<(Vec<Detection>, PerformanceMetrics), DetectorError> {
        let shape = [
            1,
            3,
            self.config.input_height as usize,
            self.config.input_width as usize,
        ];

        let mut out_lease = self
            .pool
            .as_ref()
            .and_then(|pool| pooled(pool.acquire_output()));
        let mut scratch_output = Vec::new();
        let output = match out_lease.as_mut() {
            Some(lease) => &mut **lease,
            None => &mut scratch_output,
        };

        let inference_start = Instant::now();
        let output_shape = session.run(input, shape, output)?;
        let inference_ms = elapsed_ms(inference_start);
        self.stats.record(inference_ms as f64);

        let post_start = Instant::now();
        self.layout.check(&output_shape, output)?;
        let candidates = decode_predictions(
            output,
            &self.layout,
            letterbox,
            self.config.confidence_threshold,
        );
        let detections = non_max_suppression(candidates, self.config.nms_threshold);
        let postprocessing_ms = elapsed_ms(post_start);
        drop(out_lease);

        Ok((
            detections,
            PerformanceMetrics {
                preprocessing_ms,
                inference_ms,
                postprocessing_ms,
                total_ms: elapsed_ms(start),
                memory_usage_bytes: 0,
            },
        ))
    }

    fn fill_metrics(&self, metrics: Option<&mut PerformanceMetrics>, timings: PerformanceMetrics) {
        if let Some(metrics) = metrics {
            *metrics = PerformanceMetrics {
                memory_usage_bytes: self.memory_usage(),
                ..timings
            };
        }
    }

    /// Bytes held by the pooled buffers; 0 when pooling is off.
    pub fn memory_usage(&self) -> usize {
        self.pool.as_ref().map_or(0, PooledBuffers::memory_usage)
    }

    /// Mean inference time over every successful run since initialization.
    pub fn average_inference_ms(&self) -> f64 {
        self.stats.average()
    }

    pub fn total_inferences(&self) -> u64 {
        self.stats.count()
    }
}

fn elapsed_ms(since: Instant) -> f32 {
    since.elapsed().as_secs_f32() * 1000.0
}

fn log_model_info(path: &Path, info: &ModelInfo) {
    for input in &info.inputs {
        log::info!(
            "DetectionEngine: {} input '{}' {:?}",
            path.display(),
            input.name,
            input.shape
        );
    }
    for output in &info.outputs {
        log::info!(
            "DetectionEngine: {} output '{}' {:?}",
            path.display(),
            output.name,
            output.shape
        );
    }
}

/// A pooled lease, or `None` when another call holds it and the caller
/// should use scratch memory.
fn pooled(lease: Result<BufferLease<'_>, PoolError>) -> Option<BufferLease<'_>> {
    match lease.map_err(DetectorError::from) {
        Ok(lease) => Some(lease),
        Err(e) => {
            log::debug!("DetectionEngine: {}, using scratch buffer", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use crate::detect::pool::BufferKind;
    use image::{Rgb, RgbImage};

    #[test]
    fn running_average_matches_arithmetic_mean() {
        let stats = InferenceStats::default();
        for ms in [2.0, 4.0, 9.0] {
            stats.record(ms);
        }
        assert_eq!(stats.count(), 3);
        assert!((stats.average() - 5.0).abs() < 1e-9);
        stats.reset();
        assert_eq!(stats.average(), 0.0);
    }

    #[test]
    fn format_from_channels() {
        assert_eq!(ModelFormat::from_channels(5), ModelFormat::SingleClass);
        assert_eq!(ModelFormat::from_channels(84), ModelFormat::Coco);
        assert_eq!(ModelFormat::from_channels(7), ModelFormat::Unknown(7));
    }

    #[test]
    fn busy_pool_falls_back_to_scratch_buffers() -> anyhow::Result<()> {
        let model = tempfile::NamedTempFile::new()?;
        let backend = StubBackend::with_balls(64, 64, &[[32.0, 32.0, 10.0, 10.0, 0.9]]);
        let mut engine = DetectionEngine::new(
            ModelConfig {
                input_width: 64,
                input_height: 64,
                use_thread_affinity: false,
                ..ModelConfig::default()
            }
            .with_model_path(model.path()),
            Arc::new(backend),
        );
        assert!(engine.initialize());

        let image = RgbImage::from_pixel(64, 64, Rgb([90, 90, 90]));
        let frame = ImageFrame::from_rgb(&image);
        let expected = engine.detect(&frame, None);
        assert_eq!(expected.len(), 1);

        let pool = engine.pool.as_ref().expect("pool enabled by default");
        let held_input = pool.acquire_input(engine.config().input_len())?;
        let held_output = pool.acquire_output()?;
        assert_eq!(engine.detect(&frame, None), expected);
        assert!(pool.is_in_use(BufferKind::Input));
        drop((held_input, held_output));

        assert!(!pool.is_in_use(BufferKind::Input));
        assert!(!pool.is_in_use(BufferKind::Output));
        assert_eq!(engine.total_inferences(), 2);
        Ok(())
    }
}
