//! detect_image - Run the ball detector on still images.
//!
//! Prints one JSON object per image: the detections in original-image pixel
//! coordinates plus timing for that image.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;

use launch_monitor_core::config::LaunchMonitorConfig;
use launch_monitor_core::detect::{
    BackendRegistry, Detection, DetectionEngine, PerformanceMetrics, PreprocessingPool,
};
use launch_monitor_core::frame::ImageFrame;

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect golf balls in still images")]
struct Args {
    /// Images to scan.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// ONNX model. Overrides the config file.
    #[arg(long, env = "LAUNCH_MONITOR_MODEL_PATH")]
    model: Option<PathBuf>,

    /// Minimum confidence. Overrides the config file.
    #[arg(long)]
    confidence: Option<f32>,

    /// Inference backend name.
    #[arg(long)]
    backend: Option<String>,

    /// Letterbox several images on worker threads before inference.
    #[arg(long, default_value = "0")]
    preprocess_threads: usize,
}

#[derive(Serialize)]
struct ImageReport<'a> {
    image: &'a str,
    width: u32,
    height: u32,
    detections: Vec<Detection>,
    metrics: PerformanceMetrics,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = LaunchMonitorConfig::load()?;
    if let Some(model) = args.model {
        cfg.model.model_path = model;
    }
    if let Some(confidence) = args.confidence {
        cfg.model.confidence_threshold = confidence;
    }

    let registry = BackendRegistry::with_builtin();
    let mut engine = match args.backend.as_deref() {
        Some(name) => {
            let backend = registry.get(name).ok_or_else(|| {
                anyhow!("unknown backend {} (have {:?})", name, registry.list())
            })?;
            DetectionEngine::new(cfg.model.clone(), backend)
        }
        None => DetectionEngine::from_registry(cfg.model.clone(), &registry)?,
    };
    if !engine.initialize() {
        return Err(anyhow!(
            "detector failed to initialize with {}",
            cfg.model.model_path.display()
        ));
    }

    let mut images = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let image = image::open(path)
            .with_context(|| format!("open image {}", path.display()))?
            .into_rgb8();
        images.push(image);
    }

    let names: Vec<String> = args
        .images
        .iter()
        .map(|path| path.display().to_string())
        .collect();

    if args.preprocess_threads > 0 && images.len() > 1 {
        let pool =
            PreprocessingPool::new(args.preprocess_threads, cfg.model.use_simd_preprocessing);
        let sizes: Vec<(u32, u32)> = images.iter().map(|image| image.dimensions()).collect();
        let prepared =
            pool.preprocess_batch(images, cfg.model.input_width, cfg.model.input_height);
        for ((name, (width, height)), prepared) in names.iter().zip(sizes).zip(prepared) {
            let prepared = prepared.with_context(|| format!("preprocess {}", name))?;
            let mut metrics = PerformanceMetrics::default();
            let detections = engine.detect_preprocessed(&prepared, Some(&mut metrics));
            print_report(ImageReport {
                image: name,
                width,
                height,
                detections,
                metrics,
            })?;
        }
    } else {
        for (name, image) in names.iter().zip(&images) {
            let mut metrics = PerformanceMetrics::default();
            let detections = engine.detect(&ImageFrame::from_rgb(image), Some(&mut metrics));
            print_report(ImageReport {
                image: name,
                width: image.width(),
                height: image.height(),
                detections,
                metrics,
            })?;
        }
    }

    log::info!(
        "detect_image: {} inference(s), average {:.2} ms",
        engine.total_inferences(),
        engine.average_inference_ms()
    );
    Ok(())
}

fn print_report(report: ImageReport<'_>) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&report).context("serialize detections")?
    );
    Ok(())
}
