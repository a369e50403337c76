mod classifier;
mod config;
mod detector;
mod model_download;
mod pipeline;
mod server;
mod sinks;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};

use classifier::OnnxClassifier;
use config::AppConfig;
use detector::OrtHandDetector;
use model_download::{HANDPOSE_ESTIMATOR, PALM_DETECTOR, ensure_model_ready};
use pipeline::{FrameSource, PipelineHub};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_args()?;
    if config.list_cameras {
        return list_cameras();
    }

    let classifier = OnnxClassifier::load(&config.classifier_path)?;
    let palm_model = ensure_model_ready(&config.model_dir, &PALM_DETECTOR)?;
    let handpose_model = ensure_model_ready(&config.model_dir, &HANDPOSE_ESTIMATOR)?;
    let detector = OrtHandDetector::load(&palm_model, &handpose_model, config.detector_config())?;

    let source = open_camera(&config)?;
    let hub = Arc::new(PipelineHub::new());
    let pipeline = pipeline::start_pipeline(
        source,
        detector,
        classifier,
        config.pipeline_config(),
        hub.clone(),
    )?;

    let served = server::run(&config, hub);
    pipeline.stop();
    log::info!("pipeline and camera released");
    served
}

#[cfg(feature = "camera-nokhwa")]
fn open_camera(config: &AppConfig) -> Result<Box<dyn FrameSource>> {
    use nokhwa::utils::CameraIndex;

    let camera = pipeline::camera::CameraStream::open(
        CameraIndex::Index(config.camera_index),
        pipeline::camera::DEFAULT_STALL_TIMEOUT,
    )
    .with_context(|| format!("failed to open camera {}", config.camera_index))?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn open_camera(config: &AppConfig) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "camera {} requested but this build has no camera backend (enable the `camera-nokhwa` feature)",
        config.camera_index
    )
}

#[cfg(feature = "camera-nokhwa")]
fn list_cameras() -> Result<()> {
    let cameras = pipeline::camera::available_cameras().context("failed to query cameras")?;
    if cameras.is_empty() {
        println!("no cameras found");
    }
    for camera in cameras {
        println!("{}\t{}", camera.index, camera.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn list_cameras() -> Result<()> {
    anyhow::bail!("camera listing needs the `camera-nokhwa` feature")
}
