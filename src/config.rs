//! Command-line configuration.
//!
//! `CliArgs` is what clap parses; `AppConfig` is the validated form the rest
//! of the binary consumes.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Parser;

use crate::{detector::DetectorConfig, pipeline::PipelineConfig};

#[derive(Debug, Parser)]
#[command(name = "signstream", version, about = "Live hand-sign recognition server")]
pub struct CliArgs {
    /// Address the HTTP server binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    #[arg(long, default_value_t = 5000)]
    pub port: u16,
    /// Capture device index.
    #[arg(long, default_value_t = 0)]
    pub camera: u32,
    /// ONNX export of the trained sign classifier.
    #[arg(long, value_name = "PATH", default_value = "models/sign_classifier.onnx")]
    pub classifier: PathBuf,
    /// Directory holding (or receiving) the landmark models.
    #[arg(long, value_name = "DIR", default_value = "models")]
    pub model_dir: PathBuf,
    /// Minimum gap between detections shown on the video stream.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub stream_throttle_ms: u64,
    /// Minimum gap between labels pushed over the socket.
    #[arg(long, value_name = "MS", default_value_t = 3000)]
    pub push_throttle_ms: u64,
    /// Use one throttle (the stream window) for both sinks.
    #[arg(long)]
    pub shared_throttle: bool,
    /// JPEG quality of streamed frames (1-100).
    #[arg(long, default_value_t = 80)]
    pub jpeg_quality: u8,
    #[arg(long, default_value_t = 0.8)]
    pub min_detection_confidence: f32,
    #[arg(long, default_value_t = 0.8)]
    pub min_tracking_confidence: f32,
    #[arg(long, default_value_t = 2)]
    pub max_hands: usize,
    /// Print the available cameras and exit.
    #[arg(long)]
    pub list_cameras: bool,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub camera_index: u32,
    pub classifier_path: PathBuf,
    pub model_dir: PathBuf,
    pub stream_window: Duration,
    pub push_window: Duration,
    pub shared_throttle: bool,
    pub jpeg_quality: u8,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub max_hands: usize,
    pub list_cameras: bool,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self> {
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be between 1 and 100");
        }
        check_unit("--min-detection-confidence", args.min_detection_confidence)?;
        check_unit("--min-tracking-confidence", args.min_tracking_confidence)?;
        if args.max_hands == 0 {
            bail!("--max-hands must be at least 1");
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            camera_index: args.camera,
            classifier_path: args.classifier,
            model_dir: args.model_dir,
            stream_window: Duration::from_millis(args.stream_throttle_ms),
            push_window: Duration::from_millis(args.push_throttle_ms),
            shared_throttle: args.shared_throttle,
            jpeg_quality: args.jpeg_quality,
            min_detection_confidence: args.min_detection_confidence,
            min_tracking_confidence: args.min_tracking_confidence,
            max_hands: args.max_hands,
            list_cameras: args.list_cameras,
        })
    }
}

fn check_unit(flag: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{flag} must be within [0, 1], got {value}");
    }
    Ok(())
}

impl AppConfig {
    pub fn from_args() -> Result<Self> {
        Self::try_from(CliArgs::parse())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            stream_window: self.stream_window,
            push_window: self.push_window,
            shared_throttle: self.shared_throttle,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            min_detection_confidence: self.min_detection_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
            max_hands: self.max_hands,
        }
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}
