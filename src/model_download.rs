use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

/// A landmark model the detector needs on disk, fetched on first use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelAsset {
    pub label: &'static str,
    pub filename: &'static str,
    pub url: &'static str,
}

pub const PALM_DETECTOR: ModelAsset = ModelAsset {
    label: "palm detector",
    filename: "palm_detection_mediapipe_2023feb.onnx",
    url: "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/palm_detection_mediapipe_2023feb.onnx",
};

pub const HANDPOSE_ESTIMATOR: ModelAsset = ModelAsset {
    label: "handpose estimator",
    filename: "handpose_estimation_mediapipe_2023feb.onnx",
    url: "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx",
};

impl ModelAsset {
    pub fn path_in(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.filename)
    }
}

/// Returns the asset's path under `model_dir`, downloading it first if absent.
pub fn ensure_model_ready(model_dir: &Path, asset: &ModelAsset) -> Result<PathBuf> {
    let dest = asset.path_in(model_dir);
    if dest.exists() {
        log::debug!("{} model present at {}", asset.label, dest.display());
        return Ok(dest);
    }

    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create model directory {}", model_dir.display()))?;
    download_to_path(asset, &dest)
        .with_context(|| format!("failed to download {} model to {}", asset.label, dest.display()))?;
    Ok(dest)
}

fn download_to_path(asset: &ModelAsset, dest: &Path) -> Result<()> {
    log::info!(
        "downloading {} model from {} to {}",
        asset.label,
        asset.url,
        dest.display()
    );

    let mut response = Client::new()
        .get(asset.url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let progress = progress_bar(response.content_length());
    persist_download(&mut response, dest, &progress)?;
    progress.finish_with_message(format!("{} model ready", asset.label));
    Ok(())
}

/// Streams `source` into a sibling temp file and renames it over `dest`.
/// A failed transfer removes the temp file so a retry starts clean.
fn persist_download(source: &mut impl Read, dest: &Path, progress: &ProgressBar) -> Result<()> {
    let tmp_path = dest.with_extension("download");
    let written = write_then_rename(source, &tmp_path, dest, progress);
    if written.is_err() {
        if let Err(err) = fs::remove_file(&tmp_path) {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!("failed to remove partial download {}: {err}", tmp_path.display());
            }
        }
    }
    written
}

fn write_then_rename(
    source: &mut impl Read,
    tmp_path: &Path,
    dest: &Path,
    progress: &ProgressBar,
) -> Result<()> {
    let mut file = fs::File::create(tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buffer = [0u8; 16 * 1024];
    loop {
        let read = source
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .context("failed while writing model to disk")?;
        progress.inc(read as u64);
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(tmp_path, dest).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model {bytes}") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_model_is_used_without_download() {
        let dir = std::env::temp_dir().join(format!("signstream-models-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let asset = ModelAsset {
            label: "test",
            filename: "present.onnx",
            url: "http://127.0.0.1:9/unreachable.onnx",
        };
        fs::write(asset.path_in(&dir), b"onnx").unwrap();

        let path = ensure_model_ready(&dir, &asset).unwrap();
        assert_eq!(path, dir.join("present.onnx"));
        fs::remove_dir_all(&dir).unwrap();
    }

    /// Yields a few bytes, then fails like a dropped connection.
    struct CutOff {
        sent: bool,
    }

    impl Read for CutOff {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"onnx");
            Ok(4)
        }
    }

    #[test]
    fn interrupted_download_leaves_no_partial_file() {
        let dir = std::env::temp_dir().join(format!("signstream-partial-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let dest = dir.join("model.onnx");

        let result = persist_download(&mut CutOff { sent: false }, &dest, &ProgressBar::hidden());
        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("download").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn completed_download_is_moved_into_place() {
        let dir = std::env::temp_dir().join(format!("signstream-complete-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let dest = dir.join("model.onnx");

        persist_download(&mut &b"onnx bytes"[..], &dest, &ProgressBar::hidden()).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"onnx bytes");
        assert!(!dest.with_extension("download").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn landmark_models_live_under_model_dir() {
        let dir = Path::new("models");
        assert_eq!(
            PALM_DETECTOR.path_in(dir),
            dir.join("palm_detection_mediapipe_2023feb.onnx")
        );
        assert!(HANDPOSE_ESTIMATOR.url.ends_with(HANDPOSE_ESTIMATOR.filename));
    }
}
