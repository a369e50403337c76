use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};

use super::{
    rgb_converter,
    source::{CaptureError, FrameSource},
};
use crate::types::Frame;

const MAX_CONSECUTIVE_FAILURES: u32 = 30;
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(5);

// Formats we can convert without going through nokhwa's own decoder, cheapest
// first. Some built-in cameras advertise YUYV but refuse to stream it.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::MJPEG,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::GRAY,
];

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: info.human_name(),
        })
        .collect())
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;
    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("no requested camera format was accepted")))
}

/// Camera owned by a capture thread. Frames go through a one-slot channel so
/// the reader always sees the newest one.
#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    frames: Receiver<Result<Frame, CaptureError>>,
    stall_timeout: Duration,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    /// Opens the camera on its capture thread and waits for the result, so a
    /// missing device fails here rather than on the first read.
    pub fn open(index: CameraIndex, stall_timeout: Duration) -> Result<Self, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frames) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);

        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_loop(index, stop_flag, frame_tx, ready_tx))
            .map_err(|err| CaptureError::Open(format!("failed to spawn capture thread: {err}")))?;

        let mut stream = Self {
            stop,
            frames,
            stall_timeout,
            handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(Ok(label)) => {
                log::info!("camera opened: {label}");
                Ok(stream)
            }
            Ok(Err(reason)) => Err(CaptureError::Open(reason)),
            Err(_) => {
                stream.shutdown();
                Err(CaptureError::Open("capture thread exited during open".into()))
            }
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblocks a capture thread waiting to hand over its final error.
        self.frames = crossbeam_channel::never();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl FrameSource for CameraStream {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let mut latest = match self.frames.recv_timeout(self.stall_timeout) {
            Ok(item) => item?,
            Err(RecvTimeoutError::Timeout) => return Err(CaptureError::Stalled(self.stall_timeout)),
            Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Disconnected),
        };
        while let Ok(item) = self.frames.try_recv() {
            latest = item?;
        }
        Ok(Some(latest))
    }
}

fn capture_loop(
    index: CameraIndex,
    stop: Arc<AtomicBool>,
    frame_tx: Sender<Result<Frame, CaptureError>>,
    ready_tx: Sender<Result<String, String>>,
) {
    let mut camera = match build_camera(index.clone()) {
        Ok(camera) => {
            let format = camera.camera_format();
            let _ = ready_tx.send(Ok(format!(
                "{} ({}x{} {:?} @ {} fps)",
                camera.info().human_name(),
                format.width(),
                format.height(),
                format.format(),
                format.frame_rate()
            )));
            camera
        }
        Err(err) => {
            let _ = ready_tx.send(Err(format!("camera {index}: {err:#}")));
            return;
        }
    };
    drop(ready_tx);

    let mut failures = 0u32;
    while !stop.load(Ordering::Relaxed) {
        let decoded = camera
            .frame()
            .map_err(|err| err.to_string())
            .and_then(|buffer| {
                rgb_converter::convert_camera_frame(&buffer).map_err(|err| format!("{err:#}"))
            });

        let image = match decoded {
            Ok(image) => {
                failures = 0;
                image
            }
            Err(last) => {
                failures += 1;
                log::warn!("camera read failed ({failures}/{MAX_CONSECUTIVE_FAILURES}): {last}");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    let _ = frame_tx.send(Err(CaptureError::Read {
                        attempts: failures,
                        last,
                    }));
                    break;
                }
                continue;
            }
        };

        let frame = Frame::new(image.rgb, image.width, image.height);
        match frame_tx.try_send(Ok(frame)) {
            // Reader is mid-frame; it will pick up a newer one.
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => break,
        }
    }

    if let Err(err) = camera.stop_stream() {
        log::warn!("failed to stop camera stream: {err}");
    }
    log::debug!("camera capture thread exiting");
}
