use thiserror::Error;

use crate::types::Frame;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture device: {0}")]
    Open(String),
    #[error("capture read failed {attempts} times in a row: {last}")]
    Read { attempts: u32, last: String },
    #[error("no frame received for {0:?}")]
    Stalled(std::time::Duration),
    #[error("capture thread went away")]
    Disconnected,
}

/// The single capture resource. Only the frame pipeline reads from it.
pub trait FrameSource: Send + 'static {
    /// Blocks for the next frame; `Ok(None)` means the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

impl FrameSource for Box<dyn FrameSource> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).next_frame()
    }
}
