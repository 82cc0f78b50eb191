//! Capture and detection boundaries.
//!
//! The face detector is a black box: one frame in, every face it found
//! out. Capture hands the loop whatever frame is current; it does not queue.

use async_trait::async_trait;
use facegate_core::DetectedFace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("capture device error: {0}")]
    Capture(String),
    #[error("capture device already released")]
    Released,
    #[error("detector failed: {0}")]
    Detection(String),
    #[error("no recorded detections for frame {0}")]
    MissingFrame(u64),
}

/// A captured frame. `data` is opaque to the loop.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A camera or equivalent frame source owned by one session.
pub trait CaptureSource: Send {
    /// The current frame, or `None` once the source has ended.
    fn current_frame(&mut self) -> Result<Option<Frame>, DetectorError>;

    /// Release the underlying device. Called exactly once when the session
    /// loop exits.
    fn release(&mut self);
}

#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError>;
}
