//! Recorded detection feed: one JSON frame per line.
//!
//! ```text
//! {"width":640,"height":480,"faces":[{"box":{...},"landmarks":[...68 points],"descriptor":[...]}]}
//! ```
//!
//! Splits into a [`CaptureSource`] that hands out frame numbers and a
//! [`FaceDetector`] that answers with the recorded faces for each number.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use facegate_core::{DetectedFace, FrameInput};
use thiserror::Error;

use crate::detector::{CaptureSource, DetectorError, FaceDetector, Frame};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read replay feed {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid frame on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ReplayFeed {
    frames: Vec<FrameInput>,
}

impl ReplayFeed {
    pub fn new(frames: Vec<FrameInput>) -> Self {
        Self { frames }
    }

    pub fn open(path: &Path) -> Result<Self, ReplayError> {
        let file = std::fs::File::open(path).map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let feed = Self::from_reader(std::io::BufReader::new(file)).map_err(|e| match e {
            ReplayError::Io { source, .. } => ReplayError::Io {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        tracing::info!(path = %path.display(), frames = feed.len(), "replay feed loaded");
        Ok(feed)
    }

    /// Parse JSON lines; blank lines are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ReplayError> {
        let mut frames = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ReplayError::Io {
                path: "<reader>".to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let frame = serde_json::from_str(&line).map_err(|source| ReplayError::Parse {
                line: idx + 1,
                source,
            })?;
            frames.push(frame);
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn into_parts(self) -> (ReplayCapture, ReplayDetector) {
        let frames = Arc::new(self.frames);
        (
            ReplayCapture {
                frames: Arc::clone(&frames),
                next: 0,
                released: false,
            },
            ReplayDetector { frames },
        )
    }
}

pub struct ReplayCapture {
    frames: Arc<Vec<FrameInput>>,
    next: usize,
    released: bool,
}

impl ReplayCapture {
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl CaptureSource for ReplayCapture {
    fn current_frame(&mut self) -> Result<Option<Frame>, DetectorError> {
        if self.released {
            return Err(DetectorError::Released);
        }
        let Some(input) = self.frames.get(self.next) else {
            return Ok(None);
        };
        let frame = Frame {
            sequence: self.next as u64,
            width: input.width,
            height: input.height,
            data: Vec::new(),
        };
        self.next += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if !self.released {
            tracing::debug!(frames_served = self.next, "replay capture released");
        }
        self.released = true;
    }
}

pub struct ReplayDetector {
    frames: Arc<Vec<FrameInput>>,
}

#[async_trait]
impl FaceDetector for ReplayDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError> {
        self.frames
            .get(frame.sequence as usize)
            .map(|input| input.faces.clone())
            .ok_or(DetectorError::MissingFrame(frame.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks_json() -> String {
        let points: Vec<String> = (0..68).map(|i| format!(r#"{{"x":{i}.0,"y":1.0}}"#)).collect();
        format!("[{}]", points.join(","))
    }

    fn feed_text() -> String {
        let face = format!(
            r#"{{"box":{{"x":220.0,"y":140.0,"width":200.0,"height":200.0}},"landmarks":{},"descriptor":[0.1,0.2]}}"#,
            landmarks_json()
        );
        format!(
            "{{\"width\":640,\"height\":480,\"faces\":[{face}]}}\n\n{{\"width\":640,\"height\":480,\"faces\":[]}}\n"
        )
    }

    #[test]
    fn test_parse_feed() {
        let feed = ReplayFeed::from_reader(feed_text().as_bytes()).unwrap();
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let text = format!("{}not json\n", feed_text());
        let err = ReplayFeed::from_reader(text.as_bytes()).unwrap_err();
        assert!(matches!(err, ReplayError::Parse { line: 4, .. }));
    }

    #[test]
    fn test_short_landmark_list_rejected() {
        let text = r#"{"width":640,"height":480,"faces":[{"box":{"x":0.0,"y":0.0,"width":1.0,"height":1.0},"landmarks":[{"x":0.0,"y":0.0}],"descriptor":[]}]}"#;
        assert!(ReplayFeed::from_reader(text.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn test_capture_and_detector_stay_in_step() {
        let feed = ReplayFeed::from_reader(feed_text().as_bytes()).unwrap();
        let (mut capture, detector) = feed.into_parts();

        let first = capture.current_frame().unwrap().unwrap();
        assert_eq!(detector.detect(&first).await.unwrap().len(), 1);
        let second = capture.current_frame().unwrap().unwrap();
        assert!(detector.detect(&second).await.unwrap().is_empty());
        assert!(capture.current_frame().unwrap().is_none());

        capture.release();
        assert!(capture.is_released());
        assert!(matches!(capture.current_frame(), Err(DetectorError::Released)));
    }
}
