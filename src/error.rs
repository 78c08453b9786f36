//! Error taxonomy for setup, per-frame and per-candidate failures

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::FrameFormat;

/// Rejected before the scan loop starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("expected WxH, found more than one separator in {0:?}")]
    ExtraSeparator(String),
    #[error("invalid character in size: {0:?}")]
    InvalidChar(char),
    #[error("invalid size: {width}x{height}")]
    SizeOutOfRange { width: u64, height: u64 },
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Capture device failures; all of these end the scan
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} does not support video capture")]
    NotCapture(PathBuf),
    #[error("failed to configure device: {0}")]
    Configure(#[source] io::Error),
    #[error("failed to start streaming: {0}")]
    Stream(#[source] io::Error),
    #[error("failed to dequeue frame: {0}")]
    Acquire(#[source] io::Error),
    #[error("failed to return frame to the driver: {0}")]
    Release(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unsupported frame format {0}")]
    UnsupportedFormat(FrameFormat),
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Jpeg(String),
    #[error("destination of {len} bytes cannot hold {width}x{height} at stride {stride}")]
    Destination {
        width: usize,
        height: usize,
        stride: usize,
        len: usize,
    },
}

impl ConvertError {
    /// Whether the scan loop can carry on with the next frame.
    ///
    /// A destination that does not fit the working geometry would fail the
    /// same way on every frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConvertError::UnsupportedFormat(_) | ConvertError::Destination { .. }
        )
    }
}

/// One candidate failed; the rest of the frame is unaffected
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no candidate at index {0}")]
    NoCandidate(usize),
    #[error("symbol decode failed: {0}")]
    Symbol(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("failed to write report: {0}")]
    Report(#[source] io::Error),
}
