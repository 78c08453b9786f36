use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;

/// Source pixel encodings a capture device can hand us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair
    Yuyv,
    /// Motion JPEG, one compressed image per buffer
    Mjpeg,
    /// Anything else the device negotiated, kept as its FourCC
    Unsupported([u8; 4]),
}

impl FrameFormat {
    pub fn from_fourcc(repr: [u8; 4]) -> Self {
        match &repr {
            b"YUYV" => FrameFormat::Yuyv,
            b"MJPG" => FrameFormat::Mjpeg,
            _ => FrameFormat::Unsupported(repr),
        }
    }

    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            FrameFormat::Yuyv => *b"YUYV",
            FrameFormat::Mjpeg => *b"MJPG",
            FrameFormat::Unsupported(repr) => *repr,
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = self.fourcc();
        write!(f, "{}", String::from_utf8_lossy(&repr))
    }
}

/// Negotiated stream parameters reported by a capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatParams {
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per source row
    pub stride: u32,
}

impl FormatParams {
    /// Fail early when no converter exists for the negotiated format
    pub fn ensure_supported(&self) -> Result<(), ConvertError> {
        match self.format {
            FrameFormat::Yuyv | FrameFormat::Mjpeg => Ok(()),
            FrameFormat::Unsupported(_) => Err(ConvertError::UnsupportedFormat(self.format)),
        }
    }
}

/// A driver-owned buffer, borrowed for one conversion call
#[derive(Debug, Clone, Copy)]
pub struct CaptureFrame<'a> {
    pub data: &'a [u8],
    pub params: FormatParams,
    /// Counter stamped by the source; gaps mean frames were dropped
    pub sequence: u64,
}

/// Single-channel 8-bit image whose storage is reused across frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaImage {
    data: Vec<u8>,
    width: usize,
    height: usize,
    stride: usize,
}

impl LumaImage {
    /// Allocate a zeroed image with `stride == width`
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_stride(width, height, width)
    }

    pub fn with_stride(width: usize, height: usize, stride: usize) -> Self {
        let stride = stride.max(width);
        Self {
            data: vec![0; stride * height],
            width,
            height,
            stride,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.stride + x]
    }
}
