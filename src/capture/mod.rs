pub mod convert;
pub mod frame;
pub mod v4l2;

pub use convert::{convert, yuyv_to_luma, MjpegDecoder};
pub use frame::{CaptureFrame, FormatParams, FrameFormat, LumaImage};
pub use v4l2::V4l2Capture;

use crate::error::CaptureError;

/// Acquire/release contract of a frame-producing device.
///
/// Every successful `acquire` must be paired with exactly one `release`.
/// Callers should go through [`CaptureSource::with_frame`], which does the
/// pairing for them.
pub trait CaptureSource {
    /// Currently negotiated format, size and stride
    fn params(&self) -> FormatParams;

    /// Block until the device has a filled buffer and borrow it
    fn acquire(&mut self) -> Result<CaptureFrame<'_>, CaptureError>;

    /// Hand the buffer from the last `acquire` back to the free pool
    fn release(&mut self) -> Result<(), CaptureError>;

    /// Run `f` over one frame, returning the buffer before handing back
    /// whatever `f` produced, errors included.
    fn with_frame<R, F>(&mut self, f: F) -> Result<R, CaptureError>
    where
        Self: Sized,
        F: FnOnce(&CaptureFrame<'_>) -> R,
    {
        let out = {
            let frame = self.acquire()?;
            f(&frame)
        };
        self.release()?;
        Ok(out)
    }
}
