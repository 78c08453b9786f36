//! Pixel format normalisation into the recognizer's luma buffer

use tracing::trace;
use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::frame::{CaptureFrame, FrameFormat, LumaImage};
use crate::error::ConvertError;

/// Reject a destination whose rows would run past the end of `dst`
fn check_destination(
    dst: &[u8],
    dst_stride: usize,
    width: usize,
    height: usize,
) -> Result<(), ConvertError> {
    let needed = match height {
        0 => 0,
        h => dst_stride.saturating_mul(h - 1).saturating_add(width),
    };
    if dst_stride < width || dst.len() < needed {
        return Err(ConvertError::Destination {
            width,
            height,
            stride: dst_stride,
            len: dst.len(),
        });
    }
    Ok(())
}

/// Copy the luma byte of every YUYV sample into `dst`.
///
/// Source rows are `src_stride` bytes apart with samples at even offsets;
/// chroma bytes are never read.
pub fn yuyv_to_luma(
    src: &[u8],
    src_stride: usize,
    width: usize,
    height: usize,
    dst: &mut [u8],
    dst_stride: usize,
) -> Result<(), ConvertError> {
    check_destination(dst, dst_stride, width, height)?;

    let src_stride = src_stride.max(width * 2);
    let expected = if height == 0 {
        0
    } else {
        src_stride * (height - 1) + width * 2
    };
    if src.len() < expected {
        return Err(ConvertError::Truncated {
            expected,
            actual: src.len(),
        });
    }

    for y in 0..height {
        let src_row = &src[y * src_stride..y * src_stride + width * 2];
        let dst_row = &mut dst[y * dst_stride..y * dst_stride + width];
        for (out, pair) in dst_row.iter_mut().zip(src_row.chunks_exact(2)) {
            *out = pair[0];
        }
    }

    Ok(())
}

/// Decompresses MJPEG frames directly to luma.
///
/// Keeps one scratch buffer that only grows, so steady-state decoding
/// does not allocate.
#[derive(Default)]
pub struct MjpegDecoder {
    scratch: Vec<u8>,
}

impl MjpegDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `data` into `dst` at the given geometry.
    ///
    /// The overlapping region of the decoded image is copied, anything
    /// outside it is cleared to black.
    pub fn decode_gray(
        &mut self,
        data: &[u8],
        dst: &mut [u8],
        dst_stride: usize,
        width: usize,
        height: usize,
    ) -> Result<(), ConvertError> {
        check_destination(dst, dst_stride, width, height)?;

        let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::Luma);
        let mut decoder = JpegDecoder::new_with_options(data, options);
        decoder
            .decode_headers()
            .map_err(|e| ConvertError::Jpeg(format!("{e:?}")))?;

        let (src_w, src_h) = decoder
            .dimensions()
            .ok_or_else(|| ConvertError::Jpeg("missing frame header".into()))?;
        let needed = decoder
            .output_buffer_size()
            .ok_or_else(|| ConvertError::Jpeg("missing frame header".into()))?;

        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0);
        }
        decoder
            .decode_into(&mut self.scratch[..needed])
            .map_err(|e| ConvertError::Jpeg(format!("{e:?}")))?;

        if (src_w, src_h) != (width, height) {
            trace!(src_w, src_h, width, height, "MJPEG geometry differs from target");
        }

        let copy_w = src_w.min(width);
        for y in 0..height {
            let dst_row = &mut dst[y * dst_stride..y * dst_stride + width];
            if y < src_h {
                let src_row = &self.scratch[y * src_w..y * src_w + copy_w];
                dst_row[..copy_w].copy_from_slice(src_row);
                dst_row[copy_w..].fill(0);
            } else {
                dst_row.fill(0);
            }
        }

        Ok(())
    }
}

/// Convert one captured frame into `dst`, choosing the path by format.
pub fn convert(
    mjpeg: &mut MjpegDecoder,
    frame: &CaptureFrame<'_>,
    dst: &mut LumaImage,
) -> Result<(), ConvertError> {
    let width = dst.width();
    let height = dst.height();
    let stride = dst.stride();

    match frame.params.format {
        FrameFormat::Yuyv => yuyv_to_luma(
            frame.data,
            frame.params.stride as usize,
            width,
            height,
            dst.as_bytes_mut(),
            stride,
        ),
        FrameFormat::Mjpeg => {
            mjpeg.decode_gray(frame.data, dst.as_bytes_mut(), stride, width, height)
        }
        FrameFormat::Unsupported(_) => Err(ConvertError::UnsupportedFormat(frame.params.format)),
    }
}
