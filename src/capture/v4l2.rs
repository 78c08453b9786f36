//! V4L2 capture over memory-mapped driver buffers

use std::ffi::c_void;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::{mem, slice};

use tracing::{info, instrument, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::device::Handle;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC, Memory};

use super::frame::{CaptureFrame, FormatParams, FrameFormat};
use super::CaptureSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

/// One driver buffer mapped into this process
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

/// Driver-owned capture buffers, queued and dequeued by index.
///
/// Unlike `v4l`'s own mmap stream, a buffer goes back to the driver only
/// when [`BufferPool::queue`] is called for it, so the borrow handed out
/// by `acquire` stays valid until `release`.
struct BufferPool {
    handle: Arc<Handle>,
    bufs: Vec<Mapping>,
    streaming: bool,
}

fn buffer_desc() -> v4l2_buffer {
    v4l2_buffer {
        type_: Type::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        ..unsafe { mem::zeroed() }
    }
}

fn request_buffers(handle: &Handle, count: u32) -> io::Result<u32> {
    let mut req = v4l2_requestbuffers {
        count,
        type_: Type::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        ..unsafe { mem::zeroed() }
    };
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_REQBUFS,
            &mut req as *mut _ as *mut c_void,
        )?;
    }
    Ok(req.count)
}

impl BufferPool {
    /// Ask the driver for `count` buffers and map whatever it grants
    fn map(handle: Arc<Handle>, count: u32) -> io::Result<Self> {
        let granted = request_buffers(&handle, count)?;
        let mut pool = Self {
            handle,
            bufs: Vec::with_capacity(granted as usize),
            streaming: false,
        };

        // A failure part way through unmaps what was mapped so far on drop
        for index in 0..granted {
            let mut buf = v4l2_buffer {
                index,
                ..buffer_desc()
            };
            unsafe {
                v4l2::ioctl(
                    pool.handle.fd(),
                    v4l2::vidioc::VIDIOC_QUERYBUF,
                    &mut buf as *mut _ as *mut c_void,
                )?;

                let ptr = v4l2::mmap(
                    ptr::null_mut(),
                    buf.length as usize,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    pool.handle.fd(),
                    buf.m.offset as libc::off_t,
                )?;
                let ptr = NonNull::new(ptr as *mut u8)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
                pool.bufs.push(Mapping {
                    ptr,
                    len: buf.length as usize,
                });
            }
        }

        Ok(pool)
    }

    fn len(&self) -> usize {
        self.bufs.len()
    }

    /// Hand buffer `index` to the driver to be filled
    fn queue(&self, index: usize) -> io::Result<()> {
        let mut buf = v4l2_buffer {
            index: index as u32,
            ..buffer_desc()
        };
        unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::VIDIOC_QBUF,
                &mut buf as *mut _ as *mut c_void,
            )
        }
    }

    /// Wait for a filled buffer and take it off the driver's queue
    fn dequeue(&self) -> io::Result<v4l2_buffer> {
        // The device is non-blocking, so wait for it before DQBUF
        loop {
            match self.handle.poll(libc::POLLIN, -1) {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let mut buf = buffer_desc();
        unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut buf as *mut _ as *mut c_void,
            )?;
        }
        Ok(buf)
    }

    fn set_streaming(&mut self, on: bool) -> io::Result<()> {
        let request = if on {
            v4l2::vidioc::VIDIOC_STREAMON
        } else {
            v4l2::vidioc::VIDIOC_STREAMOFF
        };
        let mut typ = Type::VideoCapture as u32;
        unsafe {
            v4l2::ioctl(self.handle.fd(), request, &mut typ as *mut _ as *mut c_void)?;
        }
        self.streaming = on;
        Ok(())
    }

    /// Filled part of buffer `index`, or `None` for an index we never mapped
    fn bytes(&self, index: usize, used: usize) -> Option<&[u8]> {
        let mapping = self.bufs.get(index)?;
        // The mapping lives until drop and the driver does not write to a
        // dequeued buffer until it is queued again
        let data = unsafe { slice::from_raw_parts(mapping.ptr.as_ptr(), mapping.len) };
        Some(&data[..used.min(mapping.len)])
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if self.streaming {
            if let Err(e) = self.set_streaming(false) {
                warn!("Failed to stop streaming: {}", e);
            }
        }
        for mapping in self.bufs.drain(..) {
            let unmapped =
                unsafe { v4l2::munmap(mapping.ptr.as_ptr() as *mut c_void, mapping.len) };
            if let Err(e) = unmapped {
                warn!("Failed to unmap capture buffer: {}", e);
            }
        }
        // ENODEV here just means the camera was unplugged
        if let Err(e) = request_buffers(&self.handle, 0) {
            warn!("Failed to free capture buffers: {}", e);
        }
    }
}

/// V4L2 device streaming through mmap buffers.
///
/// The buffer pool is declared before the device so it is torn down first.
pub struct V4l2Capture {
    pool: BufferPool,
    _device: Device, // Held open for as long as the buffers are mapped
    params: FormatParams,
    held: Option<usize>,
}

impl V4l2Capture {
    /// Open and configure the device, map its buffers and start streaming
    #[instrument(skip(config), fields(device = %config.device.display()))]
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let device = Device::with_path(&config.device).map_err(|source| CaptureError::Open {
            path: config.device.clone(),
            source,
        })?;

        let caps = device.query_caps().map_err(CaptureError::Configure)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE)
            || !caps.capabilities.contains(CapFlags::STREAMING)
        {
            return Err(CaptureError::NotCapture(config.device.clone()));
        }

        let mut fmt = device.format().map_err(CaptureError::Configure)?;
        fmt.width = config.width;
        fmt.height = config.height;
        if let Some(fourcc) = preferred_fourcc(&device) {
            fmt.fourcc = fourcc;
        } else {
            warn!(fourcc = %fmt.fourcc, "Device offers neither MJPEG nor YUYV");
        }
        let fmt = device.set_format(&fmt).map_err(CaptureError::Configure)?;

        if config.fps > 0 {
            if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
                // Some drivers have a fixed frame interval
                warn!("Failed to set frame rate to {}: {}", config.fps, e);
            }
        }

        let params = FormatParams {
            format: FrameFormat::from_fourcc(fmt.fourcc.repr),
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
        };
        info!(
            format = %params.format,
            width = params.width,
            height = params.height,
            stride = params.stride,
            "Negotiated capture format"
        );

        let mut pool =
            BufferPool::map(device.handle(), config.buffer_count).map_err(CaptureError::Stream)?;
        if pool.len() == 0 {
            return Err(CaptureError::Stream(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "driver granted no capture buffers",
            )));
        }
        for index in 0..pool.len() {
            pool.queue(index).map_err(CaptureError::Stream)?;
        }
        pool.set_streaming(true).map_err(CaptureError::Stream)?;
        info!(
            "Capture stream started with {} of {} requested buffers",
            pool.len(),
            config.buffer_count
        );

        Ok(Self {
            pool,
            _device: device,
            params,
            held: None,
        })
    }
}

fn preferred_fourcc(device: &Device) -> Option<FourCC> {
    let formats = device.enum_formats().ok()?;
    let mjpeg = FourCC::new(b"MJPG");
    let yuyv = FourCC::new(b"YUYV");

    if formats.iter().any(|d| d.fourcc == mjpeg) {
        Some(mjpeg)
    } else if formats.iter().any(|d| d.fourcc == yuyv) {
        Some(yuyv)
    } else {
        None
    }
}

impl CaptureSource for V4l2Capture {
    fn params(&self) -> FormatParams {
        self.params
    }

    fn acquire(&mut self) -> Result<CaptureFrame<'_>, CaptureError> {
        if let Some(index) = self.held {
            return Err(CaptureError::Acquire(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer {index} was never released"),
            )));
        }

        let buf = self.pool.dequeue().map_err(CaptureError::Acquire)?;
        let index = buf.index as usize;
        self.held = Some(index);

        let data = self.pool.bytes(index, buf.bytesused as usize).ok_or_else(|| {
            CaptureError::Acquire(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned unknown buffer {index}"),
            ))
        })?;
        trace!(index, sequence = buf.sequence, bytes = data.len(), "Dequeued frame");

        Ok(CaptureFrame {
            data,
            params: self.params,
            sequence: u64::from(buf.sequence),
        })
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        let index = self.held.take().ok_or_else(|| {
            CaptureError::Release(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no frame is held",
            ))
        })?;
        self.pool.queue(index).map_err(CaptureError::Release)?;
        trace!(index, "Re-queued buffer");
        Ok(())
    }
}
