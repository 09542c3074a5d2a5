//! Raw-frame to JPEG conversion via the component's `frame2jpg`.
//!
//! JPEG frames pass through untouched. For raw formats the source buffer
//! goes back to the driver pool before the conversion outcome is reported,
//! so the pool is never starved by an encode failure.

use core::ffi::c_void;

use esp_idf_sys::camera;
use stream_core::fault::Fault;
use stream_core::frame::PixelFormat;
use stream_core::stream::{Frame, FrameEncoder, JpegFrame};

use super::CapturedFrame;

/// Quality factor handed to `frame2jpg` for raw-format conversions.
/// The sensor's own JPEG quality is configured separately.
pub const CONVERT_QUALITY: u8 = 80;

pub struct JpegConverter {
    quality: u8,
}

impl JpegConverter {
    pub fn new() -> Self {
        Self {
            quality: CONVERT_QUALITY,
        }
    }
}

impl Default for JpegConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap buffer allocated by `frame2jpg`; freed on drop.
pub struct JpegBuf {
    ptr: *mut u8,
    len: usize,
}

impl AsRef<[u8]> for JpegBuf {
    fn as_ref(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for JpegBuf {
    fn drop(&mut self) {
        unsafe {
            esp_idf_sys::heap_caps_free(self.ptr as *mut c_void);
        }
    }
}

impl FrameEncoder<CapturedFrame> for JpegConverter {
    type Owned = JpegBuf;

    fn ensure_jpeg(
        &mut self,
        frame: CapturedFrame,
    ) -> Result<JpegFrame<CapturedFrame, JpegBuf>, Fault> {
        if frame.pixel_format() == PixelFormat::Jpeg {
            return Ok(JpegFrame::Borrowed(frame));
        }

        let mut out: *mut u8 = core::ptr::null_mut();
        let mut out_len: usize = 0;
        let ok = unsafe { camera::frame2jpg(frame.raw(), self.quality, &mut out, &mut out_len) };
        // Return the source buffer before reporting; the converted copy
        // stands alone.
        drop(frame);

        if !ok || out.is_null() {
            return Err(Fault::EncodeFailed);
        }
        Ok(JpegFrame::Owned(JpegBuf {
            ptr: out,
            len: out_len,
        }))
    }
}
