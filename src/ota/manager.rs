//! Low-level OTA partition writer over the `esp_ota_*` interface.

use core::ffi::c_void;
use core::fmt;

use esp_idf_sys::{
    esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_handle_t, esp_ota_set_boot_partition, esp_ota_write, esp_partition_t,
};
use log::info;

/// Upper bound on an accepted image; larger than any app slot on this board.
pub const MAX_FIRMWARE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    InvalidSize,
    NoUpdatePartition,
    BeginFailed,
    WriteFailed,
    ValidationFailed,
    BootPartitionFailed,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaError::InvalidSize => write!(f, "firmware size out of range"),
            OtaError::NoUpdatePartition => write!(f, "no update partition available"),
            OtaError::BeginFailed => write!(f, "failed to begin OTA session"),
            OtaError::WriteFailed => write!(f, "failed to write firmware chunk"),
            OtaError::ValidationFailed => write!(f, "firmware image validation failed"),
            OtaError::BootPartitionFailed => write!(f, "failed to set boot partition"),
        }
    }
}

impl std::error::Error for OtaError {}

/// An open OTA session. Dropping an unfinished writer aborts the session
/// and releases the partition handle.
pub struct OtaWriter {
    partition: *const esp_partition_t,
    handle: esp_ota_handle_t,
    expected: usize,
    written: usize,
    finished: bool,
}

impl OtaWriter {
    pub fn begin(expected: usize) -> Result<Self, OtaError> {
        if expected == 0 || expected > MAX_FIRMWARE_BYTES {
            return Err(OtaError::InvalidSize);
        }
        let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(OtaError::NoUpdatePartition);
        }
        let mut handle: esp_ota_handle_t = Default::default();
        let err = unsafe { esp_ota_begin(partition, expected as _, &mut handle) };
        if err != esp_idf_sys::ESP_OK {
            return Err(OtaError::BeginFailed);
        }
        info!("OTA session opened, expecting {expected} bytes");
        Ok(Self {
            partition,
            handle,
            expected,
            written: 0,
            finished: false,
        })
    }

    pub fn write(&mut self, chunk: &[u8]) -> Result<(), OtaError> {
        let err = unsafe { esp_ota_write(self.handle, chunk.as_ptr() as *const c_void, chunk.len() as _) };
        if err != esp_idf_sys::ESP_OK {
            return Err(OtaError::WriteFailed);
        }
        self.written += chunk.len();
        Ok(())
    }

    pub fn progress_pct(&self) -> u8 {
        ((self.written as u64 * 100) / self.expected.max(1) as u64).min(100) as u8
    }

    /// Validates the received image and marks it bootable.
    pub fn finish(mut self) -> Result<(), OtaError> {
        self.finished = true;
        let err = unsafe { esp_ota_end(self.handle) };
        if err != esp_idf_sys::ESP_OK {
            return Err(OtaError::ValidationFailed);
        }
        let err = unsafe { esp_ota_set_boot_partition(self.partition) };
        if err != esp_idf_sys::ESP_OK {
            return Err(OtaError::BootPartitionFailed);
        }
        info!("OTA complete: {} bytes written, boot partition set", self.written);
        Ok(())
    }
}

impl Drop for OtaWriter {
    fn drop(&mut self) {
        if !self.finished {
            unsafe {
                esp_ota_abort(self.handle);
            }
        }
    }
}
