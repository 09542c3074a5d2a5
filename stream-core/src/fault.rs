use core::fmt;

/// Faults the streaming pipeline distinguishes between.
///
/// `HardwareInit` is fatal at boot. The other kinds are contained to the
/// current response: they abort it without crashing the acquisition loop or
/// corrupting the buffer-pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The sensor driver rejected the configuration.
    HardwareInit,
    /// The driver produced no frame before its capture deadline.
    CaptureTimeout,
    /// JPEG conversion of a raw frame failed.
    EncodeFailed,
    /// The transport rejected a chunk (peer gone or listener stopped).
    SendFailed,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::HardwareInit => write!(f, "sensor configuration rejected"),
            Fault::CaptureTimeout => write!(f, "capture timed out"),
            Fault::EncodeFailed => write!(f, "JPEG conversion failed"),
            Fault::SendFailed => write!(f, "network send failed"),
        }
    }
}

impl std::error::Error for Fault {}
