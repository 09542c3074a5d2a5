//! Multipart MJPEG framing.
//!
//! Every part is three discrete writes on the open chunked response: the
//! boundary line, a header block with the exact payload length, and the JPEG
//! bytes. No frame is ever sent without a preceding exact-length header.

use core::fmt::Write;

pub const BOUNDARY: &str = "123456789000000000000987654321";

/// `Content-Type` of the stream response.
pub const CONTENT_TYPE: &str =
    "multipart/x-mixed-replace; boundary=123456789000000000000987654321";

/// Boundary line sent before each part.
pub const BOUNDARY_LINE: &str = "\r\n--123456789000000000000987654321\r\n";

/// Per-part header block. Stack-formatted; the largest possible header
/// ("Content-Length: " plus ten digits) fits well under 64 bytes.
pub fn part_header(payload_len: usize) -> heapless::String<64> {
    let mut header = heapless::String::new();
    // Only fails if the buffer is too small, which the size above rules out.
    let _ = write!(
        header,
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        payload_len
    );
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_names_boundary() {
        assert!(CONTENT_TYPE.ends_with(BOUNDARY));
        assert!(BOUNDARY_LINE.contains(BOUNDARY));
        assert!(BOUNDARY_LINE.starts_with("\r\n--"));
        assert!(BOUNDARY_LINE.ends_with("\r\n"));
    }

    #[test]
    fn part_header_declares_exact_length() {
        let header = part_header(18_342);
        assert_eq!(
            header.as_str(),
            "Content-Type: image/jpeg\r\nContent-Length: 18342\r\n\r\n"
        );
    }

    #[test]
    fn part_header_fits_max_length() {
        let header = part_header(usize::MAX.min(u32::MAX as usize));
        assert!(header.ends_with("\r\n\r\n"));
    }
}
