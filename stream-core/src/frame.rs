//! Frame metadata shared between the sensor driver and the encoder.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Pixel format of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// JPEG compressed, streamed without re-encoding.
    #[default]
    Jpeg,
    /// RGB565 (16-bit).
    Rgb565,
    /// YUV422.
    Yuv422,
    /// 8-bit grayscale.
    Grayscale,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Jpeg => write!(f, "JPEG"),
            PixelFormat::Rgb565 => write!(f, "RGB565"),
            PixelFormat::Yuv422 => write!(f, "YUV422"),
            PixelFormat::Grayscale => write!(f, "grayscale"),
        }
    }
}

/// Sensor resolution presets supported by the OV2640.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameSize {
    /// 320x240
    #[default]
    Qvga,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
    /// 1024x768
    Xga,
    /// 1280x1024
    Sxga,
    /// 1600x1200
    Uxga,
}

impl FrameSize {
    pub fn width(&self) -> u32 {
        match self {
            FrameSize::Qvga => 320,
            FrameSize::Vga => 640,
            FrameSize::Svga => 800,
            FrameSize::Xga => 1024,
            FrameSize::Sxga => 1280,
            FrameSize::Uxga => 1600,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            FrameSize::Qvga => 240,
            FrameSize::Vga => 480,
            FrameSize::Svga => 600,
            FrameSize::Xga => 768,
            FrameSize::Sxga => 1024,
            FrameSize::Uxga => 1200,
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width(), self.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_dimensions() {
        assert_eq!(FrameSize::Qvga.width(), 320);
        assert_eq!(FrameSize::Qvga.height(), 240);
        assert_eq!(FrameSize::Uxga.to_string(), "1600x1200");
    }
}
