//! Capture format to display format mapping

use serde::{Deserialize, Serialize};

use crate::capture::Format;
use crate::error::{Error, Result};

/// Pixel layouts a display image can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayFormat {
    /// 8-bit single channel
    R8,
    /// 16-bit single channel
    R16,
    /// 24-bit RGB
    Rgb24,
    /// 32-bit RGBA
    Rgba32,
    /// 32-bit BGRA
    Bgra32,
}

impl DisplayFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            DisplayFormat::R8 => 1,
            DisplayFormat::R16 => 2,
            DisplayFormat::Rgb24 => 3,
            DisplayFormat::Rgba32 | DisplayFormat::Bgra32 => 4,
        }
    }

    /// Bytes in one tightly packed row
    pub fn row_bytes(self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }
}

/// Translate a capture format into the display format with the same byte layout.
///
/// No conversion is ever attempted: formats without an exact equivalent
/// (packed YUV, raw10, float XYZ, motion, `Any`) are rejected.
pub fn display_format(format: Format) -> Result<DisplayFormat> {
    match format {
        Format::Z16 => Ok(DisplayFormat::R16),
        Format::Disparity16 => Ok(DisplayFormat::R16),
        Format::Rgb8 => Ok(DisplayFormat::Rgb24),
        Format::Rgba8 => Ok(DisplayFormat::Rgba32),
        Format::Bgra8 => Ok(DisplayFormat::Bgra32),
        Format::Y8 => Ok(DisplayFormat::R8),
        Format::Y16 => Ok(DisplayFormat::R16),
        Format::Raw16 => Ok(DisplayFormat::R16),
        Format::Raw8 => Ok(DisplayFormat::R8),
        Format::Yuyv
        | Format::Uyvy
        | Format::Bgr8
        | Format::Raw10
        | Format::Xyz32f
        | Format::MotionRaw
        | Format::MotionXyz32f
        | Format::GpioRaw
        | Format::Any => Err(Error::UnsupportedFormat(format)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_formats_map_to_table() {
        let table = [
            (Format::Z16, DisplayFormat::R16),
            (Format::Disparity16, DisplayFormat::R16),
            (Format::Rgb8, DisplayFormat::Rgb24),
            (Format::Rgba8, DisplayFormat::Rgba32),
            (Format::Bgra8, DisplayFormat::Bgra32),
            (Format::Y8, DisplayFormat::R8),
            (Format::Y16, DisplayFormat::R16),
            (Format::Raw16, DisplayFormat::R16),
            (Format::Raw8, DisplayFormat::R8),
        ];
        for (capture, display) in table {
            assert_eq!(display_format(capture).unwrap(), display, "{capture}");
        }
    }

    #[test]
    fn unsupported_formats_are_named() {
        let rejected = [
            Format::Yuyv,
            Format::Uyvy,
            Format::Bgr8,
            Format::Raw10,
            Format::Xyz32f,
            Format::MotionRaw,
            Format::MotionXyz32f,
            Format::GpioRaw,
            Format::Any,
        ];
        for format in rejected {
            let err = display_format(format).unwrap_err();
            assert!(matches!(err, Error::UnsupportedFormat(f) if f == format));
            assert!(err.to_string().contains(&format.to_string()));
        }
    }

    #[test]
    fn display_layout_matches_capture_layout() {
        for format in [Format::Z16, Format::Rgb8, Format::Bgra8, Format::Y8] {
            let display = display_format(format).unwrap();
            assert_eq!(Some(display.bytes_per_pixel()), format.bytes_per_pixel());
        }
    }
}
