use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel formats a capture pipeline can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Any,
    Z16,
    Disparity16,
    Xyz32f,
    Yuyv,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Y8,
    Y16,
    Raw10,
    Raw16,
    Raw8,
    Uyvy,
    MotionRaw,
    MotionXyz32f,
    GpioRaw,
}

impl Format {
    /// Bytes occupied by one pixel, `None` for packed or non-image formats
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Format::Y8 | Format::Raw8 => Some(1),
            Format::Z16 | Format::Disparity16 | Format::Y16 | Format::Raw16 => Some(2),
            Format::Yuyv | Format::Uyvy => Some(2),
            Format::Rgb8 | Format::Bgr8 => Some(3),
            Format::Rgba8 | Format::Bgra8 => Some(4),
            Format::Xyz32f => Some(12),
            Format::Raw10 | Format::MotionRaw | Format::MotionXyz32f | Format::GpioRaw => None,
            Format::Any => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind of sensor stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Any,
    Depth,
    Color,
    Infrared,
    Fisheye,
    Gyro,
    Accel,
    Gpio,
    Pose,
    Confidence,
}

/// One negotiated video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamProfile {
    pub stream: StreamKind,
    pub format: Format,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Video frame as delivered by the capture pipeline
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub profile: StreamProfile,
    /// Bytes per row, including any padding
    pub stride: u32,
    pub sequence: u64,
    pub data: Bytes,
    pub timestamp: Instant,
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.profile.width
    }

    pub fn height(&self) -> u32 {
        self.profile.height
    }

    /// Byte count of one full image: `stride * height`
    pub fn image_len(&self) -> usize {
        self.stride as usize * self.profile.height as usize
    }

    /// Pixel bytes of the full image, `None` if the buffer is short
    pub fn pixels(&self) -> Option<&[u8]> {
        self.data.get(..self.image_len())
    }
}

/// Anything the capture pipeline hands to its listeners.
///
/// Non-video samples (motion, pose) travel through the same callback so
/// consumers must filter on the variant rather than inspect types.
#[derive(Debug, Clone)]
pub enum Frame {
    Video(VideoFrame),
    Other {
        stream: StreamKind,
        format: Format,
        index: u32,
        sequence: u64,
    },
}

impl Frame {
    pub fn as_video(&self) -> Option<&VideoFrame> {
        match self {
            Frame::Video(frame) => Some(frame),
            Frame::Other { .. } => None,
        }
    }

    pub fn stream(&self) -> StreamKind {
        match self {
            Frame::Video(frame) => frame.profile.stream,
            Frame::Other { stream, .. } => *stream,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Frame::Video(frame) => frame.sequence,
            Frame::Other { sequence, .. } => *sequence,
        }
    }
}

impl From<VideoFrame> for Frame {
    fn from(frame: VideoFrame) -> Self {
        Frame::Video(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stride: u32, height: u32, len: usize) -> VideoFrame {
        VideoFrame {
            profile: StreamProfile {
                stream: StreamKind::Depth,
                format: Format::Z16,
                index: 0,
                width: 4,
                height,
                fps: 30,
            },
            stride,
            sequence: 1,
            data: Bytes::from(vec![7u8; len]),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn pixels_cover_stride_times_height() {
        let f = frame(10, 3, 40);
        assert_eq!(f.image_len(), 30);
        assert_eq!(f.pixels().map(<[u8]>::len), Some(30));
    }

    #[test]
    fn short_buffer_has_no_pixels() {
        let f = frame(10, 3, 29);
        assert!(f.pixels().is_none());
    }

    #[test]
    fn other_frames_are_not_video() {
        let f = Frame::Other {
            stream: StreamKind::Gyro,
            format: Format::MotionXyz32f,
            index: 0,
            sequence: 9,
        };
        assert!(f.as_video().is_none());
        assert_eq!(f.stream(), StreamKind::Gyro);
        assert_eq!(f.sequence(), 9);
    }
}
