use serde::{Deserialize, Serialize};

use crate::capture::{Format, StreamKind, VideoFrame};

/// Index value that accepts frames from any stream index
pub const ANY_INDEX: u32 = 0;

/// Selects one video stream and the image shape it should be displayed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamRequest {
    pub stream: StreamKind,
    pub format: Format,
    pub index: u32,
    pub width: u32,
    pub height: u32,
}

impl StreamRequest {
    pub fn new(stream: StreamKind, format: Format, index: u32) -> Self {
        Self {
            stream,
            format,
            index,
            width: 0,
            height: 0,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// True once both dimensions are known
    pub fn has_shape(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Whether the frame belongs to the selected stream at all
    pub fn selects(&self, frame: &VideoFrame) -> bool {
        let profile = &frame.profile;
        self.stream == profile.stream
            && self.format == profile.format
            && (self.index == ANY_INDEX || self.index == profile.index)
    }

    /// Whether the frame's shape matches the recorded one
    pub fn fits(&self, frame: &VideoFrame) -> bool {
        let profile = &frame.profile;
        self.width == profile.width && self.height == profile.height && self.format == profile.format
    }

    /// Copy of this request reshaped to the frame
    pub fn reshaped(&self, frame: &VideoFrame) -> Self {
        Self {
            format: frame.profile.format,
            width: frame.profile.width,
            height: frame.profile.height,
            ..*self
        }
    }
}

/// Texture sampling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Which thread frame callbacks run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadingMode {
    /// Frames are handed to the render thread and uploaded there directly
    Direct,
    /// Frames are staged on the capture thread and uploaded on the next tick
    #[default]
    Worker,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StreamProfile;
    use bytes::Bytes;
    use std::time::Instant;

    fn frame(stream: StreamKind, format: Format, index: u32, w: u32, h: u32) -> VideoFrame {
        VideoFrame {
            profile: StreamProfile {
                stream,
                format,
                index,
                width: w,
                height: h,
                fps: 30,
            },
            stride: w * 2,
            sequence: 0,
            data: Bytes::new(),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn wildcard_index_selects_any_index() {
        let request = StreamRequest::new(StreamKind::Infrared, Format::Y8, ANY_INDEX);
        for index in [0, 1, 2, 7] {
            assert!(request.selects(&frame(StreamKind::Infrared, Format::Y8, index, 4, 4)));
        }
    }

    #[test]
    fn pinned_index_rejects_neighbours() {
        let request = StreamRequest::new(StreamKind::Infrared, Format::Y8, 2);
        assert!(request.selects(&frame(StreamKind::Infrared, Format::Y8, 2, 4, 4)));
        assert!(!request.selects(&frame(StreamKind::Infrared, Format::Y8, 1, 4, 4)));
        assert!(!request.selects(&frame(StreamKind::Infrared, Format::Y8, 3, 4, 4)));
    }

    #[test]
    fn kind_and_format_must_match() {
        let request = StreamRequest::new(StreamKind::Depth, Format::Z16, 0);
        assert!(!request.selects(&frame(StreamKind::Color, Format::Z16, 0, 4, 4)));
        assert!(!request.selects(&frame(StreamKind::Depth, Format::Y16, 0, 4, 4)));
    }

    #[test]
    fn reshape_keeps_selector() {
        let request = StreamRequest::new(StreamKind::Depth, Format::Z16, 0).with_size(640, 480);
        let f = frame(StreamKind::Depth, Format::Z16, 3, 1280, 720);
        assert!(!request.fits(&f));

        let reshaped = request.reshaped(&f);
        assert!(reshaped.fits(&f));
        assert_eq!(reshaped.index, ANY_INDEX);
        assert_eq!((reshaped.width, reshaped.height), (1280, 720));
    }
}
