//! Synthetic camera producing test-pattern frames

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use tokio::sync::watch;
use tracing::{info, instrument};

use super::device::{CameraOption, CaptureDevice, DeviceInfo, OptionRange, PipelineProfile, SensorInfo};
use super::frame::{Format, Frame, StreamKind, StreamProfile, VideoFrame};
use crate::{CaptureConfig, StreamConfig};

/// Publishes a gradient pattern for every configured stream
pub struct SyntheticCamera {
    device: CaptureDevice,
    config: CaptureConfig,
    sequence: u64,
    size: Option<(u32, u32)>,
}

impl SyntheticCamera {
    pub fn new(device: CaptureDevice, config: CaptureConfig) -> Self {
        Self {
            device,
            config,
            sequence: 0,
            size: None,
        }
    }

    pub fn device(&self) -> &CaptureDevice {
        &self.device
    }

    pub fn profile(&self) -> PipelineProfile {
        let streams = self
            .config
            .streams
            .iter()
            .map(|s| StreamProfile {
                stream: s.stream,
                format: s.format,
                index: s.index,
                width: s.width,
                height: s.height,
                fps: self.config.fps,
            })
            .collect();

        PipelineProfile {
            device: DeviceInfo {
                name: self.config.device_name.clone(),
                serial: "000000000000".into(),
                firmware: "0.0.0.0".into(),
            },
            streams,
            sensors: vec![
                SensorInfo {
                    name: "Stereo Module".into(),
                    options: vec![
                        option("Exposure", "Depth exposure time in usec", 8500.0, 1.0, 165000.0),
                        option("Gain", "Depth gain", 16.0, 16.0, 248.0),
                        option("Laser Power", "Emitter power in mW", 150.0, 0.0, 360.0),
                    ],
                },
                SensorInfo {
                    name: "RGB Camera".into(),
                    options: vec![
                        option("Brightness", "Image brightness", 0.0, -64.0, 64.0),
                        option("Contrast", "Image contrast", 50.0, 0.0, 100.0),
                    ],
                },
            ],
        }
    }

    pub fn start(&mut self) {
        self.sequence = 0;
        self.size = None;
        self.device.start(self.profile());
    }

    pub fn stop(&self) {
        self.device.stop();
    }

    /// Publish one frame for each stream and, every `motion_every` frames,
    /// a motion sample.
    pub fn capture_once(&mut self) {
        self.sequence += 1;
        if let Some(after) = self.config.resize_after {
            if self.sequence == after + 1 {
                info!(size = ?self.config.alternate_size, "Switching resolution");
                self.size = Some(self.config.alternate_size);
            }
        }

        for stream in &self.config.streams {
            let (width, height) = self.size.unwrap_or((stream.width, stream.height));
            let frame = make_frame(stream, width, height, self.sequence);
            self.device.publish(&Frame::Video(frame));
        }

        if self.config.motion_every > 0 && self.sequence % self.config.motion_every == 0 {
            self.device.publish(&Frame::Other {
                stream: StreamKind::Gyro,
                format: Format::MotionXyz32f,
                index: 0,
                sequence: self.sequence,
            });
        }
    }

    /// Publish frames at the configured rate until `shutdown` flips to true.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(fps = self.config.fps, streams = self.config.streams.len(), "Synthetic camera running");
        let period = Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.start();
        loop {
            tokio::select! {
                _ = interval.tick() => self.capture_once(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.stop();
        info!(frames = self.sequence, "Synthetic camera stopped");
    }
}

fn option(name: &str, description: &str, value: f32, min: f32, max: f32) -> CameraOption {
    CameraOption {
        name: name.into(),
        description: description.into(),
        value,
        range: OptionRange {
            min,
            max,
            step: 1.0,
            default: value,
        },
        read_only: false,
    }
}

/// Build one test-pattern frame. Every pixel byte is `x + y + sequence`
/// truncated to 8 bits; row padding is zero.
pub fn make_frame(stream: &StreamConfig, width: u32, height: u32, sequence: u64) -> VideoFrame {
    let bpp = stream.format.bytes_per_pixel().unwrap_or(1);
    let row = width as usize * bpp;
    let stride = row + stream.row_padding as usize;

    let mut data = BytesMut::with_capacity(stride * height as usize);
    for y in 0..height as usize {
        for x in 0..row {
            data.put_u8((x / bpp + y + sequence as usize) as u8);
        }
        data.put_bytes(0, stream.row_padding as usize);
    }

    VideoFrame {
        profile: StreamProfile {
            stream: stream.stream,
            format: stream.format,
            index: stream.index,
            width,
            height,
            fps: 0,
        },
        stride: stride as u32,
        sequence,
        data: data.freeze(),
        timestamp: Instant::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DeviceListener;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Frame>>);

    impl DeviceListener for Recorder {
        fn on_frame(&self, frame: &Frame) {
            self.0.lock().unwrap().push(frame.clone());
        }
    }

    fn stream(padding: u32) -> StreamConfig {
        StreamConfig {
            stream: StreamKind::Depth,
            format: Format::Z16,
            index: 0,
            width: 3,
            height: 2,
            row_padding: padding,
        }
    }

    #[test]
    fn frame_layout_includes_padding() {
        let frame = make_frame(&stream(2), 3, 2, 0);
        assert_eq!(frame.stride, 8);
        assert_eq!(frame.data.len(), 16);
        assert_eq!(&frame.data[..8], &[0, 0, 1, 1, 2, 2, 0, 0]);
        assert_eq!(&frame.data[8..14], &[1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn resolution_switches_after_configured_frames() {
        let config = CaptureConfig {
            streams: vec![stream(0)],
            resize_after: Some(2),
            alternate_size: (5, 4),
            motion_every: 3,
            ..Default::default()
        };
        let device = CaptureDevice::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = device.subscribe(recorder.clone());

        let mut camera = SyntheticCamera::new(device, config);
        camera.start();
        for _ in 0..3 {
            camera.capture_once();
        }

        let frames = recorder.0.lock().unwrap();
        let sizes: Vec<_> = frames
            .iter()
            .filter_map(Frame::as_video)
            .map(|f| (f.width(), f.height()))
            .collect();
        assert_eq!(sizes, vec![(3, 2), (3, 2), (5, 4)]);
        assert_eq!(frames.iter().filter(|f| f.as_video().is_none()).count(), 1);
    }
}
