//! Render-thread side: display image lifecycle and per-tick upload

use std::sync::Arc;
use std::time::Instant;

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, instrument, warn};

use super::backend::{ImageBackend, ImageDescriptor, Pixels};
use super::format::display_format;
use super::request::{FilterMode, StreamRequest, ThreadingMode};
use super::sync::{Admission, FrameOutcome, FrameSynchronizer, StagingBuffer};
use crate::capture::{
    CaptureDevice, DeviceListener, Frame, PipelineProfile, Subscription, VideoFrame,
};
use crate::error::{Error, Result};
use crate::RendererConfig;

/// Lifecycle of one renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    /// No image allocated
    Idle,
    /// Image allocated, no content uploaded yet
    Bound,
    /// Image receiving frames
    Streaming,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub torn_down: bool,
    pub rebound: bool,
    pub uploaded: bool,
}

/// Capture-side half of a renderer, registered with the device.
struct RendererLink {
    sync: Arc<FrameSynchronizer>,
    threading: ThreadingMode,
    direct_tx: Sender<Frame>,
    direct_rx: Receiver<Frame>,
}

impl RendererLink {
    /// Hand a frame to the render thread, replacing one not yet taken
    fn forward(&self, frame: Frame) {
        if let Err(TrySendError::Full(frame)) = self.direct_tx.try_send(frame) {
            let _ = self.direct_rx.try_recv();
            metrics::counter!("streamtex_direct_frames_dropped").increment(1);
            let _ = self.direct_tx.try_send(frame);
        }
    }
}

impl DeviceListener for RendererLink {
    fn on_start(&self, _profile: &PipelineProfile) {
        self.direct_rx.drain().for_each(drop);
        self.sync.start();
    }

    fn on_stop(&self) {
        self.sync.reset();
        self.direct_rx.drain().for_each(drop);
    }

    fn on_frame(&self, frame: &Frame) {
        match self.threading {
            ThreadingMode::Worker => {
                self.sync.on_frame(frame);
            }
            ThreadingMode::Direct if self.sync.is_streaming() => self.forward(frame.clone()),
            ThreadingMode::Direct => {}
        }
    }
}

/// Keeps a display image in step with one video stream.
///
/// Lives on the render thread. Frames arrive either through the
/// [`FrameSynchronizer`] (worker mode) or through a single-slot channel
/// drained by [`tick`](Self::tick) (direct mode); in both cases only `tick`
/// and [`on_frame`](Self::on_frame) touch the backend.
pub struct StreamRenderer<B: ImageBackend> {
    backend: B,
    filter: FilterMode,
    threading: ThreadingMode,
    sync: Arc<FrameSynchronizer>,
    image: Option<B::Image>,
    current: Option<StreamRequest>,
    state: RenderState,
    content_bound: bool,
    front: StagingBuffer,
    generation: u64,
    direct_tx: Sender<Frame>,
    direct_rx: Receiver<Frame>,
    on_bound: Vec<Box<dyn FnMut(&B::Image)>>,
    subscription: Option<Subscription>,
}

impl<B: ImageBackend> StreamRenderer<B> {
    pub fn new(config: &RendererConfig, backend: B) -> Self {
        let (direct_tx, direct_rx) = flume::bounded(1);
        Self {
            backend,
            filter: config.filter,
            threading: config.threading,
            sync: Arc::new(FrameSynchronizer::new(config.request())),
            image: None,
            current: None,
            state: RenderState::Idle,
            content_bound: false,
            front: StagingBuffer::default(),
            generation: 0,
            direct_tx,
            direct_rx,
            on_bound: Vec::new(),
            subscription: None,
        }
    }

    /// Listen to a capture device until [`detach`](Self::detach) or drop.
    pub fn attach(&mut self, device: &CaptureDevice) {
        let link = Arc::new(RendererLink {
            sync: self.sync.clone(),
            threading: self.threading,
            direct_tx: self.direct_tx.clone(),
            direct_rx: self.direct_rx.clone(),
        });
        self.subscription = Some(device.subscribe(link));
        if device.is_streaming() && !self.sync.is_streaming() {
            self.sync.start();
        }
    }

    pub fn detach(&mut self) {
        self.subscription = None;
        self.sync.reset();
    }

    /// Called with the image on every (re)allocation and once more when
    /// the first frame has been uploaded into it.
    pub fn on_image_bound(&mut self, callback: impl FnMut(&B::Image) + 'static) {
        self.on_bound.push(Box::new(callback));
    }

    pub fn image(&self) -> Option<&B::Image> {
        self.image.as_ref()
    }

    /// Request the bound image was allocated for
    pub fn current_request(&self) -> Option<StreamRequest> {
        self.current
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn threading(&self) -> ThreadingMode {
        self.threading
    }

    pub fn synchronizer(&self) -> &Arc<FrameSynchronizer> {
        &self.sync
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Offer a frame from the render thread.
    ///
    /// In worker mode this stages the frame like a capture callback would;
    /// in direct mode the bytes go straight into the image.
    pub fn on_frame(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        match self.threading {
            ThreadingMode::Worker => Ok(self.sync.on_frame(frame)),
            ThreadingMode::Direct => self.upload_direct(frame),
        }
    }

    /// Advance one render frame.
    pub fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport {
            torn_down: self.observe_lifecycle(),
            ..Default::default()
        };
        if !self.sync.is_streaming() {
            return Ok(report);
        }

        let bound_before = self.current;
        if self.threading == ThreadingMode::Direct {
            self.drain_direct()?;
        }
        self.rebind_if_needed()?;
        report.rebound = self.current != bound_before;

        if self.sync.take_ready() {
            report.uploaded = self.present_pending()?;
        }
        Ok(report)
    }

    /// Tear down when the stream stopped or restarted since we last looked.
    fn observe_lifecycle(&mut self) -> bool {
        let generation = self.sync.generation();
        let stopped = !self.sync.is_streaming() && self.state != RenderState::Idle;
        if !stopped && generation == self.generation {
            return false;
        }
        self.generation = generation;
        self.teardown()
    }

    /// Run every pending direct-mode frame through the request and shape
    /// checks, then upload only the newest one still matching.
    fn drain_direct(&mut self) -> Result<()> {
        let mut newest = None;
        let mut skipped = 0u64;
        for frame in self.direct_rx.try_iter() {
            let outcome = match self.sync.admit(&frame) {
                Admission::Accept(_) => None,
                Admission::Reject(outcome) => Some(outcome),
            };
            match outcome {
                None => skipped += newest.replace(frame).is_some() as u64,
                Some(FrameOutcome::ShapeConflict) => skipped += newest.take().is_some() as u64,
                Some(_) => {}
            }
        }
        if skipped > 0 {
            metrics::counter!("streamtex_direct_frames_dropped").increment(skipped);
        }
        match newest.as_ref().and_then(Frame::as_video) {
            Some(video) => self.upload_video(video).map(drop),
            None => Ok(()),
        }
    }

    fn upload_direct(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        self.observe_lifecycle();
        match self.sync.admit(frame) {
            Admission::Accept(video) => self.upload_video(video),
            Admission::Reject(outcome) => Ok(outcome),
        }
    }

    /// Upload an admitted frame straight into the image
    fn upload_video(&mut self, video: &VideoFrame) -> Result<FrameOutcome> {
        self.rebind_if_needed()?;

        let (Some(image), Some(data)) = (self.image.as_ref(), video.pixels()) else {
            warn!(sequence = video.sequence, "Dropping frame that cannot fill the image");
            return Ok(FrameOutcome::Malformed);
        };
        let pixels = Pixels {
            data,
            stride: video.stride as usize,
            width: video.width(),
            height: video.height(),
        };
        let started = Instant::now();
        if let Err(err) = self.backend.upload(image, pixels) {
            return Err(self.fail(err));
        }
        metrics::histogram!("streamtex_upload_time_us").record(started.elapsed().as_micros() as f64);

        self.sync.mark_ready();
        Ok(FrameOutcome::Staged)
    }

    /// Reallocate the image when the effective request moved away from the
    /// bound one. Returns true if a new image was bound.
    fn rebind_if_needed(&mut self) -> Result<bool> {
        let desired = self.sync.effective();
        if self.current == Some(desired) || !desired.has_shape() {
            return Ok(false);
        }
        match self.bind(desired) {
            Ok(()) => Ok(true),
            Err(err) => Err(self.fail(err)),
        }
    }

    #[instrument(skip(self))]
    fn bind(&mut self, request: StreamRequest) -> Result<()> {
        let format = display_format(request.format)?;

        if let Some(old) = self.image.take() {
            self.backend.destroy_image(old);
        }
        self.current = None;
        self.front.clear();

        let desc = ImageDescriptor {
            width: request.width,
            height: request.height,
            format,
            filter: self.filter,
        };
        let image = self.backend.create_image(&desc)?;
        info!(?format, "Display image bound");

        self.current = Some(request);
        self.content_bound = false;
        self.state = RenderState::Bound;
        self.notify(&image);
        self.image = Some(image);
        Ok(())
    }

    /// Upload whatever the ready flag announced.
    fn present_pending(&mut self) -> Result<bool> {
        let Some(image) = self.image.clone() else {
            return Ok(false);
        };

        if self.threading == ThreadingMode::Worker {
            if !self.sync.take_staged(&mut self.front) {
                return Ok(false);
            }
            if self.front.request() != self.current.as_ref() {
                debug!(sequence = self.front.sequence(), "Discarding frame staged for a previous shape");
                return Ok(false);
            }
            let Some(pixels) = self.front.pixels() else {
                return Ok(false);
            };
            let started = Instant::now();
            let uploaded = self.backend.upload(&image, pixels);
            if let Err(err) = uploaded {
                return Err(self.fail(err));
            }
            metrics::histogram!("streamtex_upload_time_us")
                .record(started.elapsed().as_micros() as f64);
        }

        if let Err(err) = self.backend.flush() {
            return Err(self.fail(err));
        }

        self.state = RenderState::Streaming;
        if !self.content_bound {
            self.content_bound = true;
            self.notify(&image);
        }
        Ok(true)
    }

    fn notify(&mut self, image: &B::Image) {
        for callback in &mut self.on_bound {
            callback(image);
        }
    }

    /// Stop the stream and release the image after a fatal error.
    fn fail(&mut self, err: Error) -> Error {
        match &err {
            Error::UploadFailure { .. } => {
                error!(%err, "Error loading texture data, check texture and stream formats")
            }
            _ => error!(%err, "Renderer stopped"),
        }
        self.sync.reset();
        self.teardown();
        err
    }

    /// Release GPU resources. Returns true if an image was destroyed.
    fn teardown(&mut self) -> bool {
        self.front.clear();
        self.current = None;
        self.content_bound = false;
        self.state = RenderState::Idle;
        match self.image.take() {
            Some(image) => {
                self.backend.destroy_image(image);
                debug!("Display image released");
                true
            }
            None => false,
        }
    }
}

impl<B: ImageBackend> Drop for StreamRenderer<B> {
    fn drop(&mut self) {
        self.subscription = None;
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Format, StreamKind, StreamProfile, VideoFrame};
    use crate::render::backend::MemoryBackend;
    use bytes::Bytes;
    use std::cell::Cell;
    use std::rc::Rc;

    fn config(threading: ThreadingMode) -> RendererConfig {
        RendererConfig {
            stream: StreamKind::Color,
            format: Format::Rgb8,
            index: 0,
            width: 4,
            height: 2,
            filter: FilterMode::Linear,
            threading,
        }
    }

    fn color(width: u32, height: u32, fill: u8) -> Frame {
        let stride = width * 3;
        Frame::Video(VideoFrame {
            profile: StreamProfile {
                stream: StreamKind::Color,
                format: Format::Rgb8,
                index: 0,
                width,
                height,
                fps: 30,
            },
            stride,
            sequence: fill as u64,
            data: Bytes::from(vec![fill; (stride * height) as usize]),
            timestamp: Instant::now(),
        })
    }

    #[test]
    fn idle_until_started() {
        let mut renderer = StreamRenderer::new(&config(ThreadingMode::Worker), MemoryBackend::new());
        assert_eq!(renderer.tick().unwrap(), TickReport::default());
        assert_eq!(renderer.state(), RenderState::Idle);
        assert!(renderer.image().is_none());
    }

    #[test]
    fn pinned_request_binds_on_first_tick() {
        let mut renderer = StreamRenderer::new(&config(ThreadingMode::Worker), MemoryBackend::new());
        renderer.synchronizer().start();

        let report = renderer.tick().unwrap();
        assert!(report.rebound);
        assert_eq!(renderer.state(), RenderState::Bound);
        let image = renderer.image().unwrap();
        assert_eq!(image.descriptor().filter, FilterMode::Linear);
        assert_eq!((image.descriptor().width, image.descriptor().height), (4, 2));
    }

    #[test]
    fn direct_mode_uploads_on_render_thread() {
        let mut renderer = StreamRenderer::new(&config(ThreadingMode::Direct), MemoryBackend::new());
        renderer.synchronizer().start();

        assert_eq!(renderer.on_frame(&color(4, 2, 5)).unwrap(), FrameOutcome::Staged);
        assert_eq!(renderer.synchronizer().staged_len(), 0);
        let image = renderer.image().unwrap().clone();
        assert!(image.pixels().iter().all(|&b| b == 5));

        let report = renderer.tick().unwrap();
        assert!(report.uploaded);
        assert_eq!(renderer.state(), RenderState::Streaming);
    }

    #[test]
    fn bound_callback_fires_on_bind_and_first_upload() {
        let mut renderer = StreamRenderer::new(&config(ThreadingMode::Worker), MemoryBackend::new());
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        renderer.on_image_bound(move |_| seen.set(seen.get() + 1));
        renderer.synchronizer().start();

        renderer.tick().unwrap();
        assert_eq!(calls.get(), 1);

        for fill in 1..=3 {
            renderer.on_frame(&color(4, 2, fill)).unwrap();
            assert!(renderer.tick().unwrap().uploaded);
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn unsupported_format_stops_stream() {
        let mut cfg = config(ThreadingMode::Worker);
        cfg.format = Format::Yuyv;
        let mut renderer = StreamRenderer::new(&cfg, MemoryBackend::new());
        renderer.synchronizer().start();

        let err = renderer.tick().unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(Format::Yuyv)));
        assert!(!renderer.synchronizer().is_streaming());
        assert_eq!(renderer.tick().unwrap(), TickReport::default());
    }

    #[test]
    fn drop_releases_image() {
        let mut renderer = StreamRenderer::new(&config(ThreadingMode::Worker), MemoryBackend::new());
        renderer.synchronizer().start();
        renderer.tick().unwrap();
        let image = renderer.image().unwrap().clone();
        drop(renderer);
        assert!(image.is_destroyed());
    }
}
