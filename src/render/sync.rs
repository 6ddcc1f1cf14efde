//! Cross-thread hand-off of the latest captured frame
//!
//! The capture thread copies each accepted frame into a staging buffer and
//! raises a single-slot ready flag. The render thread clears the flag and
//! swaps the staging buffer with its own front buffer under the same lock,
//! so the two sides never touch the same bytes at the same time.
//!
//! There is no queue: a frame staged before the previous one was consumed
//! replaces it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;
use tracing::{debug, info, warn};

use super::backend::Pixels;
use super::request::StreamRequest;
use crate::capture::{Frame, VideoFrame};

/// CPU copy of one frame waiting for upload
#[derive(Debug, Default)]
pub struct StagingBuffer {
    data: Vec<u8>,
    stride: usize,
    request: Option<StreamRequest>,
    sequence: u64,
    fresh: bool,
}

impl StagingBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shape of the staged bytes
    pub fn request(&self) -> Option<&StreamRequest> {
        self.request.as_ref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn pixels(&self) -> Option<Pixels<'_>> {
        let request = self.request.as_ref()?;
        Some(Pixels {
            data: &self.data,
            stride: self.stride,
            width: request.width,
            height: request.height,
        })
    }

    /// Drop the bytes so the next frame allocates from scratch
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn stage(&mut self, request: StreamRequest, frame: &VideoFrame, pixels: &[u8]) -> bool {
        let allocated = self.data.len() != pixels.len();
        if allocated {
            self.data = vec![0; pixels.len()];
        }
        self.data.copy_from_slice(pixels);
        self.stride = frame.stride as usize;
        self.request = Some(request);
        self.sequence = frame.sequence;
        allocated
    }
}

/// What happened to a frame offered to the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Copied into the staging buffer (or uploaded, in direct mode)
    Staged,
    /// Not streaming
    Stopped,
    /// Frame belongs to another stream
    RequestConflict,
    /// Frame shape differs from the effective request, which was updated
    ShapeConflict,
    /// Buffer shorter than `stride * height`
    Malformed,
}

/// Result of the request and shape checks
pub enum Admission<'f> {
    Accept(&'f VideoFrame),
    Reject(FrameOutcome),
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_staged: AtomicU64,
    frames_overwritten: AtomicU64,
    request_conflicts: AtomicU64,
    shape_conflicts: AtomicU64,
    malformed_frames: AtomicU64,
    staging_allocations: AtomicU64,
}

/// Snapshot of synchronizer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames_received: u64,
    pub frames_staged: u64,
    pub frames_overwritten: u64,
    pub request_conflicts: u64,
    pub shape_conflicts: u64,
    pub malformed_frames: u64,
    pub staging_allocations: u64,
}

/// Shared between the capture thread and the render thread.
pub struct FrameSynchronizer {
    requested: StreamRequest,
    /// Requested selector with the shape observed in actual frames
    effective: ArcSwap<StreamRequest>,
    staging: Mutex<StagingBuffer>,
    ready: AtomicBool,
    streaming: AtomicBool,
    generation: AtomicU64,
    stats: CachePadded<Counters>,
}

impl FrameSynchronizer {
    pub fn new(requested: StreamRequest) -> Self {
        Self {
            requested,
            effective: ArcSwap::from_pointee(requested),
            staging: Mutex::new(StagingBuffer::default()),
            ready: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stats: CachePadded::new(Counters::default()),
        }
    }

    /// The request as configured, never rewritten
    pub fn requested(&self) -> StreamRequest {
        self.requested
    }

    /// The request corrected to the shape of the frames actually arriving
    pub fn effective(&self) -> StreamRequest {
        **self.effective.load()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Incremented on every start
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn start(&self) {
        {
            let _staging = self.lock_staging();
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.streaming.store(true, Ordering::Release);
        }
        info!(request = ?self.effective(), "Synchronizer started");
    }

    /// Stop accepting frames and forget any staged data.
    ///
    /// Runs under the staging lock, so a frame still being offered on the
    /// capture thread either lands before the reset and is cleared, or
    /// sees the stream stopped and is dropped.
    pub fn reset(&self) {
        {
            let mut staging = self.lock_staging();
            self.streaming.store(false, Ordering::Release);
            staging.clear();
            self.ready.store(false, Ordering::Release);
        }
        info!("Synchronizer reset");
    }

    /// Run the request and shape checks on a frame.
    ///
    /// A shape conflict rewrites the effective shape and clears staging; the
    /// conflicting frame itself is not used.
    pub fn admit<'f>(&self, frame: &'f Frame) -> Admission<'f> {
        if !self.is_streaming() {
            return Admission::Reject(FrameOutcome::Stopped);
        }
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        let effective = self.effective();
        let video = match frame.as_video() {
            Some(video) if effective.selects(video) => video,
            _ => {
                self.stats.request_conflicts.fetch_add(1, Ordering::Relaxed);
                return Admission::Reject(FrameOutcome::RequestConflict);
            }
        };

        if !effective.fits(video) {
            let reshaped = effective.reshaped(video);
            {
                let mut staging = self.lock_staging();
                staging.clear();
                self.effective.store(Arc::new(reshaped));
            }
            self.stats.shape_conflicts.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("streamtex_shape_conflicts").increment(1);
            debug!(
                from = ?(effective.width, effective.height, effective.format),
                to = ?(reshaped.width, reshaped.height, reshaped.format),
                "Stream shape changed"
            );
            return Admission::Reject(FrameOutcome::ShapeConflict);
        }

        Admission::Accept(video)
    }

    /// Worker-mode entry point, called on the capture thread.
    pub fn on_frame(&self, frame: &Frame) -> FrameOutcome {
        let seen = self.generation();
        let video = match self.admit(frame) {
            Admission::Accept(video) => video,
            Admission::Reject(outcome) => return outcome,
        };
        let Some(pixels) = video.pixels() else {
            self.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
            warn!(
                sequence = video.sequence,
                len = video.data.len(),
                expected = video.image_len(),
                "Dropping short frame"
            );
            return FrameOutcome::Malformed;
        };

        let request = self.effective();
        let overwritten = {
            let mut staging = self.lock_staging();
            // The stream may have stopped or restarted since admission
            if !self.is_streaming() || self.generation() != seen {
                return FrameOutcome::Stopped;
            }
            if staging.stage(request, video, pixels) {
                self.stats.staging_allocations.fetch_add(1, Ordering::Relaxed);
                debug!(len = pixels.len(), "Staging buffer allocated");
            }
            // Publish only after the copy is complete
            self.ready.store(true, Ordering::Release);
            std::mem::replace(&mut staging.fresh, true)
        };

        self.stats.frames_staged.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("streamtex_frames_staged").increment(1);
        if overwritten {
            self.stats.frames_overwritten.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("streamtex_frames_overwritten").increment(1);
        }
        FrameOutcome::Staged
    }

    /// Raise the ready flag without staging bytes (direct mode)
    pub fn mark_ready(&self) {
        self.stats.frames_staged.fetch_add(1, Ordering::Relaxed);
        if self.ready.swap(true, Ordering::AcqRel) {
            self.stats.frames_overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Check and clear the ready flag
    pub fn take_ready(&self) -> bool {
        self.ready.swap(false, Ordering::AcqRel)
    }

    /// Swap a fresh staged frame into `front`. Returns false when nothing new
    /// was staged since the last swap.
    pub fn take_staged(&self, front: &mut StagingBuffer) -> bool {
        let mut staging = self.lock_staging();
        if !staging.fresh {
            return false;
        }
        std::mem::swap(&mut *staging, front);
        front.fresh = false;
        true
    }

    /// Bytes currently held by the staging buffer
    pub fn staged_len(&self) -> usize {
        self.lock_staging().len()
    }

    pub fn stats(&self) -> SyncStats {
        let c = &self.stats;
        SyncStats {
            frames_received: c.frames_received.load(Ordering::Relaxed),
            frames_staged: c.frames_staged.load(Ordering::Relaxed),
            frames_overwritten: c.frames_overwritten.load(Ordering::Relaxed),
            request_conflicts: c.request_conflicts.load(Ordering::Relaxed),
            shape_conflicts: c.shape_conflicts.load(Ordering::Relaxed),
            malformed_frames: c.malformed_frames.load(Ordering::Relaxed),
            staging_allocations: c.staging_allocations.load(Ordering::Relaxed),
        }
    }

    fn lock_staging(&self) -> MutexGuard<'_, StagingBuffer> {
        self.staging.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
