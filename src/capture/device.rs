//! Capture device event hub: lifecycle events and frame fan-out to listeners

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::frame::{Frame, StreamProfile};

/// Static device information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub firmware: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

/// One tunable sensor option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraOption {
    pub name: String,
    pub description: String,
    pub value: f32,
    pub range: OptionRange,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub name: String,
    pub options: Vec<CameraOption>,
}

/// Result of starting a pipeline: the device and the streams it negotiated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineProfile {
    pub device: DeviceInfo,
    pub streams: Vec<StreamProfile>,
    pub sensors: Vec<SensorInfo>,
}

/// Receives capture device events.
///
/// `on_frame` runs on whatever thread publishes the frame and must return
/// promptly. The frame is only valid for the duration of the call.
pub trait DeviceListener: Send + Sync {
    fn on_start(&self, _profile: &PipelineProfile) {}

    fn on_stop(&self) {}

    fn on_frame(&self, _frame: &Frame) {}
}

struct DeviceInner {
    listeners: Mutex<Vec<(u64, Arc<dyn DeviceListener>)>>,
    next_id: AtomicU64,
    active: ArcSwapOption<PipelineProfile>,
}

impl DeviceInner {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Arc<dyn DeviceListener>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listeners are called outside the lock so they may unsubscribe
    fn snapshot(&self) -> Vec<Arc<dyn DeviceListener>> {
        self.lock().iter().map(|(_, l)| l.clone()).collect()
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(other, _)| *other != id);
    }
}

/// Handle to a capture device. Cheap to clone; all clones share listeners.
#[derive(Clone)]
pub struct CaptureDevice {
    inner: Arc<DeviceInner>,
}

impl Default for CaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                active: ArcSwapOption::empty(),
            }),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&self, listener: Arc<dyn DeviceListener>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().push((id, listener));
        debug!(id, "Listener subscribed");
        Subscription {
            id,
            device: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.snapshot().len()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.active.load().is_some()
    }

    pub fn active_profile(&self) -> Option<Arc<PipelineProfile>> {
        self.inner.active.load_full()
    }

    #[instrument(skip(self, profile), fields(device = %profile.device.name))]
    pub fn start(&self, profile: PipelineProfile) {
        let profile = Arc::new(profile);
        self.inner.active.store(Some(profile.clone()));
        info!("Streaming started with {} streams", profile.streams.len());
        for listener in self.inner.snapshot() {
            listener.on_start(&profile);
        }
    }

    #[instrument(skip(self))]
    pub fn stop(&self) {
        if self.inner.active.swap(None).is_none() {
            return;
        }
        info!("Streaming stopped");
        for listener in self.inner.snapshot() {
            listener.on_stop();
        }
    }

    /// Deliver a frame to every listener on the calling thread.
    /// Frames published while stopped are discarded.
    pub fn publish(&self, frame: &Frame) {
        if !self.is_streaming() {
            return;
        }
        for listener in self.inner.snapshot() {
            listener.on_frame(frame);
        }
    }
}

/// Registration token returned by [`CaptureDevice::subscribe`]
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    device: Weak<DeviceInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(device) = self.device.upgrade() {
            device.remove(self.id);
            debug!(id = self.id, "Listener unsubscribed");
        }
    }
}
