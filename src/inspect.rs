//! Sensor and option listing for the active capture device

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::capture::{
    CameraOption, CaptureDevice, DeviceInfo, DeviceListener, PipelineProfile, SensorInfo,
    StreamProfile, Subscription,
};

#[derive(Debug, Default, Clone)]
struct Inventory {
    device: Option<DeviceInfo>,
    streams: Vec<StreamProfile>,
    sensors: BTreeMap<String, SensorInfo>,
}

/// Mirrors the sensors and options of whatever the device is streaming
#[derive(Debug, Default)]
pub struct DeviceInspector {
    inventory: Mutex<Inventory>,
}

impl DeviceInspector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to `device`, picking up its profile right away if it is
    /// already streaming.
    pub fn attach(self: &Arc<Self>, device: &CaptureDevice) -> Subscription {
        let subscription = device.subscribe(self.clone());
        if let Some(profile) = device.active_profile() {
            self.on_start(&profile);
        }
        subscription
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().device.is_some()
    }

    pub fn device(&self) -> Option<DeviceInfo> {
        self.lock().device.clone()
    }

    pub fn streams(&self) -> Vec<StreamProfile> {
        self.lock().streams.clone()
    }

    /// Sensor names in sorted order
    pub fn sensor_names(&self) -> Vec<String> {
        self.lock().sensors.keys().cloned().collect()
    }

    pub fn options(&self, sensor: &str) -> Option<Vec<CameraOption>> {
        self.lock().sensors.get(sensor).map(|s| s.options.clone())
    }

    pub fn option(&self, sensor: &str, option: &str) -> Option<CameraOption> {
        self.lock()
            .sensors
            .get(sensor)?
            .options
            .iter()
            .find(|o| o.name == option)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inventory> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceListener for DeviceInspector {
    fn on_start(&self, profile: &PipelineProfile) {
        let mut sensors = BTreeMap::new();
        for sensor in &profile.sensors {
            if sensors.contains_key(&sensor.name) {
                warn!(sensor = %sensor.name, "Duplicate sensor name, keeping the first");
                continue;
            }
            sensors.insert(sensor.name.clone(), sensor.clone());
        }
        debug!(
            device = %profile.device.name,
            sensors = sensors.len(),
            "Device inventory collected"
        );
        *self.lock() = Inventory {
            device: Some(profile.device.clone()),
            streams: profile.streams.clone(),
            sensors,
        };
    }

    fn on_stop(&self) {
        *self.lock() = Inventory::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::OptionRange;

    fn option(name: &str, value: f32) -> CameraOption {
        CameraOption {
            name: name.into(),
            description: String::new(),
            value,
            range: OptionRange {
                min: 0.0,
                max: 100.0,
                step: 1.0,
                default: 50.0,
            },
            read_only: false,
        }
    }

    fn profile() -> PipelineProfile {
        PipelineProfile {
            device: DeviceInfo {
                name: "cam".into(),
                serial: "42".into(),
                firmware: "5.0".into(),
            },
            streams: Vec::new(),
            sensors: vec![
                SensorInfo {
                    name: "Stereo Module".into(),
                    options: vec![option("Exposure", 8500.0), option("Gain", 16.0)],
                },
                SensorInfo {
                    name: "RGB Camera".into(),
                    options: vec![option("Brightness", 0.0)],
                },
                SensorInfo {
                    name: "RGB Camera".into(),
                    options: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn start_and_stop_track_profile() {
        let device = CaptureDevice::new();
        let inspector = DeviceInspector::new();
        let _sub = inspector.attach(&device);
        assert!(!inspector.is_streaming());

        device.start(profile());
        assert!(inspector.is_streaming());
        assert_eq!(inspector.sensor_names(), vec!["RGB Camera", "Stereo Module"]);
        assert_eq!(inspector.options("RGB Camera").unwrap().len(), 1);
        assert_eq!(inspector.option("Stereo Module", "Gain").unwrap().value, 16.0);

        device.stop();
        assert!(!inspector.is_streaming());
        assert!(inspector.sensor_names().is_empty());
        assert!(inspector.options("Stereo Module").is_none());
    }

    #[test]
    fn attaching_to_running_device_populates_immediately() {
        let device = CaptureDevice::new();
        device.start(profile());

        let inspector = DeviceInspector::new();
        let _sub = inspector.attach(&device);
        assert_eq!(inspector.device().unwrap().serial, "42");
    }
}
