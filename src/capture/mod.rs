pub mod device;
pub mod frame;
pub mod synthetic;

pub use device::{
    CameraOption, CaptureDevice, DeviceInfo, DeviceListener, OptionRange, PipelineProfile,
    SensorInfo, Subscription,
};
pub use frame::{Format, Frame, StreamKind, StreamProfile, VideoFrame};
pub use synthetic::{make_frame, SyntheticCamera};
