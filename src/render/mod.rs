pub mod backend;
pub mod format;
#[cfg(feature = "gpu-display")]
pub mod gpu;
pub mod renderer;
pub mod request;
pub mod sync;

pub use backend::{ImageBackend, ImageDescriptor, MemoryBackend, MemoryImage, Pixels};
pub use format::{display_format, DisplayFormat};
#[cfg(feature = "gpu-display")]
pub use gpu::{GpuImage, WgpuBackend};
pub use renderer::{RenderState, StreamRenderer, TickReport};
pub use request::{FilterMode, StreamRequest, ThreadingMode, ANY_INDEX};
pub use sync::{FrameOutcome, FrameSynchronizer, StagingBuffer, SyncStats};
