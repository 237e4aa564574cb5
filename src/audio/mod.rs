//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod device;
pub mod format;
pub mod handle;
pub mod stream;

#[cfg(test)]
pub mod mock;

pub use backend::{AudioBackend, AudioDeviceInfo, AudioStream, DeviceSelector, StreamDirection, StreamSpec};
pub use buffer::{create_byte_queue, QueueConsumer, QueueProducer};
pub use device::{find_device, list_devices, AudioDevice};
pub use format::{CaptureAdapter, HardwareFormat, SampleFormat};
pub use handle::{CaptureHandle, PlaybackHandle};
pub use stream::{CpalBackend, CpalStream};
