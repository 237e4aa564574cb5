//! Audio device API contract
//!
//! The transceiver never talks to a sound system directly. Everything it
//! needs (enumeration, opening with a requested spec, pause/resume and the
//! per-device byte queues) goes through [`AudioBackend`] and the
//! [`AudioStream`] objects it hands out.

use std::fmt;

use crate::audio::format::HardwareFormat;
use crate::error::AudioError;

/// Direction of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    Playback,
    Capture,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playback => f.write_str("playback"),
            Self::Capture => f.write_str("capture"),
        }
    }
}

/// Requested or obtained stream parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub format: HardwareFormat,
    pub channels: u16,
    /// Samples per hardware buffer
    pub frame_size: u32,
}

impl StreamSpec {
    /// Bytes per interleaved sample frame
    pub fn bytes_per_frame(&self) -> usize {
        self.format.byte_width() * self.channels as usize
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {:?}, {} ch, {} samples",
            self.sample_rate, self.format, self.channels, self.frame_size
        )
    }
}

/// Which physical device to open
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// Whatever the system considers the default device
    #[default]
    Default,
    /// Position in the backend's enumeration for that direction
    Index(usize),
    /// Exact device name
    Name(String),
}

impl DeviceSelector {
    /// Negative indices select the system default
    pub fn from_index(index: i32) -> Self {
        usize::try_from(index).map_or(Self::Default, Self::Index)
    }
}

impl From<Option<usize>> for DeviceSelector {
    fn from(index: Option<usize>) -> Self {
        index.map_or(Self::Default, Self::Index)
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Index(i) => write!(f, "#{}", i),
            Self::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Enumerated device
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub direction: StreamDirection,
    pub is_default: bool,
}

/// An open device with its hardware queue.
///
/// Playback streams drain their queue into the hardware while resumed;
/// capture streams append to their queue while resumed. Both start paused.
/// A capture queue holds mono samples in the engine format of the granted
/// hardware format, whatever channel count the hardware delivers.
pub trait AudioStream {
    /// Parameters the hardware actually granted
    fn spec(&self) -> &StreamSpec;

    /// Stop or restart moving data between the queue and the hardware
    fn set_paused(&mut self, paused: bool);

    /// Check if the stream is paused
    fn is_paused(&self) -> bool;

    /// Bytes currently buffered in the queue
    fn queued_bytes(&self) -> usize;

    /// Append bytes for playback
    fn enqueue(&mut self, data: &[u8]) -> Result<(), AudioError>;

    /// Move up to `out.len()` captured bytes into `out`, returning the count
    fn dequeue(&mut self, out: &mut [u8]) -> usize;

    /// Drop everything buffered
    fn clear(&mut self);

    /// Stop the device. Further queue operations are no-ops.
    fn close(&mut self);
}

/// Sound system able to enumerate and open devices
pub trait AudioBackend {
    /// List devices for a direction
    fn devices(&self, direction: StreamDirection) -> Result<Vec<AudioDeviceInfo>, AudioError>;

    /// Open a device, returning a stream carrying the obtained spec
    fn open(
        &mut self,
        direction: StreamDirection,
        selector: &DeviceSelector,
        requested: &StreamSpec,
    ) -> Result<Box<dyn AudioStream>, AudioError>;
}
