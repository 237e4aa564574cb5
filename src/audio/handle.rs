//! Typed device handles
//!
//! A handle owns one open [`AudioStream`]. Dropping it pauses and closes the
//! device, so a device can never outlive the code path that opened it.

use std::fmt;
use std::marker::PhantomData;

use crate::audio::backend::{AudioStream, StreamDirection, StreamSpec};
use crate::error::AudioError;

/// Marker for the direction a handle was opened in
pub trait Direction {
    const KIND: StreamDirection;
}

/// Playback direction marker
#[derive(Debug)]
pub enum Playback {}

/// Capture direction marker
#[derive(Debug)]
pub enum Capture {}

impl Direction for Playback {
    const KIND: StreamDirection = StreamDirection::Playback;
}

impl Direction for Capture {
    const KIND: StreamDirection = StreamDirection::Capture;
}

/// Open device of direction `D`
pub struct DeviceHandle<D: Direction> {
    stream: Box<dyn AudioStream>,
    _direction: PhantomData<D>,
}

pub type PlaybackHandle = DeviceHandle<Playback>;
pub type CaptureHandle = DeviceHandle<Capture>;

impl<D: Direction> DeviceHandle<D> {
    /// Take ownership of an open stream
    pub fn new(stream: Box<dyn AudioStream>) -> Self {
        Self {
            stream,
            _direction: PhantomData,
        }
    }

    /// Get handle direction
    pub fn direction(&self) -> StreamDirection {
        D::KIND
    }

    /// Spec the hardware granted
    pub fn spec(&self) -> &StreamSpec {
        self.stream.spec()
    }

    /// Stop the device moving data
    pub fn pause(&mut self) {
        self.stream.set_paused(true);
    }

    /// Let the device move data
    pub fn resume(&mut self) {
        self.stream.set_paused(false);
    }

    /// Check if the device is paused
    pub fn is_paused(&self) -> bool {
        self.stream.is_paused()
    }

    /// Bytes waiting in the device queue
    pub fn queued_bytes(&self) -> usize {
        self.stream.queued_bytes()
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.stream.clear();
    }
}

impl PlaybackHandle {
    /// Queue waveform bytes for the hardware
    pub fn enqueue(&mut self, data: &[u8]) -> Result<(), AudioError> {
        self.stream.enqueue(data)
    }
}

impl CaptureHandle {
    /// Take up to `out.len()` captured bytes
    pub fn dequeue(&mut self, out: &mut [u8]) -> usize {
        self.stream.dequeue(out)
    }
}

impl<D: Direction> fmt::Debug for DeviceHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("direction", &D::KIND)
            .field("spec", self.stream.spec())
            .field("paused", &self.stream.is_paused())
            .finish()
    }
}

impl<D: Direction> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        self.stream.set_paused(true);
        self.stream.close();
    }
}
