//! In-memory audio backend for tests

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::audio::backend::{AudioBackend, AudioDeviceInfo, AudioStream, DeviceSelector, StreamDirection, StreamSpec};
use crate::error::AudioError;

/// Observable state of one mock device
#[derive(Debug)]
pub struct MockStreamState {
    pub spec: StreamSpec,
    pub paused: bool,
    pub closed: bool,
    pub queue: VecDeque<u8>,
    pub enqueue_calls: usize,
    pub clear_calls: usize,
}

pub type SharedMockState = Arc<Mutex<MockStreamState>>;

#[derive(Default)]
struct MockInner {
    grants: HashMap<StreamDirection, StreamSpec>,
    failures: HashSet<StreamDirection>,
    opened: Vec<(StreamDirection, DeviceSelector)>,
    streams: Vec<(StreamDirection, SharedMockState)>,
    operations: usize,
}

/// Backend whose devices grant whatever is requested unless told otherwise.
/// Clones share state, so a test can keep one while the code under test
/// owns another.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockInner>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next opens of `direction` grant `spec` instead of the request
    pub fn grant(&self, direction: StreamDirection, spec: StreamSpec) {
        self.inner.lock().grants.insert(direction, spec);
    }

    /// Make opens of `direction` fail
    pub fn fail_open(&self, direction: StreamDirection) {
        self.inner.lock().failures.insert(direction);
    }

    pub fn allow_open(&self, direction: StreamDirection) {
        self.inner.lock().failures.remove(&direction);
    }

    /// Open calls and stream operations performed so far
    pub fn operations(&self) -> usize {
        self.inner.lock().operations
    }

    pub fn opened(&self) -> Vec<(StreamDirection, DeviceSelector)> {
        self.inner.lock().opened.clone()
    }

    fn last(&self, direction: StreamDirection) -> Option<SharedMockState> {
        self.inner
            .lock()
            .streams
            .iter()
            .rev()
            .find(|(d, _)| *d == direction)
            .map(|(_, s)| s.clone())
    }

    pub fn last_playback(&self) -> Option<SharedMockState> {
        self.last(StreamDirection::Playback)
    }

    pub fn last_capture(&self) -> Option<SharedMockState> {
        self.last(StreamDirection::Capture)
    }
}

impl AudioBackend for MockBackend {
    fn devices(&self, direction: StreamDirection) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        Ok((0..2)
            .map(|index| AudioDeviceInfo {
                index,
                name: format!("Mock {} {}", direction, index),
                direction,
                is_default: index == 0,
            })
            .collect())
    }

    fn open(
        &mut self,
        direction: StreamDirection,
        selector: &DeviceSelector,
        requested: &StreamSpec,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        let mut inner = self.inner.lock();
        inner.operations += 1;
        inner.opened.push((direction, selector.clone()));

        if inner.failures.contains(&direction) {
            return Err(AudioError::DeviceNotFound(format!("{} device {}", direction, selector)));
        }

        let spec = inner.grants.get(&direction).copied().unwrap_or(*requested);
        let state = Arc::new(Mutex::new(MockStreamState {
            spec,
            paused: true,
            closed: false,
            queue: VecDeque::new(),
            enqueue_calls: 0,
            clear_calls: 0,
        }));
        inner.streams.push((direction, state.clone()));

        Ok(Box::new(MockStream {
            spec,
            state,
            backend: self.inner.clone(),
        }))
    }
}

struct MockStream {
    spec: StreamSpec,
    state: SharedMockState,
    backend: Arc<Mutex<MockInner>>,
}

impl MockStream {
    fn count(&self) {
        self.backend.lock().operations += 1;
    }
}

impl AudioStream for MockStream {
    fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    fn set_paused(&mut self, paused: bool) {
        self.count();
        self.state.lock().paused = paused;
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn queued_bytes(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn enqueue(&mut self, data: &[u8]) -> Result<(), AudioError> {
        self.count();
        let mut state = self.state.lock();
        if state.closed {
            return Err(AudioError::DeviceClosed);
        }
        state.enqueue_calls += 1;
        state.queue.extend(data);
        Ok(())
    }

    fn dequeue(&mut self, out: &mut [u8]) -> usize {
        self.count();
        let mut state = self.state.lock();
        let n = out.len().min(state.queue.len());
        for (dst, src) in out.iter_mut().zip(state.queue.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn clear(&mut self) {
        self.count();
        let mut state = self.state.lock();
        state.clear_calls += 1;
        state.queue.clear();
    }

    fn close(&mut self) {
        self.count();
        let mut state = self.state.lock();
        state.closed = true;
        state.queue.clear();
    }
}
