//! cpal-backed audio streams
//!
//! Each open device runs its cpal stream on a dedicated thread. The stream
//! callback owns one end of the device's byte queue and the owning
//! [`CpalStream`] the other, so the callback never waits on a lock.
//!
//! Capture buffers pass through a [`CaptureAdapter`] before they are queued:
//! the queue holds mono samples in the engine's format whatever channel
//! count or 32-bit integer layout the hardware granted.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::backend::{AudioBackend, AudioDeviceInfo, AudioStream, DeviceSelector, StreamDirection, StreamSpec};
use crate::audio::buffer::{create_byte_queue, QueueConsumer, QueueProducer};
use crate::audio::device::{find_device, list_devices};
use crate::audio::format::CaptureAdapter;
use crate::error::AudioError;

/// Seconds of captured audio the capture queue can hold
const CAPTURE_QUEUE_SECONDS: usize = 4;

/// Seconds of waveform the playback queue can hold
const PLAYBACK_QUEUE_SECONDS: usize = 60;

/// How long to wait for a stream thread to report that it is playing
const STREAM_START_TIMEOUT: Duration = Duration::from_secs(2);

/// [`AudioBackend`] over the default cpal host
pub struct CpalBackend {
    host: cpal::Host,
}

impl CpalBackend {
    /// Backend on the platform's default host
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// Get the underlying host
    pub fn host(&self) -> &cpal::Host {
        &self.host
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn devices(&self, direction: StreamDirection) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        list_devices(&self.host, direction)
    }

    fn open(
        &mut self,
        direction: StreamDirection,
        selector: &DeviceSelector,
        requested: &StreamSpec,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        let stream = CpalStream::open(&self.host, direction, selector, requested)?;
        Ok(Box::new(stream))
    }
}

/// The queue end kept by the stream's owner
enum LocalEnd {
    /// Scheduler writes waveforms, the callback plays them
    Playback(QueueProducer),
    /// Callback writes adapted samples, the scheduler reads them
    Capture(QueueConsumer),
}

/// The queue end moved into the cpal callback
enum CallbackEnd {
    Playback(QueueConsumer),
    Capture(QueueProducer),
}

/// One open cpal device and its queue
pub struct CpalStream {
    direction: StreamDirection,
    spec: StreamSpec,
    queue: LocalEnd,
    paused: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalStream {
    /// Open a device and start its stream thread, paused
    pub fn open(
        host: &cpal::Host,
        direction: StreamDirection,
        selector: &DeviceSelector,
        requested: &StreamSpec,
    ) -> Result<Self, AudioError> {
        let device = find_device(host, direction, selector)?;
        let (config, spec) = device.match_config(requested)?;

        let seconds = match direction {
            StreamDirection::Playback => PLAYBACK_QUEUE_SECONDS,
            StreamDirection::Capture => CAPTURE_QUEUE_SECONDS,
        };
        let capacity = spec.sample_rate as usize * spec.bytes_per_frame() * seconds;
        let (producer, consumer) = create_byte_queue(capacity);
        let (queue, callback_end) = match direction {
            StreamDirection::Playback => (LocalEnd::Playback(producer), CallbackEnd::Playback(consumer)),
            StreamDirection::Capture => (LocalEnd::Capture(consumer), CallbackEnd::Capture(producer)),
        };

        let paused = Arc::new(AtomicBool::new(true));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let device_name = device.name.clone();
        let sample_format: cpal::SampleFormat = spec.format.into();
        let hw_format = spec.format;
        let mut adapter = CaptureAdapter::new(spec.format, spec.channels);
        let paused_for_stream = paused.clone();
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-{}", direction, device_name))
            .spawn(move || {
                let cpal_device = device.into_inner();
                let error_name = device_name.clone();
                let on_error = move |err: cpal::StreamError| {
                    tracing::warn!(device = %error_name, "Stream error: {}", err);
                };

                let stream = match callback_end {
                    CallbackEnd::Capture(mut producer) => cpal_device.build_input_stream_raw(
                        &config,
                        sample_format,
                        move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                            if paused_for_stream.load(Ordering::Relaxed) {
                                return;
                            }
                            // overflow is counted by the queue
                            let _ = producer.push(adapter.adapt(data.bytes()));
                        },
                        on_error,
                        None,
                    ),
                    CallbackEnd::Playback(mut consumer) => cpal_device.build_output_stream_raw(
                        &config,
                        sample_format,
                        move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                            let out = data.bytes_mut();
                            let filled = if paused_for_stream.load(Ordering::Relaxed) {
                                0
                            } else {
                                consumer.drain_into(out)
                            };
                            hw_format.fill_silence(&mut out[filled..]);
                        },
                        on_error,
                        None,
                    ),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut stream = Self {
            direction,
            spec,
            queue,
            paused,
            running,
            thread_handle: Some(handle),
        };

        match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => {
                stream.close();
                Err(e)
            }
            Err(_) => {
                stream.close();
                Err(AudioError::StreamError(format!("{} stream did not start", direction)))
            }
        }
    }

    /// Get stream direction
    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Chunks dropped because the queue was full
    pub fn overflow_count(&self) -> usize {
        match &self.queue {
            LocalEnd::Playback(producer) => producer.overflow_count(),
            LocalEnd::Capture(consumer) => consumer.overflow_count(),
        }
    }

    /// Callback reads that found fewer bytes than the device asked for
    pub fn underrun_count(&self) -> usize {
        match &self.queue {
            LocalEnd::Playback(producer) => producer.underrun_count(),
            LocalEnd::Capture(consumer) => consumer.underrun_count(),
        }
    }
}

impl AudioStream for CpalStream {
    fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn queued_bytes(&self) -> usize {
        match &self.queue {
            LocalEnd::Playback(producer) => producer.len(),
            LocalEnd::Capture(consumer) => consumer.len(),
        }
    }

    fn enqueue(&mut self, data: &[u8]) -> Result<(), AudioError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceClosed);
        }
        let LocalEnd::Playback(producer) = &mut self.queue else {
            return Err(AudioError::StreamError("capture stream does not accept data".into()));
        };
        if producer.push(data) {
            Ok(())
        } else {
            Err(AudioError::StreamError(format!(
                "{} queue full ({} of {} bytes)",
                self.direction,
                producer.len(),
                producer.capacity()
            )))
        }
    }

    fn dequeue(&mut self, out: &mut [u8]) -> usize {
        match &mut self.queue {
            LocalEnd::Capture(consumer) => consumer.pop_into(out),
            LocalEnd::Playback(_) => 0,
        }
    }

    fn clear(&mut self) {
        match &mut self.queue {
            LocalEnd::Playback(producer) => producer.clear(),
            LocalEnd::Capture(consumer) => consumer.clear(),
        }
    }

    fn close(&mut self) {
        self.paused.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!(
                overflows = self.overflow_count(),
                underruns = self.underrun_count(),
                "Closed {} stream",
                self.direction
            );
        }
        self.clear();
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}
