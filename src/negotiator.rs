//! Device negotiation
//!
//! Opens the playback and capture devices with the formats the transceiver
//! needs and records what the hardware actually granted. Each side is opened
//! at most once; calling [`DeviceNegotiator::negotiate`] again only fills in
//! a side that is still closed.

use crate::audio::backend::{AudioBackend, AudioDeviceInfo, DeviceSelector, StreamDirection, StreamSpec};
use crate::audio::format::HardwareFormat;
use crate::audio::handle::{CaptureHandle, PlaybackHandle};
use crate::config::ModemConfig;
use crate::constants::{CAPTURE_BUFFER_SAMPLES, PLAYBACK_BUFFER_SAMPLES, PLAYBACK_CHANNELS};
use crate::error::{AudioError, NegotiationError};
use crate::session::NegotiatedConfig;

/// Owner of the two open device handles
pub struct DeviceNegotiator<B: AudioBackend> {
    backend: B,
    playback: Option<PlaybackHandle>,
    capture: Option<CaptureHandle>,
    default_capture_name: Option<String>,
    reinit_pending: bool,
}

impl<B: AudioBackend> DeviceNegotiator<B> {
    /// Negotiator with no devices open
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            playback: None,
            capture: None,
            default_capture_name: None,
            reinit_pending: false,
        }
    }

    /// Open this named device whenever the capture selector is the default
    pub fn with_default_capture_name(mut self, name: Option<String>) -> Self {
        self.default_capture_name = name;
        self
    }

    /// Open whichever sides are still closed.
    ///
    /// Playback is opened first and must be granted exactly the requested
    /// format, channel count and buffer size; otherwise it is released again
    /// and negotiation fails before capture is touched. Capture follows with
    /// the playback channel count and may differ in anything but its
    /// mapped format.
    pub fn negotiate(
        &mut self,
        playback_selector: &DeviceSelector,
        capture_selector: &DeviceSelector,
        base_sample_rate: u32,
        sample_rate_offset: i32,
    ) -> Result<(), NegotiationError> {
        if self.playback.is_some() && self.capture.is_some() {
            return Ok(());
        }

        if self.playback.is_none() && self.capture.is_none() {
            self.log_devices();
        }

        let sample_rate = base_sample_rate.saturating_add_signed(sample_rate_offset);

        if self.playback.is_none() {
            let handle = self.open_playback(playback_selector, sample_rate)?;
            self.playback = Some(handle);
            self.reinit_pending = true;
        }

        if self.capture.is_none() {
            let channels = self
                .playback
                .as_ref()
                .map_or(PLAYBACK_CHANNELS, |playback| playback.spec().channels);
            let handle = self.open_capture(capture_selector, sample_rate, channels)?;
            self.capture = Some(handle);
            self.reinit_pending = true;
        }

        Ok(())
    }

    fn open_playback(&mut self, selector: &DeviceSelector, sample_rate: u32) -> Result<PlaybackHandle, NegotiationError> {
        let requested = StreamSpec {
            sample_rate,
            format: HardwareFormat::I16,
            channels: PLAYBACK_CHANNELS,
            frame_size: PLAYBACK_BUFFER_SAMPLES,
        };

        tracing::info!("Opening playback device {}", selector);
        let stream = self
            .backend
            .open(StreamDirection::Playback, selector, &requested)
            .map_err(|source| open_failed(StreamDirection::Playback, source))?;
        let handle = PlaybackHandle::new(stream);
        let obtained = *handle.spec();

        tracing::info!("Obtained spec for output device:");
        log_spec(&obtained);

        if obtained.format != requested.format
            || obtained.channels != requested.channels
            || obtained.frame_size != requested.frame_size
        {
            tracing::error!(
                requested = %requested,
                obtained = %obtained,
                "Playback device did not grant the required spec, releasing it"
            );
            return Err(NegotiationError::PlaybackMismatch { requested, obtained });
        }

        Ok(handle)
    }

    fn open_capture(
        &mut self,
        selector: &DeviceSelector,
        sample_rate: u32,
        channels: u16,
    ) -> Result<CaptureHandle, NegotiationError> {
        let requested = StreamSpec {
            sample_rate,
            format: HardwareFormat::F32,
            channels,
            frame_size: CAPTURE_BUFFER_SAMPLES,
        };

        let selector = match (selector, &self.default_capture_name) {
            (DeviceSelector::Default, Some(name)) => DeviceSelector::Name(name.clone()),
            (selector, _) => selector.clone(),
        };

        tracing::info!("Opening capture device {}", selector);
        let stream = self
            .backend
            .open(StreamDirection::Capture, &selector, &requested)
            .map_err(|source| open_failed(StreamDirection::Capture, source))?;
        let handle = CaptureHandle::new(stream);
        let obtained = *handle.spec();

        tracing::info!("Obtained spec for input device:");
        log_spec(&obtained);

        // the capture queue carries channel 0 only, so any channel count works
        if obtained != requested {
            tracing::debug!(requested = %requested, obtained = %obtained, "Capture spec differs from request");
        }

        Ok(handle)
    }

    fn log_devices(&self) {
        for direction in [StreamDirection::Playback, StreamDirection::Capture] {
            match self.backend.devices(direction) {
                Ok(devices) => {
                    tracing::info!("Found {} {} devices", devices.len(), direction);
                    for device in &devices {
                        tracing::info!("    - {} device #{}: '{}'", direction, device.index, device.name);
                    }
                }
                Err(e) => tracing::warn!("Failed to enumerate {} devices: {}", direction, e),
            }
        }
    }

    /// Enumerate devices for one direction
    pub fn devices(&self, direction: StreamDirection) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        self.backend.devices(direction)
    }

    /// Check if a device was (re)opened since the last session build
    pub fn is_reinit_pending(&self) -> bool {
        self.reinit_pending
    }

    /// Consume the reinitialize flag
    pub fn take_reinit(&mut self) -> bool {
        std::mem::take(&mut self.reinit_pending)
    }

    /// Engine parameters for the currently open pair
    pub fn negotiated_config(&self, modem: &ModemConfig) -> Result<NegotiatedConfig, NegotiationError> {
        let playback = self
            .playback
            .as_ref()
            .ok_or(NegotiationError::Incomplete(StreamDirection::Playback))?;
        let capture = self
            .capture
            .as_ref()
            .ok_or(NegotiationError::Incomplete(StreamDirection::Capture))?;

        Ok(NegotiatedConfig::new(playback.spec(), capture.spec(), modem))
    }

    /// Get open playback handle
    pub fn playback(&self) -> Option<&PlaybackHandle> {
        self.playback.as_ref()
    }

    /// Get open capture handle
    pub fn capture(&self) -> Option<&CaptureHandle> {
        self.capture.as_ref()
    }

    /// Mutable access to both handles at once
    pub fn devices_mut(&mut self) -> (Option<&mut PlaybackHandle>, Option<&mut CaptureHandle>) {
        (self.playback.as_mut(), self.capture.as_mut())
    }

    /// Check if playback is open
    pub fn has_playback(&self) -> bool {
        self.playback.is_some()
    }

    /// Check if capture is open
    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    /// Both sides open
    pub fn is_active(&self) -> bool {
        self.has_playback() && self.has_capture()
    }

    /// Pause both devices, then close them. Returns false if neither was open.
    pub fn close_all(&mut self) -> bool {
        if self.playback.is_none() && self.capture.is_none() {
            return false;
        }

        if let Some(playback) = self.playback.as_mut() {
            playback.pause();
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.pause();
        }
        self.playback = None;
        self.capture = None;

        tracing::info!("Audio devices closed");
        true
    }

    /// Get the audio backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn open_failed(direction: StreamDirection, source: AudioError) -> NegotiationError {
    tracing::error!("Couldn't open an audio device for {}: {}", direction, source);
    NegotiationError::OpenFailed { direction, source }
}

fn log_spec(spec: &StreamSpec) {
    tracing::info!("    - Sample rate:       {}", spec.sample_rate);
    tracing::info!("    - Format:            {:?}", spec.format);
    tracing::info!("    - Channels:          {}", spec.channels);
    tracing::info!("    - Samples per frame: {}", spec.frame_size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleFormat;
    use crate::audio::mock::MockBackend;

    fn negotiator() -> (DeviceNegotiator<MockBackend>, MockBackend) {
        let backend = MockBackend::new();
        (DeviceNegotiator::new(backend.clone()), backend)
    }

    #[test]
    fn test_exact_grant_succeeds() {
        let (mut negotiator, backend) = negotiator();
        negotiator
            .negotiate(&DeviceSelector::Default, &DeviceSelector::Default, 48000, 0)
            .unwrap();

        assert!(negotiator.is_active());
        assert!(negotiator.take_reinit());
        assert!(!negotiator.is_reinit_pending());

        let playback = backend.last_playback().unwrap();
        assert_eq!(playback.lock().spec.frame_size, 16384);
        assert_eq!(playback.lock().spec.format, HardwareFormat::I16);

        let capture = backend.last_capture().unwrap();
        assert_eq!(capture.lock().spec.format, HardwareFormat::F32);
        assert_eq!(capture.lock().spec.frame_size, 1024);

        let config = negotiator.negotiated_config(&ModemConfig::default()).unwrap();
        assert_eq!(config.sample_format_out, SampleFormat::I16);
        assert_eq!(config.sample_format_in, SampleFormat::F32);
        assert_eq!(config.sample_rate_out, 48000.0);
    }

    #[test]
    fn test_sample_rate_offset_applied() {
        let (mut negotiator, backend) = negotiator();
        negotiator
            .negotiate(&DeviceSelector::Index(1), &DeviceSelector::Index(0), 48000, -200)
            .unwrap();

        assert_eq!(backend.last_playback().unwrap().lock().spec.sample_rate, 47800);
        assert_eq!(backend.last_capture().unwrap().lock().spec.sample_rate, 47800);
        assert_eq!(
            backend.opened(),
            vec![
                (StreamDirection::Playback, DeviceSelector::Index(1)),
                (StreamDirection::Capture, DeviceSelector::Index(0)),
            ]
        );
    }

    #[test]
    fn test_second_negotiate_is_noop() {
        let (mut negotiator, backend) = negotiator();
        negotiator
            .negotiate(&DeviceSelector::Default, &DeviceSelector::Default, 48000, 0)
            .unwrap();
        negotiator.take_reinit();
        let before = backend.operations();

        negotiator
            .negotiate(&DeviceSelector::Index(1), &DeviceSelector::Index(1), 44100, 0)
            .unwrap();

        assert_eq!(backend.operations(), before);
        assert!(!negotiator.is_reinit_pending());
        assert_eq!(negotiator.playback().unwrap().spec().sample_rate, 48000);
    }

    #[test]
    fn test_playback_buffer_mismatch_fails() {
        let (mut negotiator, backend) = negotiator();
        backend.grant(
            StreamDirection::Playback,
            StreamSpec {
                sample_rate: 48000,
                format: HardwareFormat::I16,
                channels: 1,
                frame_size: 8192,
            },
        );

        let err = negotiator
            .negotiate(&DeviceSelector::Default, &DeviceSelector::Default, 48000, 0)
            .unwrap_err();

        assert!(matches!(err, NegotiationError::PlaybackMismatch { obtained, .. } if obtained.frame_size == 8192));
        assert!(!negotiator.has_playback());
        assert!(!negotiator.has_capture());
        assert!(!negotiator.is_reinit_pending());

        let playback = backend.last_playback().unwrap();
        assert!(playback.lock().closed);
        assert!(backend.last_capture().is_none());
    }

    #[test]
    fn test_capture_mismatch_tolerated() {
        let (mut negotiator, backend) = negotiator();
        backend.grant(
            StreamDirection::Capture,
            StreamSpec {
                sample_rate: 44100,
                format: HardwareFormat::I16,
                channels: 2,
                frame_size: 512,
            },
        );

        negotiator
            .negotiate(&DeviceSelector::Default, &DeviceSelector::Default, 48000, 0)
            .unwrap();

        let config = negotiator.negotiated_config(&ModemConfig::default()).unwrap();
        assert_eq!(config.sample_format_in, SampleFormat::I16);
        assert_eq!(config.sample_rate_in, 44100.0);
    }

    #[test]
    fn test_capture_open_failure_keeps_playback() {
        let (mut negotiator, backend) = negotiator();
        backend.fail_open(StreamDirection::Capture);

        let err = negotiator
            .negotiate(&DeviceSelector::Default, &DeviceSelector::Default, 48000, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::OpenFailed {
                direction: StreamDirection::Capture,
                ..
            }
        ));
        assert!(negotiator.has_playback());
        assert!(negotiator.is_reinit_pending());
        assert!(matches!(
            negotiator.negotiated_config(&ModemConfig::default()),
            Err(NegotiationError::Incomplete(StreamDirection::Capture))
        ));

        backend.allow_open(StreamDirection::Capture);
        negotiator
            .negotiate(&DeviceSelector::Default, &DeviceSelector::Default, 48000, 0)
            .unwrap();
        assert!(negotiator.is_active());
        // playback was not reopened
        assert_eq!(
            backend
                .opened()
                .iter()
                .filter(|(d, _)| *d == StreamDirection::Playback)
                .count(),
            1
        );
    }

    #[test]
    fn test_default_capture_name() {
        let backend = MockBackend::new();
        let mut negotiator = DeviceNegotiator::new(backend.clone()).with_default_capture_name(Some("USB Mic".into()));

        negotiator
            .negotiate(&DeviceSelector::Default, &DeviceSelector::Default, 48000, 0)
            .unwrap();
        assert_eq!(
            backend.opened()[1],
            (StreamDirection::Capture, DeviceSelector::Name("USB Mic".into()))
        );
    }

    #[test]
    fn test_close_all() {
        let (mut negotiator, backend) = negotiator();
        assert!(!negotiator.close_all());

        negotiator
            .negotiate(&DeviceSelector::Default, &DeviceSelector::Default, 48000, 0)
            .unwrap();
        assert!(negotiator.close_all());
        assert!(!negotiator.is_active());

        for state in [backend.last_playback().unwrap(), backend.last_capture().unwrap()] {
            let state = state.lock();
            assert!(state.paused);
            assert!(state.closed);
        }
    }
}
