//! Transceiver façade
//!
//! Wires the negotiator, the session lifecycle and the scheduler together.
//! Embedding code calls [`Transceiver::init`] until it succeeds, then
//! [`Transceiver::tick`] at the configured rate.

use std::time::Instant;

use crate::audio::backend::{AudioBackend, AudioDeviceInfo, StreamDirection};
use crate::config::AppConfig;
use crate::error::{AudioError, Result, SessionError};
use crate::modem::EngineFactory;
use crate::negotiator::DeviceNegotiator;
use crate::output::PayloadSink;
use crate::scheduler::{SchedulerStats, TickOutcome, TransceiverScheduler};
use crate::session::{Session, SessionLifecycle};

/// Device negotiation, session and scheduling behind one handle
pub struct Transceiver<B: AudioBackend> {
    config: AppConfig,
    negotiator: DeviceNegotiator<B>,
    lifecycle: SessionLifecycle,
    scheduler: TransceiverScheduler,
    sink: Box<dyn PayloadSink>,
}

impl<B: AudioBackend> Transceiver<B> {
    /// Transceiver with nothing opened yet
    pub fn new(config: AppConfig, backend: B, factory: Box<dyn EngineFactory>, sink: Box<dyn PayloadSink>) -> Self {
        let negotiator = DeviceNegotiator::new(backend).with_default_capture_name(config.audio.default_capture_name.clone());
        let scheduler = TransceiverScheduler::from_config(&config.scheduler);

        Self {
            config,
            negotiator,
            lifecycle: SessionLifecycle::new(factory),
            scheduler,
            sink,
        }
    }

    /// Open any closed device and rebuild the session if a device was
    /// (re)opened. Safe to call repeatedly.
    pub fn init(&mut self) -> Result<()> {
        let audio = &self.config.audio;
        self.negotiator.negotiate(
            &audio.playback_selector(),
            &audio.capture_selector(),
            audio.base_sample_rate,
            audio.sample_rate_offset,
        )?;

        if self.negotiator.is_reinit_pending() {
            let negotiated = self.negotiator.negotiated_config(&self.config.modem)?;
            self.negotiator.take_reinit();
            self.scheduler.reset();
            self.lifecycle.rebuild_if_needed(true, &negotiated)?;
        }

        Ok(())
    }

    /// Run one scheduling step
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let (playback, capture) = self.negotiator.devices_mut();
        self.scheduler
            .tick(now, playback, capture, self.lifecycle.session_mut(), self.sink.as_mut())
    }

    /// Queue `payload` for transmission at the configured volume
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let session = self.lifecycle.session_mut().ok_or(SessionError::NoSession)?;
        session.engine_mut().queue_payload(payload, self.config.modem.volume)?;
        tracing::info!("Queued {} bytes for transmission", payload.len());
        Ok(())
    }

    /// Drop the session and close both devices. Returns false if no device
    /// was open.
    pub fn shutdown(&mut self) -> bool {
        if !self.negotiator.has_playback() && !self.negotiator.has_capture() {
            return false;
        }

        self.lifecycle.destroy();
        self.negotiator.close_all();
        self.scheduler.reset();
        true
    }

    /// Enumerate devices for one direction
    pub fn devices(&self, direction: StreamDirection) -> std::result::Result<Vec<AudioDeviceInfo>, AudioError> {
        self.negotiator.devices(direction)
    }

    /// Check if playback is open
    pub fn has_playback(&self) -> bool {
        self.negotiator.has_playback()
    }

    /// Check if capture is open
    pub fn has_capture(&self) -> bool {
        self.negotiator.has_capture()
    }

    /// Both devices open and a session live
    pub fn is_active(&self) -> bool {
        self.negotiator.is_active() && self.lifecycle.session().is_some()
    }

    /// Get live session
    pub fn session(&self) -> Option<&Session> {
        self.lifecycle.session()
    }

    /// Input rate of the live session
    pub fn sample_rate_in(&self) -> Option<f32> {
        self.session().map(|session| session.engine().input_sample_rate())
    }

    /// Get scheduler counters
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Get configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Get device negotiator
    pub fn negotiator(&self) -> &DeviceNegotiator<B> {
        &self.negotiator
    }
}
