//! Session lifecycle
//!
//! Owns the single live modem engine. A rebuild always destroys the current
//! engine before the replacement is constructed, so two engines never
//! coexist.

use std::ops::{BitOr, BitOrAssign};

use crate::audio::backend::{StreamDirection, StreamSpec};
use crate::audio::format::SampleFormat;
use crate::config::ModemConfig;
use crate::constants::{DEFAULT_SAMPLE_RATE, SAMPLES_PER_FRAME};
use crate::error::{ModemError, SessionError};
use crate::modem::{EngineFactory, ModemEngine};

/// Engine operating mode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatingMode(u8);

impl OperatingMode {
    pub const RX: Self = Self(1 << 0);
    pub const TX: Self = Self(1 << 1);
    pub const RX_AND_TX: Self = Self(Self::RX.0 | Self::TX.0);
    /// Direct-sequence spread enhancement
    pub const USE_DSS: Self = Self(1 << 2);

    /// Check if every flag of `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw flag bits
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for OperatingMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OperatingMode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Engine parameters derived from the obtained device specs.
/// Only valid while the devices it was derived from stay open.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedConfig {
    pub payload_length: usize,
    pub sample_rate_in: f32,
    pub sample_rate_out: f32,
    /// Nominal rate of the protocol tables
    pub sample_rate: f32,
    pub samples_per_frame: usize,
    pub marker_threshold: f32,
    pub sample_format_in: SampleFormat,
    pub sample_format_out: SampleFormat,
    pub operating_mode: OperatingMode,
}

impl NegotiatedConfig {
    /// Engine parameters for an obtained playback/capture pair
    pub fn new(playback: &StreamSpec, capture: &StreamSpec, modem: &ModemConfig) -> Self {
        let mut operating_mode = OperatingMode::RX_AND_TX;
        if modem.use_dss {
            operating_mode |= OperatingMode::USE_DSS;
        }

        Self {
            payload_length: modem.payload_length,
            sample_rate_in: capture.sample_rate as f32,
            sample_rate_out: playback.sample_rate as f32,
            sample_rate: DEFAULT_SAMPLE_RATE as f32,
            samples_per_frame: SAMPLES_PER_FRAME,
            marker_threshold: modem.marker_threshold,
            sample_format_in: capture.format.to_modem_format(),
            sample_format_out: playback.format.to_modem_format(),
            operating_mode,
        }
    }

    /// Reject configurations no engine can be built from
    pub fn validate(&self) -> Result<(), ModemError> {
        if !self.sample_format_in.is_defined() {
            return Err(ModemError::UndefinedSampleFormat(StreamDirection::Capture));
        }
        if !self.sample_format_out.is_defined() {
            return Err(ModemError::UndefinedSampleFormat(StreamDirection::Playback));
        }
        if self.samples_per_frame == 0 {
            return Err(ModemError::InvalidParameters("samples per frame is zero".into()));
        }
        if self.payload_length == 0 {
            return Err(ModemError::InvalidParameters("payload length is zero".into()));
        }
        if self.sample_rate_in <= 0.0 || self.sample_rate_out <= 0.0 {
            return Err(ModemError::InvalidParameters(format!(
                "sample rates must be positive (in {}, out {})",
                self.sample_rate_in, self.sample_rate_out
            )));
        }
        Ok(())
    }
}

/// The live engine together with the configuration it was built from
pub struct Session {
    config: NegotiatedConfig,
    engine: Box<dyn ModemEngine>,
}

impl Session {
    /// Configuration the engine was built from
    pub fn config(&self) -> &NegotiatedConfig {
        &self.config
    }

    /// Get the engine
    pub fn engine(&self) -> &dyn ModemEngine {
        self.engine.as_ref()
    }

    /// Get the engine mutably
    pub fn engine_mut(&mut self) -> &mut dyn ModemEngine {
        self.engine.as_mut()
    }
}

/// Exclusive owner of the session
pub struct SessionLifecycle {
    factory: Box<dyn EngineFactory>,
    session: Option<Session>,
    generation: u64,
}

impl SessionLifecycle {
    /// Lifecycle with no session yet
    pub fn new(factory: Box<dyn EngineFactory>) -> Self {
        Self {
            factory,
            session: None,
            generation: 0,
        }
    }

    /// Rebuild the session when `reinit` is set, otherwise return the live one.
    ///
    /// On rebuild the previous session is destroyed first. If construction
    /// then fails, no session exists until the next successful rebuild.
    pub fn rebuild_if_needed(&mut self, reinit: bool, config: &NegotiatedConfig) -> Result<&mut Session, SessionError> {
        if reinit {
            if self.session.take().is_some() {
                tracing::debug!("Destroyed previous session");
            }

            config.validate()?;
            let engine = self.factory.build(config)?;
            self.generation += 1;

            tracing::info!(
                generation = self.generation,
                rate_in = config.sample_rate_in,
                rate_out = config.sample_rate_out,
                format_in = ?config.sample_format_in,
                format_out = ?config.sample_format_out,
                payload_length = config.payload_length,
                dss = config.operating_mode.contains(OperatingMode::USE_DSS),
                "Session initialized"
            );

            self.session = Some(Session {
                config: config.clone(),
                engine,
            });
        }

        self.session.as_mut().ok_or(SessionError::NoSession)
    }

    /// Get live session
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Get live session mutably
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Drop the session. Returns false if there was none.
    pub fn destroy(&mut self) -> bool {
        self.session.take().is_some()
    }

    /// Number of sessions built so far
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::HardwareFormat;
    use std::cell::Cell;
    use std::rc::Rc;

    struct NullEngine {
        drops: Rc<Cell<usize>>,
    }

    impl ModemEngine for NullEngine {
        fn has_outbound_data(&self) -> bool {
            false
        }
        fn produce_waveform(&mut self) -> &[u8] {
            &[]
        }
        fn decode(&mut self, _data: &[u8]) -> bool {
            true
        }
        fn take_received_payload(&mut self) -> Option<Vec<u8>> {
            None
        }
        fn queue_payload(&mut self, _payload: &[u8], _volume: u8) -> Result<(), ModemError> {
            Ok(())
        }
        fn samples_per_frame(&self) -> usize {
            SAMPLES_PER_FRAME
        }
        fn input_sample_width(&self) -> usize {
            4
        }
        fn output_sample_width(&self) -> usize {
            2
        }
        fn input_sample_rate(&self) -> f32 {
            48000.0
        }
    }

    impl Drop for NullEngine {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn spec(format: HardwareFormat) -> StreamSpec {
        StreamSpec {
            sample_rate: 48000,
            format,
            channels: 1,
            frame_size: 1024,
        }
    }

    fn lifecycle(drops: Rc<Cell<usize>>, live: Rc<Cell<usize>>) -> SessionLifecycle {
        SessionLifecycle::new(Box::new(move |_: &NegotiatedConfig| {
            // no two engines may be alive at once
            assert_eq!(live.get() - drops.get(), 0);
            live.set(live.get() + 1);
            Ok::<_, ModemError>(Box::new(NullEngine { drops: drops.clone() }) as Box<dyn ModemEngine>)
        }))
    }

    #[test]
    fn test_config_from_specs() {
        let modem = ModemConfig::default();
        let config = NegotiatedConfig::new(&spec(HardwareFormat::I16), &spec(HardwareFormat::F32), &modem);

        assert_eq!(config.sample_format_out, SampleFormat::I16);
        assert_eq!(config.sample_format_in, SampleFormat::F32);
        assert_eq!(config.samples_per_frame, 512);
        assert!(config.operating_mode.contains(OperatingMode::RX_AND_TX));
        assert!(config.operating_mode.contains(OperatingMode::USE_DSS));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rebuild_replaces_session() {
        let drops = Rc::new(Cell::new(0));
        let live = Rc::new(Cell::new(0));
        let mut lifecycle = lifecycle(drops.clone(), live.clone());
        let config = NegotiatedConfig::new(&spec(HardwareFormat::I16), &spec(HardwareFormat::F32), &ModemConfig::default());

        lifecycle.rebuild_if_needed(true, &config).unwrap();
        lifecycle.rebuild_if_needed(true, &config).unwrap();
        assert_eq!(lifecycle.generation(), 2);
        assert_eq!(drops.get(), 1);

        // no reinit: same session back
        lifecycle.rebuild_if_needed(false, &config).unwrap();
        assert_eq!(lifecycle.generation(), 2);

        assert!(lifecycle.destroy());
        assert_eq!(drops.get(), 2);
        assert!(!lifecycle.destroy());
    }

    #[test]
    fn test_undefined_format_blocks_session() {
        let drops = Rc::new(Cell::new(0));
        let live = Rc::new(Cell::new(0));
        let mut lifecycle = lifecycle(drops.clone(), live.clone());
        let good = NegotiatedConfig::new(&spec(HardwareFormat::I16), &spec(HardwareFormat::F32), &ModemConfig::default());
        lifecycle.rebuild_if_needed(true, &good).unwrap();

        let bad = NegotiatedConfig::new(&spec(HardwareFormat::I16), &spec(HardwareFormat::F64), &ModemConfig::default());
        let err = lifecycle.rebuild_if_needed(true, &bad).err();
        assert_eq!(
            err,
            Some(SessionError::Build(ModemError::UndefinedSampleFormat(StreamDirection::Capture)))
        );
        assert!(lifecycle.session().is_none());
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_no_session_without_reinit() {
        let mut lifecycle = lifecycle(Rc::new(Cell::new(0)), Rc::new(Cell::new(0)));
        let config = NegotiatedConfig::new(&spec(HardwareFormat::I16), &spec(HardwareFormat::F32), &ModemConfig::default());
        assert!(matches!(
            lifecycle.rebuild_if_needed(false, &config),
            Err(SessionError::NoSession)
        ));
    }
}
