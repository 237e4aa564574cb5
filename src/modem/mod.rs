//! Modem engine contract
//!
//! The engine does the actual modulation and demodulation. The transceiver
//! only asks it whether outbound data is pending, pulls waveform buffers,
//! pushes captured frames, and collects completed payloads.

pub mod tone;

#[cfg(test)]
pub mod scripted;

pub use tone::{ToneModem, ToneModemFactory};

use crate::error::ModemError;
use crate::session::NegotiatedConfig;

/// Engine operations used by the transceiver
pub trait ModemEngine {
    /// Whether queued outbound data still has waveform left to produce
    fn has_outbound_data(&self) -> bool;

    /// Produce the next waveform buffer in the output sample format.
    /// Multi-buffer transmissions continue on the next call.
    fn produce_waveform(&mut self) -> &[u8];

    /// Feed one captured frame in the input sample format.
    /// Returns false if the buffer was rejected.
    fn decode(&mut self, data: &[u8]) -> bool;

    /// Take the most recently completed payload, if any
    fn take_received_payload(&mut self) -> Option<Vec<u8>>;

    /// Start transmitting `payload` at `volume` percent
    fn queue_payload(&mut self, payload: &[u8], volume: u8) -> Result<(), ModemError>;

    fn samples_per_frame(&self) -> usize;

    /// Bytes per input sample
    fn input_sample_width(&self) -> usize;

    /// Bytes per output sample
    fn output_sample_width(&self) -> usize;

    fn input_sample_rate(&self) -> f32;
}

/// Builds engines from a negotiated configuration
pub trait EngineFactory {
    fn build(&self, config: &NegotiatedConfig) -> Result<Box<dyn ModemEngine>, ModemError>;
}

impl<F> EngineFactory for F
where
    F: Fn(&NegotiatedConfig) -> Result<Box<dyn ModemEngine>, ModemError>,
{
    fn build(&self, config: &NegotiatedConfig) -> Result<Box<dyn ModemEngine>, ModemError> {
        self(config)
    }
}
