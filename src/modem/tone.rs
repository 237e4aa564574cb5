//! Reference tone modem
//!
//! A small marker-plus-binary-tone engine. Each transmission is a run of
//! marker frames followed by the framed payload, one bit per frame, MSB
//! first, and one silent guard frame. Tones sit on exact FFT bins of the
//! protocol rate so that a frame-aligned window sees them orthogonally.
//! Detection uses the Goertzel algorithm.
//!
//! Captured frames rarely line up with transmitted ones. The receiver keeps
//! a short sample history and slides a frame-sized window over it in
//! sub-frame hops until it has seen a long enough marker run. The last
//! window lying wholly inside that run fixes the frame boundary, and bits
//! are then read one frame at a time from there.
//!
//! Framed block: `[length][payload, zero padded to payload_length][crc8]`.

use std::collections::VecDeque;
use std::f32::consts::PI;

use crate::error::ModemError;
use crate::modem::{EngineFactory, ModemEngine};
use crate::session::{NegotiatedConfig, OperatingMode};

/// Marker frames sent before every payload
const MARKER_FRAMES: usize = 8;

/// Consecutive marker frames needed before bits are accepted
const MARKER_MIN_FRAMES: usize = 4;

/// Silent frames closing every transmission
const TRAILING_SILENCE_FRAMES: usize = 1;

/// Frames synthesized per `produce_waveform` call
const FRAMES_PER_BUFFER: usize = 16;

/// Search window steps per frame
const SEARCH_STEPS_PER_FRAME: usize = 16;

/// Share of the peak marker power a window needs to count as inside the run
const FULL_MARKER_RATIO: f32 = 0.9;

const MARKER_BIN: f32 = 40.0;
const ZERO_BIN: f32 = 24.0;
const ONE_BIN: f32 = 32.0;

/// Below this normalized power a frame counts as silence
const MIN_FRAME_POWER: f32 = 1e-4;

/// Galois LFSR seed for spread whitening
const DSS_SEED: u8 = 0xA5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Marker,
    Bit(bool),
    Silence,
}

#[derive(Debug)]
enum RxState {
    /// Sliding over the stream until a marker run is long enough
    Searching {
        run_start: Option<usize>,
        last_full: Option<usize>,
        peak: f32,
    },
    /// Reading one bit per frame from the recovered boundary
    Receiving { bits: Vec<bool> },
}

impl RxState {
    fn searching() -> Self {
        Self::Searching {
            run_start: None,
            last_full: None,
            peak: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TonePowers {
    marker: f32,
    zero: f32,
    one: f32,
}

/// Marker/tone modem implementing [`ModemEngine`]
pub struct ToneModem {
    config: NegotiatedConfig,
    tx_symbols: VecDeque<Symbol>,
    tx_amplitude: f32,
    waveform: Vec<u8>,
    rx_state: RxState,
    /// Undecoded input, starting at stream position `rx_origin`
    rx_samples: Vec<f32>,
    rx_origin: usize,
    /// Stream position of the next window
    rx_cursor: usize,
    received: Option<Vec<u8>>,
    frames_decoded: u64,
    payloads_received: u64,
}

impl ToneModem {
    /// Build an engine, rejecting configurations it cannot run
    pub fn new(config: NegotiatedConfig) -> Result<Self, ModemError> {
        config.validate()?;
        if config.payload_length > u8::MAX as usize {
            return Err(ModemError::InvalidParameters(format!(
                "payload length {} does not fit the length byte",
                config.payload_length
            )));
        }

        Ok(Self {
            rx_samples: Vec::with_capacity(config.samples_per_frame * 3),
            rx_origin: 0,
            rx_cursor: 0,
            config,
            tx_symbols: VecDeque::new(),
            tx_amplitude: 0.0,
            waveform: Vec::new(),
            rx_state: RxState::searching(),
            received: None,
            frames_decoded: 0,
            payloads_received: 0,
        })
    }

    /// Get session parameters
    pub fn config(&self) -> &NegotiatedConfig {
        &self.config
    }

    /// Frames accepted by `decode`
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Payloads that passed the checksum
    pub fn payloads_received(&self) -> u64 {
        self.payloads_received
    }

    /// Frames a full transmission occupies
    pub fn frames_per_transmission(&self) -> usize {
        MARKER_FRAMES + self.block_len() * 8 + TRAILING_SILENCE_FRAMES
    }

    fn block_len(&self) -> usize {
        self.config.payload_length + 2
    }

    fn uses_dss(&self) -> bool {
        self.config.operating_mode.contains(OperatingMode::USE_DSS)
    }

    fn tone_hz(&self, bin: f32) -> f32 {
        bin * self.config.sample_rate / self.config.samples_per_frame as f32
    }

    fn encode_block(&self, payload: &[u8]) -> Vec<u8> {
        let mut block = vec![0u8; self.block_len()];
        block[0] = payload.len() as u8;
        block[1..1 + payload.len()].copy_from_slice(payload);
        let crc_at = block.len() - 1;
        block[crc_at] = crc8(&block[..crc_at]);
        if self.uses_dss() {
            whiten(&mut block);
        }
        block
    }

    fn decode_block(&self, bits: &[bool]) -> Option<Vec<u8>> {
        let mut block: Vec<u8> = bits
            .chunks(8)
            .map(|chunk| chunk.iter().fold(0u8, |byte, &bit| (byte << 1) | bit as u8))
            .collect();
        if self.uses_dss() {
            whiten(&mut block);
        }

        let crc_at = block.len() - 1;
        if crc8(&block[..crc_at]) != block[crc_at] {
            tracing::debug!("Dropping block with bad checksum");
            return None;
        }

        let len = block[0] as usize;
        if len == 0 || len > self.config.payload_length {
            return None;
        }
        Some(block[1..1 + len].to_vec())
    }

    fn synthesize(&self, symbol: Symbol, out: &mut Vec<f32>) {
        let bin = match symbol {
            Symbol::Marker => MARKER_BIN,
            Symbol::Bit(false) => ZERO_BIN,
            Symbol::Bit(true) => ONE_BIN,
            Symbol::Silence => {
                out.resize(out.len() + self.config.samples_per_frame, 0.0);
                return;
            }
        };
        let omega = 2.0 * PI * self.tone_hz(bin) / self.config.sample_rate_out;
        out.extend((0..self.config.samples_per_frame).map(|n| self.tx_amplitude * (omega * n as f32).sin()));
    }

    fn powers(&self, window: &[f32]) -> TonePowers {
        let rate = self.config.sample_rate_in;
        TonePowers {
            marker: goertzel_power(window, self.tone_hz(MARKER_BIN), rate),
            zero: goertzel_power(window, self.tone_hz(ZERO_BIN), rate),
            one: goertzel_power(window, self.tone_hz(ONE_BIN), rate),
        }
    }

    fn classify(&self, powers: TonePowers) -> Option<Symbol> {
        let TonePowers { marker, zero, one } = powers;
        if marker.max(zero).max(one) < MIN_FRAME_POWER {
            return None;
        }
        if marker >= self.config.marker_threshold * zero.max(one) {
            return Some(Symbol::Marker);
        }
        Some(Symbol::Bit(one > zero))
    }

    /// Run every complete window the sample history holds
    fn process_rx(&mut self) {
        let spf = self.config.samples_per_frame;
        loop {
            let start = self.rx_cursor - self.rx_origin;
            if start + spf > self.rx_samples.len() {
                break;
            }

            let powers = self.powers(&self.rx_samples[start..start + spf]);
            let state = std::mem::replace(&mut self.rx_state, RxState::searching());
            self.rx_state = match state {
                RxState::Searching {
                    run_start,
                    last_full,
                    peak,
                } => self.search(run_start, last_full, peak, powers),
                RxState::Receiving { bits } => self.receive(bits, powers),
            };
        }

        let consumed = (self.rx_cursor - self.rx_origin).min(self.rx_samples.len());
        self.rx_samples.drain(..consumed);
        self.rx_origin += consumed;
    }

    fn search(&mut self, run_start: Option<usize>, last_full: Option<usize>, peak: f32, powers: TonePowers) -> RxState {
        let spf = self.config.samples_per_frame;
        let hop = (spf / SEARCH_STEPS_PER_FRAME).max(1);
        let position = self.rx_cursor;

        if self.classify(powers) == Some(Symbol::Marker) {
            let peak = peak.max(powers.marker);
            let last_full = if powers.marker >= FULL_MARKER_RATIO * peak {
                Some(position)
            } else {
                last_full
            };
            self.rx_cursor += hop;
            return RxState::Searching {
                run_start: Some(run_start.unwrap_or(position)),
                last_full,
                peak,
            };
        }

        if let (Some(first), Some(last)) = (run_start, last_full) {
            if last - first >= (MARKER_MIN_FRAMES - 1) * spf {
                tracing::debug!("Sound marker detected, receiving");
                self.rx_cursor = (last + spf).max(position);
                return RxState::Receiving {
                    bits: Vec::with_capacity(self.block_len() * 8),
                };
            }
        }

        self.rx_cursor += hop;
        RxState::searching()
    }

    fn receive(&mut self, mut bits: Vec<bool>, powers: TonePowers) -> RxState {
        self.rx_cursor += self.config.samples_per_frame;
        match self.classify(powers) {
            Some(Symbol::Bit(bit)) => {
                bits.push(bit);
                self.push_bit(bits)
            }
            Some(Symbol::Marker) => RxState::searching(),
            _ => {
                tracing::debug!("Signal lost mid-payload");
                RxState::searching()
            }
        }
    }

    fn push_bit(&mut self, bits: Vec<bool>) -> RxState {
        if bits.len() < self.block_len() * 8 {
            return RxState::Receiving { bits };
        }
        if let Some(payload) = self.decode_block(&bits) {
            self.payloads_received += 1;
            self.received = Some(payload);
        }
        RxState::searching()
    }
}

impl ModemEngine for ToneModem {
    fn has_outbound_data(&self) -> bool {
        !self.tx_symbols.is_empty()
    }

    fn produce_waveform(&mut self) -> &[u8] {
        let count = self.tx_symbols.len().min(FRAMES_PER_BUFFER);
        let mut samples = Vec::with_capacity(count * self.config.samples_per_frame);
        for symbol in self.tx_symbols.drain(..count).collect::<Vec<_>>() {
            self.synthesize(symbol, &mut samples);
        }

        self.waveform.clear();
        self.config.sample_format_out.encode_samples(&samples, &mut self.waveform);
        &self.waveform
    }

    fn decode(&mut self, data: &[u8]) -> bool {
        let expected = self.config.samples_per_frame * self.input_sample_width();
        if data.len() != expected {
            tracing::debug!("Rejecting {} byte frame, expected {}", data.len(), expected);
            return false;
        }

        let format = self.config.sample_format_in;
        format.decode_samples(data, &mut self.rx_samples);
        self.frames_decoded += 1;
        self.process_rx();
        true
    }

    fn take_received_payload(&mut self) -> Option<Vec<u8>> {
        self.received.take()
    }

    fn queue_payload(&mut self, payload: &[u8], volume: u8) -> Result<(), ModemError> {
        if payload.is_empty() {
            return Err(ModemError::EmptyPayload);
        }
        if payload.len() > self.config.payload_length {
            return Err(ModemError::PayloadTooLong {
                len: payload.len(),
                max: self.config.payload_length,
            });
        }
        if self.has_outbound_data() {
            return Err(ModemError::TxBusy);
        }

        let block = self.encode_block(payload);
        self.tx_amplitude = volume.min(100) as f32 / 100.0;
        self.tx_symbols.extend(std::iter::repeat(Symbol::Marker).take(MARKER_FRAMES));
        for byte in block {
            self.tx_symbols.extend((0..8).rev().map(|i| Symbol::Bit((byte >> i) & 1 == 1)));
        }
        self.tx_symbols
            .extend(std::iter::repeat(Symbol::Silence).take(TRAILING_SILENCE_FRAMES));
        Ok(())
    }

    fn samples_per_frame(&self) -> usize {
        self.config.samples_per_frame
    }

    fn input_sample_width(&self) -> usize {
        self.config.sample_format_in.byte_width()
    }

    fn output_sample_width(&self) -> usize {
        self.config.sample_format_out.byte_width()
    }

    fn input_sample_rate(&self) -> f32 {
        self.config.sample_rate_in
    }
}

/// Builds [`ToneModem`] sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct ToneModemFactory;

impl EngineFactory for ToneModemFactory {
    fn build(&self, config: &NegotiatedConfig) -> Result<Box<dyn ModemEngine>, ModemError> {
        Ok(Box::new(ToneModem::new(config.clone())?))
    }
}

/// Normalized power of `freq` in `samples`, roughly the squared amplitude
fn goertzel_power(samples: &[f32], freq: f32, sample_rate: f32) -> f32 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }
    let omega = 2.0 * PI * freq / sample_rate;
    let coeff = 2.0 * omega.cos();

    let mut q1 = 0.0;
    let mut q2 = 0.0;
    for &sample in samples {
        let q0 = coeff * q1 - q2 + sample;
        q2 = q1;
        q1 = q0;
    }

    let real = q1 - q2 * omega.cos();
    let imag = q2 * omega.sin();
    4.0 * (real * real + imag * imag) / (n * n) as f32
}

/// CRC-8, polynomial 0xD5
fn crc8(data: &[u8]) -> u8 {
    const POLYNOMIAL: u8 = 0xD5;
    let mut crc = 0u8;

    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// XOR with an 8-bit Galois LFSR sequence. Applying it twice is a no-op.
fn whiten(block: &mut [u8]) {
    let mut state = DSS_SEED;
    for byte in block {
        let lsb = state & 1;
        state >>= 1;
        if lsb == 1 {
            state ^= 0xB8;
        }
        *byte ^= state;
    }
}
