//! # Audio Transceiver
//!
//! Half-duplex, frame-paced data transceiver over a physical sound card.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Device Negotiator                            │
//! │   playback: S16 mono, 16384 samples   capture: F32, 1024 samples     │
//! │   (fails hard on playback mismatch)   (tolerates mismatch)           │
//! └──────────────┬───────────────────────────────────┬───────────────────┘
//!                │ obtained specs                    │ reinit flag
//!                ▼                                   ▼
//! ┌──────────────────────────┐      ┌────────────────────────────────────┐
//! │      Format Adapter      │ ───▶ │         Session Lifecycle          │
//! │ hardware fmt → modem fmt │      │ destroy old engine, build new one  │
//! └──────────────────────────┘      └─────────────────┬──────────────────┘
//!                                                     │ &mut Session
//!                                                     ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    Transceiver Scheduler (1 kHz)                     │
//! │  outbound pending ─▶ Transmitting: resume playback, pause capture,   │
//! │                      enqueue one waveform buffer                     │
//! │  nothing pending  ─▶ Listening: wait for playback drain, debounce    │
//! │                      500 ms, decode one frame, drop backlog > 32x    │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    ▼
//!                            Output collaborator
//!                        (timestamp, payload bytes)
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod modem;
pub mod negotiator;
pub mod output;
pub mod scheduler;
pub mod session;
pub mod transceiver;

pub use error::{Error, Result};
pub use transceiver::Transceiver;

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Nominal sample rate of the protocol tables
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Samples per modem frame
    pub const SAMPLES_PER_FRAME: usize = 512;

    /// Playback buffer request, large for smooth queuing
    pub const PLAYBACK_BUFFER_SAMPLES: u32 = 16 * 1024;

    /// Capture buffer request, small for low latency
    pub const CAPTURE_BUFFER_SAMPLES: u32 = 1024;

    /// Playback channel count request
    pub const PLAYBACK_CHANNELS: u16 = 1;

    /// Default sound marker detection threshold
    pub const DEFAULT_MARKER_THRESHOLD: f32 = 3.0;

    /// Minimum quiet time before a decode is attempted
    pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

    /// Capture backlog limit, in frames, before queued audio is abandoned
    pub const BACKLOG_FRAMES: usize = 32;

    /// Default fixed payload length in bytes
    pub const DEFAULT_PAYLOAD_LENGTH: usize = 16;

    /// Largest accepted fixed payload length
    pub const MAX_PAYLOAD_LENGTH: usize = 140;

    /// Default transmit volume in percent
    pub const DEFAULT_VOLUME: u8 = 50;

    /// Target scheduling cadence. Each listening tick decodes at most one
    /// frame, so the tick rate must exceed the frame rate (93.75 at 48 kHz).
    pub const DEFAULT_TICK_HZ: u32 = 1000;
}
