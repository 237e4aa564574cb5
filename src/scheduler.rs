//! Transceiver scheduler
//!
//! One [`TransceiverScheduler::tick`] per scheduling period. Each tick
//! decides once whether the session is transmitting or listening, switches
//! the devices accordingly (never leaving both resumed) and moves at most
//! one buffer of data.
//!
//! While listening, decoding is gated twice: the playback queue must have
//! drained below one frame (any remainder is dropped so it cannot lead the
//! next transmission), and the capture side must have been settled for
//! longer than the debounce window with at least one full frame queued.
//! Anything short of that is discarded. A capture backlog above
//! `backlog_frames` frames is abandoned rather than worked through.

use chrono::Local;
use std::time::{Duration, Instant};

use crate::audio::handle::{CaptureHandle, PlaybackHandle};
use crate::config::SchedulerConfig;
use crate::constants::{BACKLOG_FRAMES, DEBOUNCE_WINDOW};
use crate::output::PayloadSink;
use crate::session::Session;

/// Direction the transceiver is in for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverState {
    /// No devices or no session
    Idle,
    Transmitting,
    Listening,
}

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to drive
    Inactive,
    /// One waveform buffer was enqueued for playback
    Transmitted { bytes: usize },
    /// Playback still holds at least one frame; capture left paused
    Draining { queued: usize },
    /// Capture queue cleared without decoding
    Discarded { bytes: usize },
    /// One frame decoded
    Decoded {
        payload_emitted: bool,
        backlog_dropped: Option<usize>,
    },
    /// The engine rejected the frame
    DecodeFailed { backlog_dropped: Option<usize> },
}

impl TickOutcome {
    /// Check if the tick drove the devices
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Inactive)
    }

    /// Direction the tick ran in
    pub fn state(&self) -> TransceiverState {
        match self {
            Self::Inactive => TransceiverState::Idle,
            Self::Transmitted { .. } => TransceiverState::Transmitting,
            _ => TransceiverState::Listening,
        }
    }
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub buffers_transmitted: u64,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub payloads_received: u64,
    pub backlog_drops: u64,
    pub bytes_discarded: u64,
}

/// Drives one session's devices, one tick at a time
pub struct TransceiverScheduler {
    debounce: Duration,
    backlog_frames: usize,
    /// Last time the listener found playback still busy
    last_no_data: Option<Instant>,
    frame_buffer: Vec<u8>,
    stats: SchedulerStats,
}

impl Default for TransceiverScheduler {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW, BACKLOG_FRAMES)
    }
}

impl TransceiverScheduler {
    /// Scheduler with the given debounce window and backlog limit
    pub fn new(debounce: Duration, backlog_frames: usize) -> Self {
        Self {
            debounce,
            backlog_frames,
            last_no_data: None,
            frame_buffer: Vec::new(),
            stats: SchedulerStats::default(),
        }
    }

    /// Scheduler using the `[scheduler]` section
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.debounce(), config.backlog_frames)
    }

    /// Forget the debounce origin, e.g. after the devices were reopened
    pub fn reset(&mut self) {
        self.last_no_data = None;
    }

    /// Get counter snapshot
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Run one scheduling step at time `now`
    pub fn tick(
        &mut self,
        now: Instant,
        playback: Option<&mut PlaybackHandle>,
        capture: Option<&mut CaptureHandle>,
        session: Option<&mut Session>,
        sink: &mut dyn PayloadSink,
    ) -> TickOutcome {
        let (Some(playback), Some(capture), Some(session)) = (playback, capture, session) else {
            return TickOutcome::Inactive;
        };
        self.stats.ticks += 1;

        let state = if session.engine().has_outbound_data() {
            TransceiverState::Transmitting
        } else {
            TransceiverState::Listening
        };

        match state {
            TransceiverState::Transmitting => self.transmit(playback, capture, session),
            _ => self.listen(now, playback, capture, session, sink),
        }
    }

    fn transmit(&mut self, playback: &mut PlaybackHandle, capture: &mut CaptureHandle, session: &mut Session) -> TickOutcome {
        capture.pause();
        playback.resume();

        let waveform = session.engine_mut().produce_waveform();
        let bytes = waveform.len();
        if bytes > 0 {
            if let Err(e) = playback.enqueue(waveform) {
                tracing::warn!("Failed to queue {} waveform bytes: {}", bytes, e);
            }
        }
        self.stats.buffers_transmitted += 1;

        TickOutcome::Transmitted { bytes }
    }

    fn listen(
        &mut self,
        now: Instant,
        playback: &mut PlaybackHandle,
        capture: &mut CaptureHandle,
        session: &mut Session,
        sink: &mut dyn PayloadSink,
    ) -> TickOutcome {
        let engine = session.engine_mut();
        let output_frame = engine.samples_per_frame() * engine.output_sample_width();
        let input_frame = engine.samples_per_frame() * engine.input_sample_width();
        let last_no_data = *self.last_no_data.get_or_insert(now);

        let queued_out = playback.queued_bytes();
        if queued_out >= output_frame {
            capture.pause();
            playback.resume();
            self.last_no_data = Some(now);
            return TickOutcome::Draining { queued: queued_out };
        }

        playback.pause();
        if queued_out > 0 {
            playback.clear();
        }
        capture.resume();

        let queued_in = capture.queued_bytes();
        let settled = now.saturating_duration_since(last_no_data) > self.debounce;
        if !settled || queued_in < input_frame {
            capture.clear();
            self.stats.bytes_discarded += queued_in as u64;
            return TickOutcome::Discarded { bytes: queued_in };
        }

        self.frame_buffer.resize(input_frame, 0);
        let read = capture.dequeue(&mut self.frame_buffer);
        let decoded = engine.decode(&self.frame_buffer[..read]);

        let mut payload_emitted = false;
        if decoded {
            self.stats.frames_decoded += 1;
            if let Some(payload) = engine.take_received_payload() {
                sink.on_payload(Local::now(), &payload);
                self.stats.payloads_received += 1;
                payload_emitted = true;
            }
        } else {
            tracing::warn!("Failed to decode {} byte audio frame", read);
            self.stats.decode_failures += 1;
        }

        let remaining = capture.queued_bytes();
        let backlog_dropped = if remaining > self.backlog_frames * input_frame {
            tracing::warn!(
                "Capture backlog of {} bytes exceeds {} frames, discarding",
                remaining,
                self.backlog_frames
            );
            capture.clear();
            self.stats.backlog_drops += 1;
            self.stats.bytes_discarded += remaining as u64;
            Some(remaining)
        } else {
            None
        };

        if decoded {
            TickOutcome::Decoded {
                payload_emitted,
                backlog_dropped,
            }
        } else {
            TickOutcome::DecodeFailed { backlog_dropped }
        }
    }
}
