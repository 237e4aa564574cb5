//! Error types for the audio transceiver

use thiserror::Error;

use crate::audio::backend::{StreamDirection, StreamSpec};

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Modem error: {0}")]
    Modem(#[from] ModemError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device is closed")]
    DeviceClosed,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Device negotiation failures
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Couldn't open an audio device for {direction}: {source}")]
    OpenFailed {
        direction: StreamDirection,
        #[source]
        source: AudioError,
    },

    #[error("Playback device granted {obtained} but {requested} was required")]
    PlaybackMismatch {
        requested: StreamSpec,
        obtained: StreamSpec,
    },

    #[error("No {0} device is open")]
    Incomplete(StreamDirection),
}

/// Modem engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModemError {
    #[error("Undefined {0} sample format")]
    UndefinedSampleFormat(StreamDirection),

    #[error("Invalid engine parameters: {0}")]
    InvalidParameters(String),

    #[error("Payload of {len} bytes exceeds the fixed payload length of {max}")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Payload is empty")]
    EmptyPayload,

    #[error("A transmission is already in progress")]
    TxBusy,
}

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("No active session")]
    NoSession,

    #[error("Session construction failed: {0}")]
    Build(#[from] ModemError),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
