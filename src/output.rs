//! Received payload delivery

use chrono::{DateTime, Local};
use crossbeam_channel::{Sender, TrySendError};

/// Receives every completed payload once
pub trait PayloadSink {
    fn on_payload(&mut self, timestamp: DateTime<Local>, payload: &[u8]);
}

/// A payload with its reception time
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPayload {
    pub timestamp: DateTime<Local>,
    pub payload: Vec<u8>,
}

impl ReceivedPayload {
    /// Payload as text, with the zero padding of fixed-length frames removed
    pub fn text(&self) -> String {
        payload_text(&self.payload)
    }
}

fn payload_text(payload: &[u8]) -> String {
    let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

/// Prints `[<time>] Received: '<text>'` to stdout
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl PayloadSink for ConsoleSink {
    fn on_payload(&mut self, timestamp: DateTime<Local>, payload: &[u8]) {
        let text = payload_text(payload);
        tracing::debug!(bytes = payload.len(), "Payload received");
        println!("[{}] Received: '{}'", timestamp.format("%a %b %e %H:%M:%S %Y"), text);
    }
}

/// Forwards payloads to another thread. Payloads are dropped when the
/// channel is full or disconnected.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ReceivedPayload>,
}

impl ChannelSink {
    /// Sink sending into `tx`
    pub fn new(tx: Sender<ReceivedPayload>) -> Self {
        Self { tx }
    }
}

impl PayloadSink for ChannelSink {
    fn on_payload(&mut self, timestamp: DateTime<Local>, payload: &[u8]) {
        let received = ReceivedPayload {
            timestamp,
            payload: payload.to_vec(),
        };
        match self.tx.try_send(received) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::warn!("Payload channel full, dropping payload"),
            Err(TrySendError::Disconnected(_)) => tracing::debug!("Payload channel closed"),
        }
    }
}

impl PayloadSink for Vec<ReceivedPayload> {
    fn on_payload(&mut self, timestamp: DateTime<Local>, payload: &[u8]) {
        self.push(ReceivedPayload {
            timestamp,
            payload: payload.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_text_trims_padding() {
        assert_eq!(payload_text(b"hi\0\0\0"), "hi");
        assert_eq!(payload_text(b"\0\0"), "");
        assert_eq!(payload_text(b"a\0b"), "a\0b");
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = bounded(1);
        let mut sink = ChannelSink::new(tx);
        let now = Local::now();

        sink.on_payload(now, b"one");
        sink.on_payload(now, b"two");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.payload, b"one");
        assert_eq!(received.text(), "one");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<ReceivedPayload> = Vec::new();
        sink.on_payload(Local::now(), b"abc");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].payload, b"abc");
    }
}
