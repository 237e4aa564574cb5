//! Scripted engine for tests

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ModemError;
use crate::modem::ModemEngine;
use crate::session::NegotiatedConfig;

/// Behaviour and call log shared between a test and its engine
#[derive(Debug)]
pub struct Script {
    /// Waveform buffers still to hand out
    pub outbound_buffers: usize,
    pub waveform_len: usize,
    /// Result of every `decode` call
    pub accept: bool,
    /// Becomes the received payload on the next accepted decode
    pub complete_on_decode: Option<Vec<u8>>,
    /// Lengths passed to `decode`
    pub decoded: Vec<usize>,
    pub waveforms_produced: usize,
    pub queued: Vec<(Vec<u8>, u8)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            outbound_buffers: 0,
            waveform_len: 1024,
            accept: true,
            complete_on_decode: None,
            decoded: Vec::new(),
            waveforms_produced: 0,
            queued: Vec::new(),
        }
    }
}

pub type SharedScript = Rc<RefCell<Script>>;

pub struct ScriptedEngine {
    script: SharedScript,
    waveform: Vec<u8>,
    received: Option<Vec<u8>>,
    samples_per_frame: usize,
    input_width: usize,
    output_width: usize,
    input_rate: f32,
}

impl ModemEngine for ScriptedEngine {
    fn has_outbound_data(&self) -> bool {
        self.script.borrow().outbound_buffers > 0
    }

    fn produce_waveform(&mut self) -> &[u8] {
        let mut script = self.script.borrow_mut();
        if script.outbound_buffers == 0 {
            self.waveform.clear();
        } else {
            script.outbound_buffers -= 1;
            script.waveforms_produced += 1;
            self.waveform = vec![0x11; script.waveform_len];
        }
        &self.waveform
    }

    fn decode(&mut self, data: &[u8]) -> bool {
        let mut script = self.script.borrow_mut();
        script.decoded.push(data.len());
        if !script.accept {
            return false;
        }
        if let Some(payload) = script.complete_on_decode.take() {
            self.received = Some(payload);
        }
        true
    }

    fn take_received_payload(&mut self) -> Option<Vec<u8>> {
        self.received.take()
    }

    fn queue_payload(&mut self, payload: &[u8], volume: u8) -> Result<(), ModemError> {
        let mut script = self.script.borrow_mut();
        if script.outbound_buffers > 0 {
            return Err(ModemError::TxBusy);
        }
        script.queued.push((payload.to_vec(), volume));
        script.outbound_buffers = 1;
        Ok(())
    }

    fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    fn input_sample_width(&self) -> usize {
        self.input_width
    }

    fn output_sample_width(&self) -> usize {
        self.output_width
    }

    fn input_sample_rate(&self) -> f32 {
        self.input_rate
    }
}

/// Factory building engines that all follow `script`
pub fn factory(script: SharedScript) -> impl Fn(&NegotiatedConfig) -> Result<Box<dyn ModemEngine>, ModemError> {
    move |config: &NegotiatedConfig| {
        Ok(Box::new(ScriptedEngine {
            script: script.clone(),
            waveform: Vec::new(),
            received: None,
            samples_per_frame: config.samples_per_frame,
            input_width: config.sample_format_in.byte_width(),
            output_width: config.sample_format_out.byte_width(),
            input_rate: config.sample_rate_in,
        }) as Box<dyn ModemEngine>)
    }
}
