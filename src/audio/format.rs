//! Sample format adaptation
//!
//! Maps what the hardware granted onto the modem engine's sample formats and
//! converts between engine formats and `f32` samples.

/// Sample formats a sound card may grant. All are in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareFormat {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl HardwareFormat {
    /// Every format, in declaration order
    pub const ALL: [HardwareFormat; 10] = [
        Self::U8,
        Self::I8,
        Self::U16,
        Self::I16,
        Self::U32,
        Self::I32,
        Self::U64,
        Self::I64,
        Self::F32,
        Self::F64,
    ];

    /// Bytes per sample
    pub fn byte_width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Engine format for this hardware format.
    ///
    /// Signed 32-bit and float32 both feed the engine as float32. Anything
    /// without a mapping yields [`SampleFormat::Undefined`].
    pub fn to_modem_format(self) -> SampleFormat {
        match self {
            Self::U8 => SampleFormat::U8,
            Self::I8 => SampleFormat::I8,
            Self::U16 => SampleFormat::U16,
            Self::I16 => SampleFormat::I16,
            Self::I32 | Self::F32 => SampleFormat::F32,
            Self::U32 | Self::U64 | Self::I64 | Self::F64 => SampleFormat::Undefined,
        }
    }

    /// Write one buffer of silence in this format
    pub fn fill_silence(self, out: &mut [u8]) {
        match self {
            Self::U8 => out.fill(0x80),
            Self::U16 => {
                let mid = 0x8000u16.to_ne_bytes();
                for chunk in out.chunks_mut(2) {
                    chunk.copy_from_slice(&mid[..chunk.len()]);
                }
            }
            Self::U32 => {
                let mid = 0x8000_0000u32.to_ne_bytes();
                for chunk in out.chunks_mut(4) {
                    chunk.copy_from_slice(&mid[..chunk.len()]);
                }
            }
            Self::U64 => {
                let mid = 0x8000_0000_0000_0000u64.to_ne_bytes();
                for chunk in out.chunks_mut(8) {
                    chunk.copy_from_slice(&mid[..chunk.len()]);
                }
            }
            _ => out.fill(0),
        }
    }
}

impl From<cpal::SampleFormat> for HardwareFormat {
    fn from(format: cpal::SampleFormat) -> Self {
        match format {
            cpal::SampleFormat::U8 => Self::U8,
            cpal::SampleFormat::I8 => Self::I8,
            cpal::SampleFormat::U16 => Self::U16,
            cpal::SampleFormat::I16 => Self::I16,
            cpal::SampleFormat::U32 => Self::U32,
            cpal::SampleFormat::I32 => Self::I32,
            cpal::SampleFormat::U64 => Self::U64,
            cpal::SampleFormat::I64 => Self::I64,
            cpal::SampleFormat::F32 => Self::F32,
            _ => Self::F64,
        }
    }
}

impl From<HardwareFormat> for cpal::SampleFormat {
    fn from(format: HardwareFormat) -> Self {
        match format {
            HardwareFormat::U8 => Self::U8,
            HardwareFormat::I8 => Self::I8,
            HardwareFormat::U16 => Self::U16,
            HardwareFormat::I16 => Self::I16,
            HardwareFormat::U32 => Self::U32,
            HardwareFormat::I32 => Self::I32,
            HardwareFormat::U64 => Self::U64,
            HardwareFormat::I64 => Self::I64,
            HardwareFormat::F32 => Self::F32,
            HardwareFormat::F64 => Self::F64,
        }
    }
}

/// Sample formats understood by the modem engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Undefined,
    U8,
    I8,
    U16,
    I16,
    F32,
}

impl SampleFormat {
    /// Bytes per sample, zero for [`SampleFormat::Undefined`]
    pub fn byte_width(self) -> usize {
        match self {
            Self::Undefined => 0,
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::F32 => 4,
        }
    }

    /// Check if the engine can use this format
    pub fn is_defined(self) -> bool {
        self != Self::Undefined
    }

    /// Append `samples` in this format. Values are clamped to [-1, 1].
    pub fn encode_samples(self, samples: &[f32], out: &mut Vec<u8>) {
        out.reserve(samples.len() * self.byte_width());
        for &s in samples {
            let s = s.clamp(-1.0, 1.0);
            match self {
                Self::Undefined => {}
                Self::U8 => out.push((s * 127.0 + 128.0) as u8),
                Self::I8 => out.extend_from_slice(&((s * 127.0) as i8).to_ne_bytes()),
                Self::U16 => out.extend_from_slice(&((s * 32767.0 + 32768.0) as u16).to_ne_bytes()),
                Self::I16 => out.extend_from_slice(&((s * 32767.0) as i16).to_ne_bytes()),
                Self::F32 => out.extend_from_slice(&s.to_ne_bytes()),
            }
        }
    }

    /// Append the samples held in `bytes`. A trailing partial sample is ignored.
    pub fn decode_samples(self, bytes: &[u8], out: &mut Vec<f32>) {
        let width = self.byte_width();
        if width == 0 {
            return;
        }
        out.reserve(bytes.len() / width);
        for chunk in bytes.chunks_exact(width) {
            let value = match self {
                Self::Undefined => 0.0,
                Self::U8 => (chunk[0] as f32 - 128.0) / 128.0,
                Self::I8 => i8::from_ne_bytes([chunk[0]]) as f32 / 128.0,
                Self::U16 => (u16::from_ne_bytes([chunk[0], chunk[1]]) as f32 - 32768.0) / 32768.0,
                Self::I16 => i16::from_ne_bytes([chunk[0], chunk[1]]) as f32 / 32768.0,
                Self::F32 => f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            };
            out.push(value);
        }
    }
}

/// Turns interleaved hardware capture buffers into mono samples in the
/// engine's representation of the hardware format.
///
/// Only the first channel is kept. Signed 32-bit samples are rescaled to
/// float32. Mono buffers already in an engine format pass through untouched.
#[derive(Debug, Clone)]
pub struct CaptureAdapter {
    format: HardwareFormat,
    channels: usize,
    scratch: Vec<u8>,
}

impl CaptureAdapter {
    /// Adapter for a stream granted `format` with `channels` interleaved channels
    pub fn new(format: HardwareFormat, channels: u16) -> Self {
        Self {
            format,
            channels: usize::from(channels.max(1)),
            scratch: Vec::new(),
        }
    }

    /// Check if buffers are forwarded unchanged
    pub fn is_passthrough(&self) -> bool {
        self.channels == 1 && self.format != HardwareFormat::I32
    }

    /// Convert one callback buffer. A trailing partial frame is dropped.
    pub fn adapt<'a>(&'a mut self, data: &'a [u8]) -> &'a [u8] {
        if self.is_passthrough() {
            return data;
        }

        let width = self.format.byte_width();
        let stride = width * self.channels;
        self.scratch.clear();
        self.scratch.reserve(data.len() / self.channels);

        for frame in data.chunks_exact(stride) {
            let sample = &frame[..width];
            if self.format == HardwareFormat::I32 {
                let value = i32::from_ne_bytes([sample[0], sample[1], sample[2], sample[3]]);
                let scaled = value as f32 / 2_147_483_648.0;
                self.scratch.extend_from_slice(&scaled.to_ne_bytes());
            } else {
                self.scratch.extend_from_slice(sample);
            }
        }

        &self.scratch
    }
}
