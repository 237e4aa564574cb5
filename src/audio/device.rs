//! Audio device enumeration and configuration matching

use cpal::traits::{DeviceTrait, HostTrait};

use crate::audio::backend::{AudioDeviceInfo, DeviceSelector, StreamDirection, StreamSpec};
use crate::audio::format::HardwareFormat;
use crate::error::AudioError;

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub direction: StreamDirection,
}

impl AudioDevice {
    /// Wrap a cpal device found for `direction`
    pub fn from_cpal(device: cpal::Device, direction: StreamDirection) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            direction,
        }
    }

    /// Get the cpal device
    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    /// Unwrap the cpal device
    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Supported configurations for this device's direction
    pub fn supported_configs(&self) -> Result<Vec<cpal::SupportedStreamConfigRange>, AudioError> {
        let configs = match self.direction {
            StreamDirection::Playback => self.inner.supported_output_configs().map(|iter| iter.collect()),
            StreamDirection::Capture => self.inner.supported_input_configs().map(|iter| iter.collect()),
        };
        configs.map_err(|e| AudioError::CpalError(e.to_string()))
    }

    /// Default configuration for this device's direction
    pub fn default_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        let config = match self.direction {
            StreamDirection::Playback => self.inner.default_output_config(),
            StreamDirection::Capture => self.inner.default_input_config(),
        };
        config.map_err(|e| AudioError::CpalError(e.to_string()))
    }

    /// Pick the stream configuration closest to `requested`.
    ///
    /// An exact format/channel match supporting the requested rate wins.
    /// Otherwise the device default is used, at the requested rate when it
    /// is in range. The returned spec is what will actually be opened.
    pub fn match_config(&self, requested: &StreamSpec) -> Result<(cpal::StreamConfig, StreamSpec), AudioError> {
        let rate = cpal::SampleRate(requested.sample_rate);
        let wanted_format: cpal::SampleFormat = requested.format.into();

        let exact = self.supported_configs()?.into_iter().find(|range| {
            range.sample_format() == wanted_format
                && range.channels() == requested.channels
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
        });

        let supported = match exact {
            Some(range) => range.with_sample_rate(rate),
            None => {
                let fallback = self.default_config()?;
                tracing::debug!(
                    device = %self.name,
                    "No exact {} config for {}, falling back to device default",
                    self.direction,
                    requested
                );
                let in_range = self.supported_configs()?.into_iter().find(|range| {
                    range.sample_format() == fallback.sample_format()
                        && range.channels() == fallback.channels()
                        && range.min_sample_rate() <= rate
                        && rate <= range.max_sample_rate()
                });
                match in_range {
                    Some(range) => range.with_sample_rate(rate),
                    None => fallback,
                }
            }
        };

        let mut config = supported.config();
        let frame_size = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                let size = requested.frame_size.clamp(*min, *max);
                config.buffer_size = cpal::BufferSize::Fixed(size);
                size
            }
            // host decides
            cpal::SupportedBufferSize::Unknown => requested.frame_size,
        };

        let obtained = StreamSpec {
            sample_rate: supported.sample_rate().0,
            format: HardwareFormat::from(supported.sample_format()),
            channels: supported.channels(),
            frame_size,
        };

        Ok((config, obtained))
    }
}

fn devices_for(host: &cpal::Host, direction: StreamDirection) -> Result<Vec<cpal::Device>, AudioError> {
    let devices = match direction {
        StreamDirection::Playback => host.output_devices().map(|iter| iter.collect()),
        StreamDirection::Capture => host.input_devices().map(|iter| iter.collect()),
    };
    devices.map_err(|e| AudioError::CpalError(e.to_string()))
}

fn default_for(host: &cpal::Host, direction: StreamDirection) -> Option<cpal::Device> {
    match direction {
        StreamDirection::Playback => host.default_output_device(),
        StreamDirection::Capture => host.default_input_device(),
    }
}

/// List all devices of one direction, in enumeration order
pub fn list_devices(host: &cpal::Host, direction: StreamDirection) -> Result<Vec<AudioDeviceInfo>, AudioError> {
    let default_name = default_for(host, direction).and_then(|d| d.name().ok());

    let devices = devices_for(host, direction)?
        .into_iter()
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_name.as_ref() == Some(&name);
            AudioDeviceInfo {
                index,
                name,
                direction,
                is_default,
            }
        })
        .collect();

    Ok(devices)
}

/// Resolve a selector to a device
pub fn find_device(
    host: &cpal::Host,
    direction: StreamDirection,
    selector: &DeviceSelector,
) -> Result<AudioDevice, AudioError> {
    let device = match selector {
        DeviceSelector::Default => default_for(host, direction),
        DeviceSelector::Index(index) => devices_for(host, direction)?.into_iter().nth(*index),
        DeviceSelector::Name(name) => devices_for(host, direction)?
            .into_iter()
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false)),
    };

    device
        .map(|d| AudioDevice::from_cpal(d, direction))
        .ok_or_else(|| AudioError::DeviceNotFound(format!("{} device {}", direction, selector)))
}
