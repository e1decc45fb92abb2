//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BuildStreamError, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use serde::Serialize;

use crate::constants::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::error::AudioError;

/// Audio device information
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    /// Can capture at the session's microphone rate
    pub supports_capture_rate: bool,
    /// Can play at the session's output rate
    pub supports_playback_rate: bool,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool, is_output: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
            is_output,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Get supported input configurations
    pub fn supported_input_configs(&self) -> Result<Vec<SupportedStreamConfigRange>, AudioError> {
        self.inner
            .supported_input_configs()
            .map(|iter| iter.collect())
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }

    /// Get supported output configurations
    pub fn supported_output_configs(&self) -> Result<Vec<SupportedStreamConfigRange>, AudioError> {
        self.inner
            .supported_output_configs()
            .map(|iter| iter.collect())
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }
}

/// Pick the fewest channels of an f32 config covering `sample_rate`
fn pick_channels(configs: &[SupportedStreamConfigRange], sample_rate: u32) -> Option<u16> {
    let rate = cpal::SampleRate(sample_rate);
    configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
        .map(|c| c.channels())
        .min()
}

/// Stream config for capturing at `sample_rate`, mono when the device allows
pub fn input_stream_config(device: &AudioDevice, sample_rate: u32) -> Result<StreamConfig, AudioError> {
    let configs = device.supported_input_configs()?;
    let channels = pick_channels(&configs, sample_rate).ok_or_else(|| {
        AudioError::UnsupportedFormat(format!(
            "{} cannot capture f32 at {}Hz",
            device.name, sample_rate
        ))
    })?;

    Ok(StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    })
}

/// Stream config for playing at `sample_rate`, mono when the device allows
pub fn output_stream_config(device: &AudioDevice, sample_rate: u32) -> Result<StreamConfig, AudioError> {
    let configs = device.supported_output_configs()?;
    let channels = pick_channels(&configs, sample_rate).ok_or_else(|| {
        AudioError::UnsupportedFormat(format!(
            "{} cannot play f32 at {}Hz",
            device.name, sample_rate
        ))
    })?;

    Ok(StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    })
}

pub(crate) fn map_build_error(err: BuildStreamError) -> AudioError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            AudioError::DeviceNotFound("device no longer available".to_string())
        }
        BuildStreamError::StreamConfigNotSupported => {
            AudioError::UnsupportedFormat("stream config not supported".to_string())
        }
        BuildStreamError::BackendSpecific { err } => AudioError::PermissionDenied(err.to_string()),
        other => AudioError::StreamError(other.to_string()),
    }
}

/// Map a fault raised by a running stream
pub(crate) fn map_stream_error(err: cpal::StreamError) -> AudioError {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            AudioError::DeviceNotFound("device no longer available".to_string())
        }
        other => AudioError::StreamError(other.to_string()),
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            let Ok(name) = device.name() else { continue };
            let configs: Vec<_> = device
                .supported_input_configs()
                .map(|iter| iter.collect())
                .unwrap_or_default();

            devices.push(AudioDeviceInfo {
                id: format!("input:{}", name),
                is_default: default_input_name.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                supports_capture_rate: pick_channels(&configs, INPUT_SAMPLE_RATE).is_some(),
                supports_playback_rate: false,
                channels: channel_counts(&configs),
            });
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            let Ok(name) = device.name() else { continue };
            let configs: Vec<_> = device
                .supported_output_configs()
                .map(|iter| iter.collect())
                .unwrap_or_default();
            let is_default = default_output_name.as_ref() == Some(&name);
            let supports_playback_rate = pick_channels(&configs, OUTPUT_SAMPLE_RATE).is_some();

            // Same physical device may show up on both sides
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.supports_playback_rate = supports_playback_rate;
                existing.is_default |= is_default;
            } else {
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    channels: channel_counts(&configs),
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    supports_capture_rate: false,
                    supports_playback_rate,
                });
            }
        }
    }

    devices
}

fn channel_counts(configs: &[SupportedStreamConfigRange]) -> Vec<u16> {
    let mut channels: Vec<u16> = configs.iter().map(|c| c.channels()).collect();
    channels.sort_unstable();
    channels.dedup();
    channels
}

/// Split an id into its direction and device name.
///
/// Ids without a prefix are treated as input devices.
pub fn parse_device_id(id: &str) -> (bool, &str) {
    if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        (true, id)
    }
}

/// Get a device by its ID
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let (is_input, name) = parse_device_id(id);

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    };
    let devices = devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, is_input, !is_input));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Get default input device
pub fn get_default_input_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true, false))
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false, true))
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_id() {
        assert_eq!(parse_device_id("input:USB Mic"), (true, "USB Mic"));
        assert_eq!(parse_device_id("output:Speakers"), (false, "Speakers"));
        assert_eq!(parse_device_id("Built-in"), (true, "Built-in"));
    }

    #[test]
    fn test_unknown_device() {
        let result = get_device_by_id("input:definitely-not-a-real-device-7f3a");
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }
}
