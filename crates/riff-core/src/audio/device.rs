//! Output device enumeration
//!
//! Devices are listed from every available cpal host, so a card can be
//! picked through ALSA even when PulseAudio or JACK is the default host.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Rates reported for a device when they fall inside its supported range
const COMMON_SAMPLE_RATES: [u32; 4] = [44100, 48000, 88200, 96000];

fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// An output device as shown in the device list
#[derive(Debug, Clone)]
pub struct OutputDevice {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    /// Default device of its host
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl std::fmt::Display for OutputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)?;
        if self.is_default {
            f.write_str(" (default)")?;
        }
        Ok(())
    }
}

/// List output devices from all hosts, defaults first
pub fn output_devices() -> AudioResult<Vec<OutputDevice>> {
    let mut devices = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let iter = match host.output_devices() {
            Ok(iter) => iter,
            Err(e) => {
                log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };

        for device in iter {
            let Ok(name) = device.name() else { continue };
            let configs: Vec<_> = match device.supported_output_configs() {
                Ok(configs) => configs.collect(),
                Err(_) => continue,
            };
            if configs.is_empty() {
                continue;
            }

            let mut sample_rates = Vec::new();
            let mut max_channels = 0u16;
            for config in &configs {
                max_channels = max_channels.max(config.channels());
                for rate in COMMON_SAMPLE_RATES {
                    if (config.min_sample_rate().0..=config.max_sample_rate().0).contains(&rate)
                        && !sample_rates.contains(&rate)
                    {
                        sample_rates.push(rate);
                    }
                }
            }
            sample_rates.sort_unstable();

            devices.push(OutputDevice {
                id: DeviceId::with_host(&name, &host_label),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                host: host_label.clone(),
                sample_rates,
                max_channels,
            });
        }
    }

    if devices.is_empty() {
        return Err(AudioError::NoDevices);
    }

    devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });
    log::info!("Enumerated {} audio output devices", devices.len());
    Ok(devices)
}

/// Resolve a configured device, searching its host first and then all hosts
pub fn find_device(id: &DeviceId) -> AudioResult<cpal::Device> {
    let matches = |d: &cpal::Device| d.name().ok().as_deref() == Some(id.name.as_str());

    if let Some(host) = id.host.as_deref().and_then(host_by_name) {
        return host
            .output_devices()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(matches)
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    cpal::available_hosts()
        .into_iter()
        .filter_map(|host_id| cpal::host_from_id(host_id).ok())
        .filter_map(|host| host.output_devices().ok())
        .flatten()
        .find(matches)
        .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()))
}

/// System default output device of the default host
pub fn default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("No default output device".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_enumeration() {
        // CI machines usually have no sound card
        match output_devices() {
            Ok(devices) => {
                for device in &devices {
                    assert!(!device.name.is_empty());
                    assert!(device.max_channels > 0);
                }
            }
            Err(AudioError::NoDevices) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_unknown_device_not_found() {
        let id = DeviceId::with_host("riff-test-no-such-device", "NoSuchHost");
        assert!(matches!(find_device(&id), Err(AudioError::DeviceNotFound(_))));
    }

    #[test]
    fn test_host_names() {
        for host_id in cpal::available_hosts() {
            assert!(!host_name(host_id).is_empty());
        }
    }
}
