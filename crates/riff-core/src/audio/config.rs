//! Output device configuration

use serde::{Deserialize, Serialize};

use crate::types::SAMPLE_RATE;

/// Buffer size used when the config does not ask for one (frames)
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Smallest and largest fixed buffer sizes accepted (frames)
pub const MIN_BUFFER_FRAMES: u32 = 64;
pub const MAX_BUFFER_FRAMES: u32 = 8192;

/// Sample rate requested when the config leaves it open
pub const DEFAULT_SAMPLE_RATE: u32 = SAMPLE_RATE;

/// Preferred device buffer size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// [`DEFAULT_BUFFER_SIZE`]
    #[default]
    Default,
    /// A specific size in frames, clamped to 64–8192
    Fixed(u32),
}

impl BufferSize {
    /// Frames to request from the device
    pub fn frames(&self) -> u32 {
        match self {
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
            BufferSize::Fixed(frames) => (*frames).clamp(MIN_BUFFER_FRAMES, MAX_BUFFER_FRAMES),
        }
    }

    /// One-way output latency at `sample_rate`
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        self.frames() as f32 / sample_rate as f32 * 1000.0
    }
}

/// Device identifier: name plus the host that reported it
///
/// Hosts matter on Linux where ALSA, PulseAudio and JACK can all list the
/// same card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub name: String,
    /// Host name (e.g. "ALSA", "CoreAudio"); None searches every host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Audio output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device (None = system default)
    pub device: Option<DeviceId>,
    pub buffer_size: BufferSize,
    /// Preferred sample rate (None = 48kHz)
    pub sample_rate: Option<u32>,
}

impl AudioConfig {
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Requested sample rate, falling back to [`DEFAULT_SAMPLE_RATE`]
    pub fn target_sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }
}
