//! cpal output stream
//!
//! ```text
//! ┌──────────────────┐   push()    ┌─────────────────────┐
//! │  Control thread  │────────────►│   Command Queue     │
//! │     (Player)     │             │  (lock-free SPSC)   │
//! └──────────────────┘             └──────────┬──────────┘
//!         │                                   │ pop()
//!         │ Relaxed atomics                   ▼
//! ┌──────────────────┐             ┌─────────────────────┐
//! │  EngineAtomics   │◄────────────│  cpal audio thread  │
//! │   (lock-free)    │   publish   │ (runs AudioEngine)  │
//! └──────────────────┘             └─────────────────────┘
//! ```
//!
//! The engine sits behind a mutex that only the callback takes while the
//! stream runs. The callback uses `try_lock`, so it never waits: if the
//! control thread happens to hold the lock the block is silent.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::config::AudioConfig;
use super::device::{default_device, find_device};
use super::error::{AudioError, AudioResult};
use crate::engine::{AudioEngine, MAX_BUFFER_SIZE};
use crate::types::{StereoBuffer, StereoSample};

/// A running output stream
///
/// Dropping the handle stops the stream and tells the engine it stopped.
pub struct AudioHandle {
    stream: Option<Stream>,
    engine: Arc<Mutex<AudioEngine>>,
    device_name: String,
    sample_rate: u32,
    buffer_size: u32,
}

impl AudioHandle {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Requested buffer size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency
    pub fn latency_ms(&self) -> f32 {
        self.buffer_size as f32 / self.sample_rate as f32 * 1000.0
    }
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        // The callback is gone once the stream is dropped
        drop(self.stream.take());
        let mut engine = self.engine.lock().unwrap_or_else(|p| p.into_inner());
        engine.stopped();
        log::info!("Audio stream stopped ({})", self.device_name);
    }
}

/// Open the configured device and start rendering `engine` into it
///
/// The engine is prepared for the negotiated sample rate before the stream
/// starts.
pub fn start_audio_output(
    config: &AudioConfig,
    engine: Arc<Mutex<AudioEngine>>,
) -> AudioResult<AudioHandle> {
    let device = match &config.device {
        Some(id) => find_device(id)?,
        None => default_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported = select_output_config(&device, config.target_sample_rate())?;
    let sample_rate = supported.sample_rate().0;
    let buffer_size = config.buffer_size.frames();
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(buffer_size),
    };

    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        stream_config.channels,
        sample_rate,
        buffer_size,
        config.buffer_size.latency_ms(sample_rate)
    );

    // Hosts may deliver more than the requested buffer per callback, so the
    // scratch buffers cover the largest chunk; smoothing follows each
    // chunk's own length.
    engine
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .about_to_start(sample_rate, MAX_BUFFER_SIZE);

    let stream = match build_output_stream(&device, &stream_config, Arc::clone(&engine)) {
        Ok(stream) => stream,
        Err(e) => {
            engine.lock().unwrap_or_else(|p| p.into_inner()).stopped();
            return Err(e);
        }
    };
    if let Err(e) = stream.play() {
        drop(stream);
        engine.lock().unwrap_or_else(|p| p.into_inner()).stopped();
        return Err(AudioError::StreamPlayError(e.to_string()));
    }

    log::info!("Audio stream started");
    Ok(AudioHandle {
        stream: Some(stream),
        engine,
        device_name,
        sample_rate,
        buffer_size,
    })
}

/// Pick an f32 config, preferring stereo and the requested rate
fn select_output_config(
    device: &cpal::Device,
    target_sample_rate: u32,
) -> AudioResult<cpal::SupportedStreamConfig> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if configs.is_empty() {
        return Err(AudioError::UnsupportedFormat(
            "device has no f32 output configuration".to_string(),
        ));
    }

    let in_range = |c: &cpal::SupportedStreamConfigRange| {
        (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_sample_rate)
    };

    let best = configs
        .iter()
        .find(|c| c.channels() >= 2 && in_range(c))
        .or_else(|| configs.iter().find(|c| c.channels() >= 2))
        .or_else(|| configs.first())
        .ok_or_else(|| AudioError::ConfigError("No suitable output configuration".to_string()))?;

    let sample_rate = if in_range(best) {
        cpal::SampleRate(target_sample_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_sample_rate,
            fallback.0
        );
        fallback
    };

    Ok(best.clone().with_sample_rate(sample_rate))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    engine: Arc<Mutex<AudioEngine>>,
) -> AudioResult<Stream> {
    let channels = (config.channels as usize).max(1);
    let mut block = StereoBuffer::with_capacity(MAX_BUFFER_SIZE);

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let Ok(mut engine) = engine.try_lock() else {
                    data.fill(0.0);
                    return;
                };
                for chunk in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
                    block.set_len_from_capacity(chunk.len() / channels);
                    engine.process(&mut block);
                    write_interleaved(chunk, channels, block.as_slice());
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Copy engine output into a device buffer of `channels` interleaved channels
///
/// Mono devices get the mix, extra channels are silenced, and frames past
/// the end of `samples` are zeroed.
pub(crate) fn write_interleaved(data: &mut [f32], channels: usize, samples: &[StereoSample]) {
    for (i, frame) in data.chunks_mut(channels).enumerate() {
        match samples.get(i) {
            Some(sample) if channels == 1 => frame[0] = sample.mono_mix(),
            Some(sample) => {
                frame[0] = sample.left;
                frame[1] = sample.right;
                frame[2..].fill(0.0);
            }
            None => frame.fill(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<StereoSample> {
        vec![StereoSample::new(0.5, -0.5), StereoSample::new(0.25, 0.75)]
    }

    #[test]
    fn test_write_stereo() {
        let mut data = [9.0f32; 4];
        write_interleaved(&mut data, 2, &samples());
        assert_eq!(data, [0.5, -0.5, 0.25, 0.75]);
    }

    #[test]
    fn test_write_mono_uses_mix() {
        let mut data = [9.0f32; 2];
        write_interleaved(&mut data, 1, &samples());
        assert_eq!(data, [0.0, 0.5]);
    }

    #[test]
    fn test_write_extra_channels_silenced() {
        let mut data = [9.0f32; 8];
        write_interleaved(&mut data, 4, &samples());
        assert_eq!(data, [0.5, -0.5, 0.0, 0.0, 0.25, 0.75, 0.0, 0.0]);
    }

    #[test]
    fn test_write_short_input_zero_fills() {
        let mut data = [9.0f32; 6];
        write_interleaved(&mut data, 2, &samples());
        assert_eq!(&data[4..], &[0.0, 0.0]);
    }
}
