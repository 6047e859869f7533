//! Onset and beat detection primitives
//!
//! Both detectors consume one hop of mono audio per call and report whether
//! the event fired somewhere in that hop. Timestamps are the worker's job.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

const COMPLEX_ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Errors raised while constructing detectors
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid detector configuration: {0}")]
    InvalidConfig(String),
}

/// Shared setup for every detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub window_size: usize,
    pub hop_size: usize,
    pub sample_rate: u32,
}

impl DetectorConfig {
    fn validate(&self) -> Result<(), DetectorError> {
        if self.sample_rate == 0 {
            return Err(DetectorError::InvalidConfig("sample rate is 0".into()));
        }
        if self.hop_size == 0 || self.window_size < self.hop_size {
            return Err(DetectorError::InvalidConfig(format!(
                "window {} must be at least hop {} (> 0)",
                self.window_size, self.hop_size
            )));
        }
        Ok(())
    }

    /// Hops per second
    pub fn hop_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_size as f64
    }
}

/// Per-hop onset trigger
pub trait OnsetDetect: Send {
    fn detect(&mut self, hop: &[f32]) -> bool;
}

/// Per-hop beat trigger with a running tempo estimate
pub trait BeatDetect: Send {
    fn detect(&mut self, hop: &[f32]) -> bool;

    /// Current tempo estimate (None until enough audio has been seen)
    fn bpm(&self) -> Option<f64>;
}

/// Builds detectors on the analysis thread
pub trait DetectorFactory: Send + Sync {
    fn onset(&self, config: &DetectorConfig) -> Result<Box<dyn OnsetDetect>, DetectorError>;
    fn beat(&self, config: &DetectorConfig) -> Result<Box<dyn BeatDetect>, DetectorError>;
}

/// Spectral-flux onset detector and autocorrelation beat tracker
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDetectors;

impl DetectorFactory for BuiltinDetectors {
    fn onset(&self, config: &DetectorConfig) -> Result<Box<dyn OnsetDetect>, DetectorError> {
        config.validate()?;
        Ok(Box::new(SpectralFluxOnset::new(config)))
    }

    fn beat(&self, config: &DetectorConfig) -> Result<Box<dyn BeatDetect>, DetectorError> {
        config.validate()?;
        Ok(Box::new(BeatTracker::new(config)))
    }
}

/// Sliding-window spectral flux
///
/// Keeps the last `window_size` samples, applies a Hann window and sums the
/// positive magnitude differences against the previous frame.
struct SpectralFlux {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    frame: VecDeque<f32>,
    buffer: Vec<Complex<f32>>,
    previous: Vec<f32>,
}

impl SpectralFlux {
    fn new(window_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);
        let window = (0..window_size)
            .map(|i| {
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / window_size as f32).cos()
            })
            .collect();
        Self {
            fft,
            window,
            frame: std::iter::repeat(0.0).take(window_size).collect(),
            buffer: vec![COMPLEX_ZERO; window_size],
            previous: vec![0.0; window_size / 2 + 1],
        }
    }

    fn push(&mut self, hop: &[f32]) -> f32 {
        for &sample in hop {
            self.frame.pop_front();
            self.frame.push_back(sample);
        }

        for ((buf, &s), &w) in self.buffer.iter_mut().zip(&self.frame).zip(&self.window) {
            *buf = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let mut flux = 0.0;
        for (c, prev) in self.buffer.iter().zip(self.previous.iter_mut()) {
            let mag = c.norm();
            let diff = mag - *prev;
            if diff > 0.0 {
                flux += diff;
            }
            *prev = mag;
        }
        flux
    }
}

/// Trailing frames in the adaptive median
const MEDIAN_WINDOW_HOPS: usize = 11;
/// Threshold as a multiple of the local median
const THRESHOLD_MULTIPLIER: f32 = 1.5;
/// Floor added to the threshold so near-silence never triggers
const THRESHOLD_FLOOR: f32 = 0.01;
/// Minimum gap between onsets in hops (about 40ms at 48kHz / 512)
const MIN_ONSET_GAP_HOPS: usize = 4;

/// Onset detector over spectral flux with an adaptive median threshold
pub struct SpectralFluxOnset {
    flux: SpectralFlux,
    history: VecDeque<f32>,
    sorted: Vec<f32>,
    hops_since_onset: usize,
}

impl SpectralFluxOnset {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            flux: SpectralFlux::new(config.window_size),
            history: VecDeque::with_capacity(MEDIAN_WINDOW_HOPS + 1),
            sorted: Vec::with_capacity(MEDIAN_WINDOW_HOPS + 1),
            hops_since_onset: MIN_ONSET_GAP_HOPS,
        }
    }
}

impl OnsetDetect for SpectralFluxOnset {
    fn detect(&mut self, hop: &[f32]) -> bool {
        let value = self.flux.push(hop);

        self.history.push_back(value);
        if self.history.len() > MEDIAN_WINDOW_HOPS {
            self.history.pop_front();
        }
        self.sorted.clear();
        self.sorted.extend(self.history.iter().copied());
        self.sorted
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = self.sorted[self.sorted.len() / 2];
        let threshold = median * THRESHOLD_MULTIPLIER + THRESHOLD_FLOOR;

        self.hops_since_onset = self.hops_since_onset.saturating_add(1);
        if value > threshold && self.hops_since_onset >= MIN_ONSET_GAP_HOPS {
            self.hops_since_onset = 0;
            return true;
        }
        false
    }
}

/// Tempo search range
const MIN_TRACK_BPM: f64 = 60.0;
const MAX_TRACK_BPM: f64 = 200.0;
/// Tempo the period weighting is centred on
const PREFERRED_BPM: f64 = 120.0;
/// Onset-strength history used for autocorrelation
const ENVELOPE_SECONDS: f64 = 6.0;
/// Audio needed before the first tempo estimate
const MIN_HISTORY_SECONDS: f64 = 3.0;
/// Hops between tempo/phase re-estimates
const REESTIMATE_HOPS: usize = 32;

/// Autocorrelation beat tracker
///
/// The spectral-flux envelope is autocorrelated to find the beat period,
/// the phase is chosen where the envelope lines up best with that period,
/// and a beat fires whenever the running hop counter reaches the predicted
/// position.
pub struct BeatTracker {
    flux: SpectralFlux,
    hop_rate: f64,
    envelope: VecDeque<f32>,
    envelope_len: usize,
    min_history: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    correlation: Vec<Complex<f32>>,
    /// Hops processed so far
    hop_index: u64,
    /// Beat period in hops
    period: Option<f64>,
    /// Hop index at which the next beat fires
    next_beat: f64,
    last_beat: Option<u64>,
}

impl BeatTracker {
    pub fn new(config: &DetectorConfig) -> Self {
        let hop_rate = config.hop_rate();
        let envelope_len = (ENVELOPE_SECONDS * hop_rate).ceil() as usize;
        let fft_len = (envelope_len * 2).next_power_of_two();
        let mut planner = FftPlanner::new();
        Self {
            flux: SpectralFlux::new(config.window_size),
            hop_rate,
            envelope: VecDeque::with_capacity(envelope_len + 1),
            envelope_len,
            min_history: (MIN_HISTORY_SECONDS * hop_rate).ceil() as usize,
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
            correlation: vec![COMPLEX_ZERO; fft_len],
            hop_index: 0,
            period: None,
            next_beat: 0.0,
            last_beat: None,
        }
    }

    /// Beat period in hops from the envelope autocorrelation
    fn estimate_period(&mut self) -> Option<f64> {
        let n = self.envelope.len();
        let mean = self.envelope.iter().sum::<f32>() / n as f32;

        self.correlation.fill(COMPLEX_ZERO);
        for (slot, &value) in self.correlation.iter_mut().zip(&self.envelope) {
            *slot = Complex::new(value - mean, 0.0);
        }
        self.forward.process(&mut self.correlation);
        for c in self.correlation.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        self.inverse.process(&mut self.correlation);

        let min_lag = (60.0 / MAX_TRACK_BPM * self.hop_rate).floor().max(1.0) as usize;
        let max_lag = ((60.0 / MIN_TRACK_BPM * self.hop_rate).ceil() as usize).min(n - 2);
        if min_lag + 1 >= max_lag {
            return None;
        }

        let preferred = 60.0 / PREFERRED_BPM * self.hop_rate;
        let score = |lag: usize| -> f64 {
            let raw = self.correlation[lag].re as f64 / (n - lag) as f64;
            let octave = (lag as f64 / preferred).log2();
            raw * (-0.5 * octave * octave).exp()
        };

        let mut best_lag = min_lag;
        let mut best = f64::MIN;
        for lag in min_lag..=max_lag {
            let s = score(lag);
            if s > best {
                best = s;
                best_lag = lag;
            }
        }
        if best <= 0.0 {
            return None;
        }

        // Parabolic refinement around the peak
        let (a, b, c) = (score(best_lag - 1), best, score(best_lag + 1));
        let denom = a - 2.0 * b + c;
        let offset = if denom.abs() > f64::EPSILON {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        Some(best_lag as f64 + offset)
    }

    /// Hops since the most recent beat-aligned envelope peak
    fn estimate_phase(&self, period: f64) -> usize {
        let n = self.envelope.len();
        let candidates = period.ceil() as usize;
        let mut best_phase = 0;
        let mut best = f32::MIN;
        for phase in 0..candidates.min(n) {
            let mut sum = 0.0;
            let mut k = 0.0;
            loop {
                let back = phase as f64 + k * period;
                let back = back.round() as usize;
                if back >= n {
                    break;
                }
                sum += self.envelope[n - 1 - back];
                k += 1.0;
            }
            if sum > best {
                best = sum;
                best_phase = phase;
            }
        }
        best_phase
    }
}

impl BeatDetect for BeatTracker {
    fn detect(&mut self, hop: &[f32]) -> bool {
        let value = self.flux.push(hop);
        self.envelope.push_back(value);
        if self.envelope.len() > self.envelope_len {
            self.envelope.pop_front();
        }

        let current = self.hop_index;
        self.hop_index += 1;

        if self.envelope.len() >= self.min_history
            && (self.period.is_none() || current % REESTIMATE_HOPS as u64 == 0)
        {
            if let Some(period) = self.estimate_period() {
                let phase = self.estimate_phase(period);
                let mut next = current as f64 - phase as f64;
                while next < current as f64 {
                    next += period;
                }
                if let Some(last) = self.last_beat {
                    let earliest = last as f64 + period * 0.5;
                    while next < earliest {
                        next += period;
                    }
                }
                self.period = Some(period);
                self.next_beat = next;
            }
        }

        let Some(period) = self.period else {
            return false;
        };
        if current as f64 + 0.5 >= self.next_beat {
            self.last_beat = Some(current);
            while self.next_beat <= current as f64 + 0.5 {
                self.next_beat += period;
            }
            return true;
        }
        false
    }

    fn bpm(&self) -> Option<f64> {
        self.period.map(|p| 60.0 * self.hop_rate / p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: DetectorConfig = DetectorConfig {
        window_size: 1024,
        hop_size: 512,
        sample_rate: 48000,
    };

    /// Short decaying noise bursts every `interval` seconds
    fn click_train(seconds: f64, interval: f64) -> Vec<f32> {
        let total = (seconds * 48000.0) as usize;
        let spacing = (interval * 48000.0) as usize;
        let mut seed = 0x1234_5678_u32;
        (0..total)
            .map(|i| {
                let offset = i % spacing;
                if offset < 480 {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    let noise = (seed as f32 / u32::MAX as f32) * 2.0 - 1.0;
                    noise * (1.0 - offset as f32 / 480.0)
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = DetectorConfig {
            hop_size: 0,
            ..CONFIG
        };
        assert!(BuiltinDetectors.onset(&bad).is_err());
        let bad = DetectorConfig {
            sample_rate: 0,
            ..CONFIG
        };
        assert!(BuiltinDetectors.beat(&bad).is_err());
    }

    #[test]
    fn test_silence_has_no_onsets() {
        let mut onset = BuiltinDetectors.onset(&CONFIG).unwrap();
        let hop = [0.0f32; 512];
        assert!((0..200).all(|_| !onset.detect(&hop)));
    }

    #[test]
    fn test_onsets_follow_click_train() {
        let audio = click_train(5.0, 0.5);
        let mut onset = BuiltinDetectors.onset(&CONFIG).unwrap();
        let count = audio.chunks_exact(512).filter(|hop| onset.detect(hop)).count();
        assert!((9..=11).contains(&count), "got {} onsets", count);
    }

    #[test]
    fn test_beat_tracker_finds_tempo() {
        let audio = click_train(12.0, 0.5);
        let mut beat = BuiltinDetectors.beat(&CONFIG).unwrap();

        let mut beat_hops = Vec::new();
        for (i, hop) in audio.chunks_exact(512).enumerate() {
            if beat.detect(hop) {
                beat_hops.push(i);
            }
        }

        let bpm = beat.bpm().unwrap();
        assert!((bpm - 120.0).abs() < 2.0, "tracked {} BPM", bpm);
        assert!(beat_hops.len() >= 12);
        for pair in beat_hops.windows(2) {
            let interval = pair[1] - pair[0];
            assert!((44..=50).contains(&interval), "interval {} hops", interval);
        }
    }
}
