//! Three-band equalizer stage
//!
//! Low shelf → peak → high shelf, each an RBJ-cookbook biquad. Every
//! parameter is smoothed and the coefficients are recomputed from scratch
//! once per block, so a control sweep turns into many small coefficient
//! steps rather than one large jump.
//!
//! Control surface values live in [`EqParams`] (atomics written by the
//! control thread); the engine copies them into the stage once per block.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::smoother::Smoother;
use crate::types::{StereoBuffer, StereoSample, SAMPLE_RATE};

/// Glide time for every EQ parameter
pub const EQ_SMOOTHING_MS: f64 = 20.0;

/// Shelf slope expressed as Q (Butterworth)
const SHELF_Q: f32 = 0.707;

const MIN_GAIN_DB: f32 = -24.0;
const MAX_GAIN_DB: f32 = 24.0;
const MIN_Q: f32 = 0.1;
const MAX_Q: f32 = 10.0;
const MIN_FREQ: f32 = 20.0;
/// Upper frequency bound as a fraction of the sample rate (keeps clear of Nyquist)
const MAX_FREQ_RATIO: f32 = 0.4;

/// Biquad filter state for one band (both channels, direct form I)
#[derive(Debug, Clone, Default)]
struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input_l: f32, input_r: f32, c: &BiquadCoeffs) -> (f32, f32) {
        let out_l = c.b0 * input_l + c.b1 * self.x1_l + c.b2 * self.x2_l
                  - c.a1 * self.y1_l - c.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input_l;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = c.b0 * input_r + c.b1 * self.x1_r + c.b2 * self.x2_r
                  - c.a1 * self.y1_r - c.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input_r;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        (out_l, out_r)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Normalized biquad coefficients (a0 divided out)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoeffs {
    /// Unity gain, no filtering
    pub fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    /// Low shelf: boosts/cuts everything below `freq` by `gain_db`
    pub fn low_shelf(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }

    /// Peaking (bell) filter centred on `freq`
    pub fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    /// High shelf: boosts/cuts everything above `freq` by `gain_db`
    pub fn high_shelf(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }

    /// Magnitude response at DC
    pub fn dc_gain(&self) -> f32 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Magnitude response at Nyquist
    pub fn nyquist_gain(&self) -> f32 {
        (self.b0 - self.b1 + self.b2) / (1.0 - self.a1 + self.a2)
    }
}

/// EQ control values as the user sets them
///
/// Setters clamp to the control ranges of each band; the stage clamps once
/// more against the running sample rate when it builds coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqSettings {
    pub low_shelf_freq: f32,
    pub low_shelf_gain_db: f32,
    pub peak_freq: f32,
    pub peak_gain_db: f32,
    pub peak_q: f32,
    pub high_shelf_freq: f32,
    pub high_shelf_gain_db: f32,
    pub bypass: bool,
}

impl Default for EqSettings {
    fn default() -> Self {
        Self {
            low_shelf_freq: 80.0,
            low_shelf_gain_db: 0.0,
            peak_freq: 1000.0,
            peak_gain_db: 0.0,
            peak_q: 0.707,
            high_shelf_freq: 8000.0,
            high_shelf_gain_db: 0.0,
            bypass: false,
        }
    }
}

impl EqSettings {
    pub fn set_low_shelf_freq(&mut self, freq: f32) {
        self.low_shelf_freq = freq.clamp(20.0, 500.0);
    }

    pub fn set_low_shelf_gain_db(&mut self, gain_db: f32) {
        self.low_shelf_gain_db = gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
    }

    pub fn set_peak_freq(&mut self, freq: f32) {
        self.peak_freq = freq.clamp(200.0, 8000.0);
    }

    pub fn set_peak_gain_db(&mut self, gain_db: f32) {
        self.peak_gain_db = gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
    }

    pub fn set_peak_q(&mut self, q: f32) {
        self.peak_q = q.clamp(MIN_Q, MAX_Q);
    }

    pub fn set_high_shelf_freq(&mut self, freq: f32) {
        self.high_shelf_freq = freq.clamp(2000.0, 20000.0);
    }

    pub fn set_high_shelf_gain_db(&mut self, gain_db: f32) {
        self.high_shelf_gain_db = gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
    }

    /// Re-apply every setter clamp (for values loaded from config)
    pub fn clamped(self) -> Self {
        let mut out = self;
        out.set_low_shelf_freq(self.low_shelf_freq);
        out.set_low_shelf_gain_db(self.low_shelf_gain_db);
        out.set_peak_freq(self.peak_freq);
        out.set_peak_gain_db(self.peak_gain_db);
        out.set_peak_q(self.peak_q);
        out.set_high_shelf_freq(self.high_shelf_freq);
        out.set_high_shelf_gain_db(self.high_shelf_gain_db);
        out
    }
}

#[inline]
fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

#[inline]
fn store_f32(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

/// Lock-free EQ controls shared between the control and audio threads
///
/// Each field is an independent atomic; the audio thread reads them all
/// once at the start of a block.
#[derive(Debug)]
pub struct EqParams {
    low_shelf_freq: AtomicU32,
    low_shelf_gain_db: AtomicU32,
    peak_freq: AtomicU32,
    peak_gain_db: AtomicU32,
    peak_q: AtomicU32,
    high_shelf_freq: AtomicU32,
    high_shelf_gain_db: AtomicU32,
    bypass: AtomicBool,
}

impl EqParams {
    pub fn new(settings: EqSettings) -> Self {
        let settings = settings.clamped();
        Self {
            low_shelf_freq: AtomicU32::new(settings.low_shelf_freq.to_bits()),
            low_shelf_gain_db: AtomicU32::new(settings.low_shelf_gain_db.to_bits()),
            peak_freq: AtomicU32::new(settings.peak_freq.to_bits()),
            peak_gain_db: AtomicU32::new(settings.peak_gain_db.to_bits()),
            peak_q: AtomicU32::new(settings.peak_q.to_bits()),
            high_shelf_freq: AtomicU32::new(settings.high_shelf_freq.to_bits()),
            high_shelf_gain_db: AtomicU32::new(settings.high_shelf_gain_db.to_bits()),
            bypass: AtomicBool::new(settings.bypass),
        }
    }

    /// Copy of every control (lock-free)
    pub fn snapshot(&self) -> EqSettings {
        EqSettings {
            low_shelf_freq: load_f32(&self.low_shelf_freq),
            low_shelf_gain_db: load_f32(&self.low_shelf_gain_db),
            peak_freq: load_f32(&self.peak_freq),
            peak_gain_db: load_f32(&self.peak_gain_db),
            peak_q: load_f32(&self.peak_q),
            high_shelf_freq: load_f32(&self.high_shelf_freq),
            high_shelf_gain_db: load_f32(&self.high_shelf_gain_db),
            bypass: self.bypass.load(Ordering::Relaxed),
        }
    }

    /// Store every control, clamped to its range
    pub fn store(&self, settings: EqSettings) {
        let settings = settings.clamped();
        store_f32(&self.low_shelf_freq, settings.low_shelf_freq);
        store_f32(&self.low_shelf_gain_db, settings.low_shelf_gain_db);
        store_f32(&self.peak_freq, settings.peak_freq);
        store_f32(&self.peak_gain_db, settings.peak_gain_db);
        store_f32(&self.peak_q, settings.peak_q);
        store_f32(&self.high_shelf_freq, settings.high_shelf_freq);
        store_f32(&self.high_shelf_gain_db, settings.high_shelf_gain_db);
        self.bypass.store(settings.bypass, Ordering::Relaxed);
    }

    pub fn set_low_shelf(&self, freq: f32, gain_db: f32) {
        let mut s = EqSettings::default();
        s.set_low_shelf_freq(freq);
        s.set_low_shelf_gain_db(gain_db);
        store_f32(&self.low_shelf_freq, s.low_shelf_freq);
        store_f32(&self.low_shelf_gain_db, s.low_shelf_gain_db);
    }

    pub fn set_peak(&self, freq: f32, gain_db: f32, q: f32) {
        let mut s = EqSettings::default();
        s.set_peak_freq(freq);
        s.set_peak_gain_db(gain_db);
        s.set_peak_q(q);
        store_f32(&self.peak_freq, s.peak_freq);
        store_f32(&self.peak_gain_db, s.peak_gain_db);
        store_f32(&self.peak_q, s.peak_q);
    }

    pub fn set_high_shelf(&self, freq: f32, gain_db: f32) {
        let mut s = EqSettings::default();
        s.set_high_shelf_freq(freq);
        s.set_high_shelf_gain_db(gain_db);
        store_f32(&self.high_shelf_freq, s.high_shelf_freq);
        store_f32(&self.high_shelf_gain_db, s.high_shelf_gain_db);
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.store(bypass, Ordering::Relaxed);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass.load(Ordering::Relaxed)
    }
}

impl Default for EqParams {
    fn default() -> Self {
        Self::new(EqSettings::default())
    }
}

/// Smoothed parameters of one band
#[derive(Debug, Clone)]
struct BandSmoothers {
    freq: Smoother,
    gain_db: Smoother,
    q: Smoother,
}

impl BandSmoothers {
    fn new(freq: f32, gain_db: f32, q: f32) -> Self {
        Self {
            freq: Smoother::new(freq),
            gain_db: Smoother::new(gain_db),
            q: Smoother::new(q),
        }
    }

    fn configure(&mut self, rate: f64) {
        self.freq.configure(rate, EQ_SMOOTHING_MS);
        self.gain_db.configure(rate, EQ_SMOOTHING_MS);
        self.q.configure(rate, EQ_SMOOTHING_MS);
    }

    fn set_targets(&mut self, freq: f32, gain_db: f32, q: f32) {
        self.freq.set_target(freq);
        self.gain_db.set_target(gain_db);
        self.q.set_target(q);
    }

    fn snap(&mut self) {
        self.freq.set_current_and_target(self.freq.target());
        self.gain_db.set_current_and_target(self.gain_db.target());
        self.q.set_current_and_target(self.q.target());
    }

    /// Pull one smoothed (freq, gain, q) triple for a block of `frames`,
    /// clamped for stability
    fn next(&mut self, sample_rate: f32, frames: usize) -> (f32, f32, f32) {
        let max_freq = (sample_rate * MAX_FREQ_RATIO).max(MIN_FREQ);
        (
            self.freq.skip(frames).clamp(MIN_FREQ, max_freq),
            self.gain_db.skip(frames).clamp(MIN_GAIN_DB, MAX_GAIN_DB),
            self.q.skip(frames).clamp(MIN_Q, MAX_Q),
        )
    }
}

/// Three-band equalizer stage
pub struct EqStage {
    low: BandSmoothers,
    peak: BandSmoothers,
    high: BandSmoothers,
    low_state: BiquadState,
    peak_state: BiquadState,
    high_state: BiquadState,
    bypass: bool,
    sample_rate: f32,
}

impl EqStage {
    pub fn new(settings: EqSettings) -> Self {
        let s = settings.clamped();
        Self {
            low: BandSmoothers::new(s.low_shelf_freq, s.low_shelf_gain_db, SHELF_Q),
            peak: BandSmoothers::new(s.peak_freq, s.peak_gain_db, s.peak_q),
            high: BandSmoothers::new(s.high_shelf_freq, s.high_shelf_gain_db, SHELF_Q),
            low_state: BiquadState::default(),
            peak_state: BiquadState::default(),
            high_state: BiquadState::default(),
            bypass: s.bypass,
            sample_rate: SAMPLE_RATE as f32,
        }
    }

    /// Configure smoothing for `sample_rate` and clear filter history
    ///
    /// The smoothers are per-sample and advanced by each block's actual
    /// length, so the glide time holds whatever block sizes the device
    /// delivers up to `max_block_size`.
    pub fn prepare(&mut self, sample_rate: u32, max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        self.low.configure(sample_rate as f64);
        self.peak.configure(sample_rate as f64);
        self.high.configure(sample_rate as f64);
        self.reset();
        log::debug!("EqStage: prepared at {}Hz, max block {} frames", sample_rate, max_block_size);
    }

    /// Retarget every band (values already clamped by the settings setters)
    pub fn set_targets(&mut self, settings: &EqSettings) {
        self.low.set_targets(settings.low_shelf_freq, settings.low_shelf_gain_db, SHELF_Q);
        self.peak.set_targets(settings.peak_freq, settings.peak_gain_db, settings.peak_q);
        self.high.set_targets(settings.high_shelf_freq, settings.high_shelf_gain_db, SHELF_Q);
        self.bypass = settings.bypass;
    }

    /// Jump every band onto its target with no glide
    pub fn snap_to_targets(&mut self) {
        self.low.snap();
        self.peak.snap();
        self.high.snap();
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Clear filter history
    pub fn reset(&mut self) {
        self.low_state.reset();
        self.peak_state.reset();
        self.high_state.reset();
    }

    /// Coefficients for the next block (advances the smoothers by `frames`)
    fn next_coefficients(&mut self, frames: usize) -> [BiquadCoeffs; 3] {
        let sr = self.sample_rate;
        let (low_freq, low_gain, low_q) = self.low.next(sr, frames);
        let (peak_freq, peak_gain, peak_q) = self.peak.next(sr, frames);
        let (high_freq, high_gain, high_q) = self.high.next(sr, frames);
        [
            BiquadCoeffs::low_shelf(low_freq, low_gain, low_q, sr),
            BiquadCoeffs::peaking(peak_freq, peak_gain, peak_q, sr),
            BiquadCoeffs::high_shelf(high_freq, high_gain, high_q, sr),
        ]
    }

    /// Filter one block in place
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        if self.bypass {
            return;
        }

        let [low, peak, high] = self.next_coefficients(buffer.len());
        for sample in buffer.iter_mut() {
            let (mut left, mut right) = (sample.left, sample.right);
            (left, right) = self.low_state.process(left, right, &low);
            (left, right) = self.peak_state.process(left, right, &peak);
            (left, right) = self.high_state.process(left, right, &high);
            *sample = StereoSample::new(left, right);
        }
    }
}

impl Default for EqStage {
    fn default() -> Self {
        Self::new(EqSettings::default())
    }
}
