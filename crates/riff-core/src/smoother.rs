//! One-pole parameter smoothing
//!
//! Every continuously variable control in the pipeline (tempo, pitch, EQ
//! gains and frequencies) goes through a [`Smoother`] so that a control
//! change becomes an exponential glide instead of a step.
//!
//! The coefficient is `k = 1 - exp(-1 / (ms * 0.001 * rate))`. `rate` is the
//! rate at which [`Smoother::next_value`] is called: the sample rate for
//! per-sample smoothing, or `sample_rate / block_size` when a stage pulls one
//! value per block.

/// Distance below which the glide snaps onto the target
const SNAP_EPSILON: f32 = 1e-6;

/// Single-pole exponential smoother
#[derive(Debug, Clone)]
pub struct Smoother {
    current: f32,
    target: f32,
    coefficient: f32,
    rate: f64,
    time_ms: f64,
}

impl Smoother {
    /// Create a smoother resting at `initial` with an instant (k = 1) response
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            coefficient: 1.0,
            rate: 0.0,
            time_ms: 0.0,
        }
    }

    /// Create a smoother resting at `initial`, configured for `rate` and `time_ms`
    pub fn with_time(initial: f32, rate: f64, time_ms: f64) -> Self {
        let mut smoother = Self::new(initial);
        smoother.configure(rate, time_ms);
        smoother
    }

    /// Set the update rate (calls to `next_value` per second)
    pub fn set_sample_rate(&mut self, rate: f64) {
        self.rate = rate;
        self.update_coefficient();
    }

    /// Set the time constant in milliseconds
    pub fn set_smoothing_time_ms(&mut self, time_ms: f64) {
        self.time_ms = time_ms;
        self.update_coefficient();
    }

    /// Set rate and time constant together
    pub fn configure(&mut self, rate: f64, time_ms: f64) {
        self.rate = rate;
        self.time_ms = time_ms;
        self.update_coefficient();
    }

    fn update_coefficient(&mut self) {
        self.coefficient = if self.rate > 0.0 && self.time_ms > 0.0 {
            (1.0 - (-1.0 / (self.time_ms * 0.001 * self.rate)).exp()) as f32
        } else {
            1.0
        };
    }

    /// Change the destination; the glide continues from the current value
    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Jump straight to `value` with no glide
    #[inline]
    pub fn set_current_and_target(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Advance one step and return the new current value
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        self.current += (self.target - self.current) * self.coefficient;
        if (self.target - self.current).abs() < SNAP_EPSILON {
            self.current = self.target;
        }
        self.current
    }

    /// Advance `steps` times at once and return the resulting value
    ///
    /// Equivalent to calling [`next_value`](Self::next_value) `steps` times,
    /// so a per-sample smoother can be pulled once per block of any length
    /// and still glide over the same wall-clock time.
    pub fn skip(&mut self, steps: usize) -> f32 {
        if steps == 0 || !self.is_smoothing() {
            return self.current;
        }
        let steps = steps.min(i32::MAX as usize) as i32;
        let remaining = (1.0 - self.coefficient as f64).powi(steps);
        self.current += ((self.target - self.current) as f64 * (1.0 - remaining)) as f32;
        if (self.target - self.current).abs() < SNAP_EPSILON {
            self.current = self.target;
        }
        self.current
    }

    /// Whether a glide is still in progress
    #[inline]
    pub fn is_smoothing(&self) -> bool {
        self.current != self.target
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Current coefficient, always in (0, 1]
    #[inline]
    pub fn coefficient(&self) -> f32 {
        self.coefficient
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new(0.0)
    }
}
