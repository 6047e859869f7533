//! Analysis snapshot and tempo statistics

/// Beats required before a tempo estimate is trusted
pub const MIN_BEATS_FOR_CONFIDENCE: usize = 4;

/// Snapshot of everything the analysis worker has detected so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResult {
    /// Beat timestamps in seconds, non-decreasing
    pub beats: Vec<f64>,
    /// Onset timestamps in seconds, non-decreasing
    pub onsets: Vec<f64>,
    /// Tempo estimate (0 when unknown)
    pub bpm: f64,
    /// Regularity of recent beats in [0, 1]
    pub confidence: f64,
    pub is_valid: bool,
}

impl AnalysisResult {
    /// The detected beat closest to `seconds`
    pub fn nearest_beat(&self, seconds: f64) -> Option<f64> {
        self.beats.iter().copied().min_by(|a, b| {
            (a - seconds)
                .abs()
                .partial_cmp(&(b - seconds).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Length of one 4/4 bar at the detected tempo, if the result is usable
    pub fn bar_duration(&self) -> Option<f64> {
        (self.is_valid && self.bpm > 0.0).then(|| 4.0 * 60.0 / self.bpm)
    }
}

fn intervals(beats: &[f64]) -> Vec<f64> {
    beats.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Tempo from the median inter-beat interval
///
/// The median keeps a single missed or spurious beat from dragging the
/// estimate. Returns 0 with fewer than two beats.
pub fn estimate_bpm(beats: &[f64]) -> f64 {
    let mut intervals = intervals(beats);
    if intervals.is_empty() {
        return 0.0;
    }
    intervals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = intervals.len() / 2;
    let median = if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    };

    if median > 0.0 {
        60.0 / median
    } else {
        0.0
    }
}

/// `max(0, 1 - stddev / mean)` of the inter-beat intervals
///
/// Zero with fewer than [`MIN_BEATS_FOR_CONFIDENCE`] beats.
pub fn estimate_confidence(beats: &[f64]) -> f64 {
    if beats.len() < MIN_BEATS_FOR_CONFIDENCE {
        return 0.0;
    }
    let intervals = intervals(beats);
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).max(0.0)
}
