//! Background tempo and onset analysis
//!
//! - [`AnalysisWorker`]: owns the detection thread and the published snapshot
//! - [`AnalysisFeeder`]: audio-thread handle that queues mono audio for it
//! - [`AnalysisResult`]: beats, onsets, BPM and confidence

mod detector;
mod result;
mod worker;

pub use detector::{
    BeatDetect, BeatTracker, BuiltinDetectors, DetectorConfig, DetectorError, DetectorFactory,
    OnsetDetect, SpectralFluxOnset,
};
pub use result::{estimate_bpm, estimate_confidence, AnalysisResult, MIN_BEATS_FOR_CONFIDENCE};
pub use worker::{
    AnalysisFeeder, AnalysisWorker, DEFAULT_UPDATE_INTERVAL_HOPS, HOP_SIZE, RECENT_BEATS_WINDOW_SECS,
    RING_CAPACITY, WINDOW_SIZE,
};
