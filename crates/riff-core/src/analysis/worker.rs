//! Background analysis thread
//!
//! The audio thread pushes a mono copy of what it plays through an
//! [`AnalysisFeeder`]; the worker drains it hop by hop on its own thread,
//! runs onset and beat detection, and publishes an [`AnalysisResult`]
//! snapshot behind a mutex.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::detector::{BeatDetect, BuiltinDetectors, DetectorConfig, DetectorFactory, OnsetDetect};
use super::result::{estimate_bpm, estimate_confidence, AnalysisResult, MIN_BEATS_FOR_CONFIDENCE};
use crate::ring_buffer::{Consumer, Producer, RingBuffer};
use crate::types::{StereoBuffer, SAMPLE_RATE};

/// Samples consumed per detection step
pub const HOP_SIZE: usize = 512;
/// Analysis window length
pub const WINDOW_SIZE: usize = 1024;
/// Mono samples the feeder can queue ahead of the worker
pub const RING_CAPACITY: usize = 16384;
/// History used for the tempo estimate
pub const RECENT_BEATS_WINDOW_SECS: f64 = 10.0;
/// Hops between tempo/confidence refreshes
pub const DEFAULT_UPDATE_INTERVAL_HOPS: usize = 10;
/// Idle sleep when less than a hop is queued
const IDLE_SLEEP: Duration = Duration::from_millis(5);
/// Largest block the feeder downmixes in one pass
const FEED_CHUNK: usize = 2048;

/// Snapshot plus the generation it belongs to
#[derive(Default)]
struct Published {
    result: AnalysisResult,
    /// Bumped by every clear so the worker can drop its private history
    generation: u64,
}

/// State shared between the control thread, the feeder and the worker
struct Shared {
    published: Mutex<Published>,
    running: AtomicBool,
    enabled: AtomicBool,
    /// Seconds of audio fed so far (f64 bits)
    clock: AtomicU64,
    sample_rate: AtomicU32,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Published> {
        match self.published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn clock(&self) -> f64 {
        f64::from_bits(self.clock.load(Ordering::Acquire))
    }

    fn advance_clock(&self, seconds: f64) {
        let now = self.clock();
        self.clock.store((now + seconds).to_bits(), Ordering::Release);
    }

    fn reset_clock(&self) {
        self.clock.store(0.0f64.to_bits(), Ordering::Release);
    }
}

/// Audio-thread side of the analysis pipeline
///
/// Owns the ring buffer producer and a pre-allocated mono scratch buffer.
/// [`feed`](Self::feed) never blocks or allocates; samples that do not fit
/// are dropped.
pub struct AnalysisFeeder {
    producer: Producer<f32>,
    scratch: Vec<f32>,
    shared: Arc<Shared>,
}

impl AnalysisFeeder {
    /// Downmix `buffer` to mono and queue it for the worker
    pub fn feed(&mut self, buffer: &StereoBuffer) {
        if buffer.is_empty() || !self.shared.enabled.load(Ordering::Relaxed) {
            return;
        }

        let sample_rate = self.shared.sample_rate.load(Ordering::Relaxed).max(1) as f64;
        for chunk in buffer.as_slice().chunks(self.scratch.len()) {
            let mono = &mut self.scratch[..chunk.len()];
            for (out, sample) in mono.iter_mut().zip(chunk) {
                *out = sample.mono_mix();
            }
            // The clock counts queued audio only, so a dropped chunk
            // cannot push later hop timestamps ahead of their samples
            if self.producer.write(mono) {
                self.shared.advance_clock(chunk.len() as f64 / sample_rate);
            }
        }
    }

    /// Seconds of audio queued for analysis since the last clear
    pub fn fed_seconds(&self) -> f64 {
        self.shared.clock()
    }

    /// Tell the feeder the rate of the audio it will receive
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.shared.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// Samples that can be queued right now
    pub fn space(&self) -> usize {
        self.producer.space()
    }
}

/// Background analysis worker
///
/// Stopped until [`start`](Self::start); the thread is joined by
/// [`stop`](Self::stop) or on drop.
pub struct AnalysisWorker {
    shared: Arc<Shared>,
    factory: Arc<dyn DetectorFactory>,
    /// Held here while stopped, moved into the thread while running
    consumer: Option<Consumer<f32>>,
    thread: Option<JoinHandle<Consumer<f32>>>,
    update_interval_hops: usize,
}

impl AnalysisWorker {
    /// Create a stopped worker and the feeder that supplies it
    pub fn new(factory: Arc<dyn DetectorFactory>) -> (Self, AnalysisFeeder) {
        let (producer, consumer) = RingBuffer::new::<f32>(RING_CAPACITY);
        let shared = Arc::new(Shared {
            published: Mutex::new(Published::default()),
            running: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            clock: AtomicU64::new(0.0f64.to_bits()),
            sample_rate: AtomicU32::new(SAMPLE_RATE),
        });

        let feeder = AnalysisFeeder {
            producer,
            scratch: vec![0.0; FEED_CHUNK],
            shared: Arc::clone(&shared),
        };

        let worker = Self {
            shared,
            factory,
            consumer: Some(consumer),
            thread: None,
            update_interval_hops: DEFAULT_UPDATE_INTERVAL_HOPS,
        };
        (worker, feeder)
    }

    /// Worker using the built-in spectral-flux detectors
    pub fn with_builtin_detectors() -> (Self, AnalysisFeeder) {
        Self::new(Arc::new(BuiltinDetectors))
    }

    /// Change the tempo refresh cadence (takes effect on the next start)
    pub fn set_update_interval_hops(&mut self, hops: usize) {
        self.update_interval_hops = hops.max(1);
    }

    pub fn update_interval_hops(&self) -> usize {
        self.update_interval_hops
    }

    /// Start analysing audio at `sample_rate`
    ///
    /// No-op while already running. Clears previous results and any audio
    /// queued while stopped.
    pub fn start(&mut self, sample_rate: u32) {
        if self.is_running() {
            return;
        }
        let Some(mut consumer) = self.consumer.take() else {
            log::error!("AnalysisWorker: ring buffer consumer missing, cannot start");
            return;
        };

        self.clear_results();
        consumer.discard_all();
        self.shared.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.shared.running.store(true, Ordering::Release);

        let config = DetectorConfig {
            window_size: WINDOW_SIZE,
            hop_size: HOP_SIZE,
            sample_rate,
        };
        let shared = Arc::clone(&self.shared);
        let factory = Arc::clone(&self.factory);
        let update_interval = self.update_interval_hops;

        let spawned = thread::Builder::new()
            .name("riff-analysis".to_string())
            .spawn(move || run(shared, factory, consumer, config, update_interval));

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                log::info!("AnalysisWorker: started at {}Hz", sample_rate);
            }
            Err(e) => {
                // The consumer went down with the closure, so the worker stays inert
                self.shared.running.store(false, Ordering::Release);
                log::error!("AnalysisWorker: failed to spawn thread: {}", e);
            }
        }
    }

    /// Signal shutdown and join the thread
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(consumer) => self.consumer = Some(consumer),
                Err(_) => log::error!("AnalysisWorker: analysis thread panicked"),
            }
            log::info!("AnalysisWorker: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Copy of the latest snapshot
    pub fn latest_results(&self) -> AnalysisResult {
        self.shared.lock().result.clone()
    }

    /// Forget everything detected so far and restart the analysis clock
    pub fn clear_results(&self) {
        let mut published = self.shared.lock();
        published.result = AnalysisResult::default();
        published.generation += 1;
        self.shared.reset_clock();
    }

    /// Seconds of audio queued by the feeder since the last clear
    pub fn fed_seconds(&self) -> f64 {
        self.shared.clock()
    }

    /// Enable or disable feeding without stopping the thread
    pub fn set_analysis_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_analysis_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Relaxed)
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Thread body: build detectors, then drain the ring until told to stop
fn run(
    shared: Arc<Shared>,
    factory: Arc<dyn DetectorFactory>,
    mut consumer: Consumer<f32>,
    config: DetectorConfig,
    update_interval_hops: usize,
) -> Consumer<f32> {
    let detectors = factory
        .onset(&config)
        .and_then(|onset| factory.beat(&config).map(|beat| (onset, beat)));
    let (onset, beat) = match detectors {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("AnalysisWorker: detector construction failed: {}", e);
            return consumer;
        }
    };

    let mut state = HopAnalyzer::new(onset, beat, &config, update_interval_hops);
    let mut hop = vec![0.0f32; config.hop_size];
    let sample_rate = config.sample_rate as f64;

    while shared.running.load(Ordering::Acquire) {
        if consumer.available() >= config.hop_size && consumer.read(&mut hop) {
            // End of this hop: everything fed minus what is still queued
            let hop_end = shared.clock() - consumer.available() as f64 / sample_rate;
            state.process_hop(&hop, hop_end, &shared);
        } else {
            thread::sleep(IDLE_SLEEP);
        }
    }

    consumer
}

/// Per-hop detection and snapshot bookkeeping
struct HopAnalyzer {
    onset: Box<dyn OnsetDetect>,
    beat: Box<dyn BeatDetect>,
    hop_duration: f64,
    recent_beats: VecDeque<f64>,
    hops_since_update: usize,
    update_interval_hops: usize,
    generation: u64,
}

impl HopAnalyzer {
    fn new(
        onset: Box<dyn OnsetDetect>,
        beat: Box<dyn BeatDetect>,
        config: &DetectorConfig,
        update_interval_hops: usize,
    ) -> Self {
        Self {
            onset,
            beat,
            hop_duration: config.hop_size as f64 / config.sample_rate as f64,
            recent_beats: VecDeque::new(),
            hops_since_update: 0,
            update_interval_hops: update_interval_hops.max(1),
            generation: 0,
        }
    }

    /// Run both detectors over one hop ending at `hop_end` seconds
    fn process_hop(&mut self, hop: &[f32], hop_end: f64, shared: &Shared) {
        let is_onset = self.onset.detect(hop);
        let is_beat = self.beat.detect(hop);
        // Detection reports after the hop was consumed
        let event_time = (hop_end - self.hop_duration).max(0.0);

        if is_onset || is_beat {
            let mut published = shared.lock();
            self.sync_generation(published.generation);
            let result = &mut published.result;

            if is_beat {
                let time = result.beats.last().map_or(event_time, |&last| event_time.max(last));
                result.beats.push(time);
                self.recent_beats.push_back(time);
                while self
                    .recent_beats
                    .front()
                    .is_some_and(|&t| t < time - RECENT_BEATS_WINDOW_SECS)
                {
                    self.recent_beats.pop_front();
                }
            }
            if is_onset {
                let time = result.onsets.last().map_or(event_time, |&last| event_time.max(last));
                result.onsets.push(time);
            }
        }

        self.hops_since_update += 1;
        if self.hops_since_update >= self.update_interval_hops {
            self.hops_since_update = 0;
            let mut published = shared.lock();
            self.sync_generation(published.generation);
            let beats = self.recent_beats.make_contiguous();
            let result = &mut published.result;
            result.bpm = estimate_bpm(beats);
            result.confidence = estimate_confidence(beats);
            result.is_valid = beats.len() >= MIN_BEATS_FOR_CONFIDENCE && result.bpm > 0.0;
        }
    }

    fn sync_generation(&mut self, generation: u64) {
        if generation != self.generation {
            self.generation = generation;
            self.recent_beats.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::detector::DetectorError;
    use crate::types::StereoSample;
    use std::time::Instant;

    /// Fires on every hop whose first sample is non-zero
    struct MarkerDetector;

    impl OnsetDetect for MarkerDetector {
        fn detect(&mut self, hop: &[f32]) -> bool {
            hop[0] != 0.0
        }
    }

    impl BeatDetect for MarkerDetector {
        fn detect(&mut self, hop: &[f32]) -> bool {
            hop[0] != 0.0
        }

        fn bpm(&self) -> Option<f64> {
            None
        }
    }

    struct MarkerFactory;

    impl DetectorFactory for MarkerFactory {
        fn onset(&self, _: &DetectorConfig) -> Result<Box<dyn OnsetDetect>, DetectorError> {
            Ok(Box::new(MarkerDetector))
        }

        fn beat(&self, _: &DetectorConfig) -> Result<Box<dyn BeatDetect>, DetectorError> {
            Ok(Box::new(MarkerDetector))
        }
    }

    struct FailingFactory;

    impl DetectorFactory for FailingFactory {
        fn onset(&self, _: &DetectorConfig) -> Result<Box<dyn OnsetDetect>, DetectorError> {
            Err(DetectorError::InvalidConfig("unavailable".into()))
        }

        fn beat(&self, _: &DetectorConfig) -> Result<Box<dyn BeatDetect>, DetectorError> {
            Err(DetectorError::InvalidConfig("unavailable".into()))
        }
    }

    fn test_shared() -> Shared {
        Shared {
            published: Mutex::new(Published::default()),
            running: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            clock: AtomicU64::new(0.0f64.to_bits()),
            sample_rate: AtomicU32::new(48000),
        }
    }

    fn analyzer(interval: usize) -> HopAnalyzer {
        let config = DetectorConfig {
            window_size: WINDOW_SIZE,
            hop_size: HOP_SIZE,
            sample_rate: 48000,
        };
        HopAnalyzer::new(Box::new(MarkerDetector), Box::new(MarkerDetector), &config, interval)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_beat_time_compensates_for_hop() {
        let shared = test_shared();
        let mut state = analyzer(10);
        let mut hop = [0.0f32; HOP_SIZE];
        hop[0] = 1.0;

        state.process_hop(&hop, 1.0, &shared);

        let published = shared.lock();
        let expected = 1.0 - HOP_SIZE as f64 / 48000.0;
        assert!((published.result.beats[0] - expected).abs() < 1e-12);
        assert!((published.result.onsets[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_tempo_refreshed_on_interval() {
        let shared = test_shared();
        let mut state = analyzer(10);
        let mut beat_hop = [0.0f32; HOP_SIZE];
        beat_hop[0] = 1.0;
        let quiet = [0.0f32; HOP_SIZE];

        // Beats every 0.5s, stamped directly through hop_end
        for i in 0..6 {
            state.process_hop(&beat_hop, 1.0 + i as f64 * 0.5, &shared);
        }
        assert_eq!(shared.lock().result.bpm, 0.0);

        for _ in 0..4 {
            state.process_hop(&quiet, 4.0, &shared);
        }

        let result = shared.lock().result.clone();
        assert!((result.bpm - 120.0).abs() < 1e-6);
        assert!((result.confidence - 1.0).abs() < 1e-9);
        assert!(result.is_valid);
    }

    #[test]
    fn test_recent_window_prunes_old_beats() {
        let shared = test_shared();
        let mut state = analyzer(1);
        let mut beat_hop = [0.0f32; HOP_SIZE];
        beat_hop[0] = 1.0;

        for t in [1.0, 2.0, 3.0, 14.0, 14.5, 15.0] {
            state.process_hop(&beat_hop, t, &shared);
        }

        assert_eq!(state.recent_beats.len(), 3);
        assert_eq!(shared.lock().result.beats.len(), 6);
        assert!(!shared.lock().result.is_valid);
    }

    #[test]
    fn test_clear_drops_recent_history() {
        let shared = test_shared();
        let mut state = analyzer(1);
        let mut beat_hop = [0.0f32; HOP_SIZE];
        beat_hop[0] = 1.0;

        state.process_hop(&beat_hop, 1.0, &shared);
        state.process_hop(&beat_hop, 1.5, &shared);
        {
            let mut published = shared.lock();
            published.result = AnalysisResult::default();
            published.generation += 1;
        }
        state.process_hop(&beat_hop, 2.0, &shared);

        assert_eq!(state.recent_beats.len(), 1);
        assert_eq!(shared.lock().result.beats.len(), 1);
    }

    #[test]
    fn test_start_is_idempotent_and_stop_joins() {
        let (mut worker, _feeder) = AnalysisWorker::new(Arc::new(MarkerFactory));
        assert!(!worker.is_running());

        worker.start(48000);
        assert!(worker.is_running());
        worker.start(48000);
        assert!(worker.is_running());

        worker.stop();
        assert!(!worker.is_running());

        // Restartable after stop
        worker.start(44100);
        assert!(worker.is_running());
        worker.stop();
    }

    #[test]
    fn test_fed_audio_produces_events() {
        let (mut worker, mut feeder) = AnalysisWorker::new(Arc::new(MarkerFactory));
        worker.start(48000);

        let mut block = StereoBuffer::silence(HOP_SIZE);
        block[0] = StereoSample::new(1.0, 1.0);
        for _ in 0..8 {
            feeder.feed(&block);
        }

        assert!(wait_until(|| worker.latest_results().beats.len() == 8));
        let result = worker.latest_results();
        assert_eq!(result.onsets.len(), 8);
        assert!(result.beats.windows(2).all(|w| w[0] <= w[1]));
        worker.stop();
    }

    #[test]
    fn test_disabled_feeding_is_a_noop() {
        let (mut worker, mut feeder) = AnalysisWorker::new(Arc::new(MarkerFactory));
        worker.set_analysis_enabled(false);
        worker.start(48000);

        let mut block = StereoBuffer::silence(HOP_SIZE);
        block[0] = StereoSample::new(1.0, 1.0);
        feeder.feed(&block);
        assert_eq!(feeder.space(), RING_CAPACITY - 1);

        thread::sleep(Duration::from_millis(30));
        assert!(worker.latest_results().beats.is_empty());
        assert!(worker.is_running());
        worker.stop();
    }

    #[test]
    fn test_dropped_block_does_not_advance_clock() {
        // Stopped worker: nothing drains the queue
        let (_worker, mut feeder) = AnalysisWorker::new(Arc::new(MarkerFactory));
        let block = StereoBuffer::silence(1024);

        for _ in 0..15 {
            feeder.feed(&block);
        }
        assert_eq!(feeder.space(), RING_CAPACITY - 1 - 15 * 1024);
        let fed = feeder.fed_seconds();
        assert!((fed - 15.0 * 1024.0 / 48000.0).abs() < 1e-9);

        // 1023 slots left: this block is dropped whole
        feeder.feed(&block);
        assert_eq!(feeder.space(), 1023);
        assert_eq!(feeder.fed_seconds(), fed);
    }

    #[test]
    fn test_failed_detectors_leave_worker_inert() {
        let (mut worker, mut feeder) = AnalysisWorker::new(Arc::new(FailingFactory));
        worker.start(48000);

        let mut block = StereoBuffer::silence(HOP_SIZE);
        block[0] = StereoSample::new(1.0, 1.0);
        feeder.feed(&block);
        thread::sleep(Duration::from_millis(30));

        assert_eq!(worker.latest_results(), AnalysisResult::default());
        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn test_clear_results_resets_snapshot() {
        let (mut worker, mut feeder) = AnalysisWorker::new(Arc::new(MarkerFactory));
        worker.start(48000);

        let mut block = StereoBuffer::silence(HOP_SIZE);
        block[0] = StereoSample::new(1.0, 1.0);
        feeder.feed(&block);
        assert!(wait_until(|| !worker.latest_results().beats.is_empty()));

        worker.clear_results();
        assert!(worker.latest_results().beats.is_empty());
        worker.stop();
    }
}
