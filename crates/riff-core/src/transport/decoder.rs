//! Decoding collaborator for the transport stage
//!
//! The transport only needs a [`Decoder`]: something that hands out
//! interleaved stereo frames at the engine rate and can seek. Files are
//! decoded up front with symphonia, folded to stereo and resampled with
//! rubato into a [`DecodedTrack`], which then serves frames from memory
//! without touching the disk on the audio thread.

use std::fs::File;
use std::path::{Path, PathBuf};

use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Frames per resampler chunk
const RESAMPLE_CHUNK: usize = 4096;

/// Errors that can occur while loading an audio file
#[derive(Error, Debug)]
pub enum DecodeError {
    /// File could not be opened
    #[error("Failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Container or codec not supported
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// File decoded to zero frames
    #[error("No audio frames decoded from {0}")]
    Empty(PathBuf),

    /// Sample rate conversion failed
    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// Result type for decoding operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Source of interleaved stereo frames for the transport stage
///
/// Frame counts returned by [`read_frames`](Decoder::read_frames) are
/// authoritative: fewer than requested is allowed, and 0 means end of stream.
/// Implementations called from the audio thread must not block or allocate.
pub trait Decoder: Send {
    /// Read up to `max_frames` frames into `out` ([L, R, L, R, ...])
    fn read_frames(&mut self, out: &mut [f32], max_frames: usize) -> usize;

    /// Move the read cursor to `seconds` (clamped to the stream)
    fn seek(&mut self, seconds: f64);

    /// Total length in seconds
    fn total_length(&self) -> f64;

    /// Rate of the frames this decoder produces
    fn sample_rate(&self) -> u32;
}

/// A fully decoded stereo track held in memory
#[derive(Debug, Clone)]
pub struct DecodedTrack {
    /// Interleaved stereo samples
    samples: Vec<f32>,
    sample_rate: u32,
    /// Read cursor in frames
    cursor: usize,
}

impl DecodedTrack {
    /// Wrap already-interleaved stereo samples
    pub fn from_interleaved(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        if samples.len() % 2 != 0 {
            samples.pop();
        }
        Self {
            samples,
            sample_rate,
            cursor: 0,
        }
    }

    /// Decode `path` and convert it to stereo at `target_rate`
    pub fn open(path: &Path, target_rate: u32) -> DecodeResult<Self> {
        let (samples, source_rate, channels) = decode_file(path)?;
        let stereo = fold_to_stereo(&samples, channels);
        if stereo.is_empty() {
            return Err(DecodeError::Empty(path.to_path_buf()));
        }

        let stereo = if source_rate != target_rate {
            log::info!(
                "DecodedTrack: resampling {:?} from {}Hz to {}Hz",
                path.file_name().unwrap_or_default(),
                source_rate,
                target_rate
            );
            resample_stereo(&stereo, source_rate, target_rate)?
        } else {
            stereo
        };

        let track = Self::from_interleaved(stereo, target_rate);
        log::info!(
            "DecodedTrack: loaded {:?} ({:.2}s, {} frames)",
            path.file_name().unwrap_or_default(),
            track.total_length(),
            track.frame_count()
        );
        Ok(track)
    }

    /// Number of stereo frames
    pub fn frame_count(&self) -> usize {
        self.samples.len() / 2
    }

    /// Current read cursor in frames
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Decoder for DecodedTrack {
    fn read_frames(&mut self, out: &mut [f32], max_frames: usize) -> usize {
        let frames = max_frames
            .min(out.len() / 2)
            .min(self.frame_count().saturating_sub(self.cursor));
        let start = self.cursor * 2;
        out[..frames * 2].copy_from_slice(&self.samples[start..start + frames * 2]);
        self.cursor += frames;
        frames
    }

    fn seek(&mut self, seconds: f64) {
        let frame = (seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        self.cursor = frame.min(self.frame_count());
    }

    fn total_length(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Decode every packet of the first audio track to interleaved f32
///
/// Returns (samples, sample_rate, channels).
fn decode_file(path: &Path) -> DecodeResult<(Vec<f32>, u32, usize)> {
    let file = File::open(path).map_err(|e| DecodeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::UnsupportedFormat("No audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::UnsupportedFormat("Unknown sample rate".to_string()))?;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                log::warn!("decode_file: error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("decode_file: skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => {
                log::warn!("decode_file: decoder error: {}", e);
                break;
            }
        };

        let buf = sample_buf.get_or_insert_with(|| {
            let spec = *decoded.spec();
            channels = spec.channels.count();
            SampleBuffer::new(decoded.capacity() as u64, spec)
        });
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    Ok((samples, sample_rate, channels.max(1)))
}

/// Convert interleaved audio with any channel count to interleaved stereo
///
/// Mono is duplicated to both sides; anything wider keeps its first two channels.
pub fn fold_to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Resample interleaved stereo from `from_rate` to `to_rate`
pub fn resample_stereo(samples: &[f32], from_rate: u32, to_rate: u32) -> DecodeResult<Vec<f32>> {
    let frames = samples.len() / 2;
    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 2)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let left: Vec<f32> = samples.iter().step_by(2).copied().collect();
    let right: Vec<f32> = samples.iter().skip(1).step_by(2).copied().collect();

    let expected_frames =
        (frames as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut out_left: Vec<f32> = Vec::with_capacity(expected_frames + delay + RESAMPLE_CHUNK);
    let mut out_right: Vec<f32> = Vec::with_capacity(expected_frames + delay + RESAMPLE_CHUNK);

    let mut pos = 0;
    while pos < frames {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(frames);
        let chunk = [left[pos..end].to_vec(), right[pos..end].to_vec()];
        let out = if end - pos == needed {
            resampler.process(&chunk, None)
        } else {
            resampler.process_partial(Some(&chunk), None)
        }
        .map_err(|e| DecodeError::Resample(e.to_string()))?;
        out_left.extend_from_slice(&out[0]);
        out_right.extend_from_slice(&out[1]);
        pos = end;
    }

    // Drain the resampler's delay line
    while out_left.len() < expected_frames + delay {
        let out = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        if out[0].is_empty() {
            break;
        }
        out_left.extend_from_slice(&out[0]);
        out_right.extend_from_slice(&out[1]);
    }

    let start = delay.min(out_left.len());
    let end = (start + expected_frames).min(out_left.len());
    Ok(out_left[start..end]
        .iter()
        .zip(&out_right[start..end])
        .flat_map(|(&l, &r)| [l, r])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let v = ((i as f32 * 0.05).sin() * 16000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_read_frames_and_end_of_stream() {
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let mut track = DecodedTrack::from_interleaved(samples, 10);
        assert_eq!(track.frame_count(), 10);
        assert!((track.total_length() - 1.0).abs() < 1e-12);

        let mut out = [0.0; 16];
        assert_eq!(track.read_frames(&mut out, 8), 8);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[15], 15.0);

        assert_eq!(track.read_frames(&mut out, 8), 2);
        assert_eq!(out[0], 16.0);
        assert_eq!(track.read_frames(&mut out, 8), 0);
    }

    #[test]
    fn test_seek_is_clamped() {
        let mut track = DecodedTrack::from_interleaved(vec![0.0; 200], 100);
        track.seek(0.5);
        assert_eq!(track.cursor(), 50);
        track.seek(-3.0);
        assert_eq!(track.cursor(), 0);
        track.seek(100.0);
        assert_eq!(track.cursor(), 100);
    }

    #[test]
    fn test_fold_to_stereo() {
        assert_eq!(fold_to_stereo(&[1.0, 2.0], 1), vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(
            fold_to_stereo(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3),
            vec![1.0, 2.0, 4.0, 5.0]
        );
    }

    #[test]
    fn test_resample_preserves_duration() {
        let frames = 44100;
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let v = (i as f32 * 0.01).sin();
                [v, v]
            })
            .collect();

        let out = resample_stereo(&samples, 44100, 48000).unwrap();
        assert_eq!(out.len() / 2, 48000);
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_open_wav_file_mono_to_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 48000, 1, 4800);

        let track = DecodedTrack::open(&path, 48000).unwrap();
        assert_eq!(track.frame_count(), 4800);
        assert_eq!(track.sample_rate(), 48000);
        assert!((track.total_length() - 0.1).abs() < 1e-9);
        assert_eq!(track.samples[2], track.samples[3]);
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let err = DecodedTrack::open(Path::new("/nonexistent/track.flac"), 48000).unwrap_err();
        assert!(matches!(err, DecodeError::Io { .. }));
    }
}
