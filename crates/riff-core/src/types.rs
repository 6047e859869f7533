//! Sample and buffer types used by every stage

use std::ops::{Index, IndexMut};

/// Engine rate until a device reports its own (48kHz)
///
/// Files are resampled to the rate the engine runs at.
pub const SAMPLE_RATE: u32 = 48000;

pub type Sample = f32;

/// One stereo frame
///
/// `#[repr(C)]` keeps the layout `[left, right]`, so a `&[StereoSample]`
/// can be viewed as interleaved `&[f32]` without copying. The stretcher,
/// the decoder and the device callback all work on that interleaved form.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// (L + R) / 2
    #[inline]
    pub fn mono_mix(&self) -> Sample {
        (self.left + self.right) * 0.5
    }

    /// Larger absolute value of the two channels
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

/// Stereo frames with a fixed allocation
///
/// Allocate once with [`with_capacity`](Self::with_capacity), then change
/// the working length per block with
/// [`set_len_from_capacity`](Self::set_len_from_capacity); that never
/// reallocates while the length stays within capacity.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    frames: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Empty buffer with room for `capacity` frames
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
        }
    }

    /// `len` silent frames
    pub fn silence(len: usize) -> Self {
        Self {
            frames: vec![StereoSample::silence(); len],
        }
    }

    /// Build from `[L, R, L, R, ...]`; an odd trailing value is dropped
    pub fn from_interleaved(interleaved: &[Sample]) -> Self {
        Self {
            frames: interleaved
                .chunks_exact(2)
                .map(|lr| StereoSample::new(lr[0], lr[1]))
                .collect(),
        }
    }

    /// Frames in the working length
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.frames.capacity()
    }

    /// Resize the working length inside the reserved allocation
    ///
    /// Frames exposed by growing are silent. Growing past capacity would
    /// allocate, which the audio thread must never do.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        debug_assert!(
            new_len <= self.frames.capacity(),
            "StereoBuffer grown past its capacity ({} > {})",
            new_len,
            self.frames.capacity()
        );
        if new_len > self.frames.len() {
            self.frames.resize(new_len, StereoSample::silence());
        } else {
            self.frames.truncate(new_len);
        }
    }

    pub fn fill_silence(&mut self) {
        self.frames.fill(StereoSample::silence());
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.frames
    }

    /// Interleaved view `[L, R, L, R, ...]`
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.frames)
    }

    #[inline]
    pub fn as_interleaved_mut(&mut self) -> &mut [Sample] {
        bytemuck::cast_slice_mut(&mut self.frames)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StereoSample> {
        self.frames.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, StereoSample> {
        self.frames.iter_mut()
    }

    /// Largest absolute sample across both channels
    pub fn peak(&self) -> Sample {
        self.frames.iter().fold(0.0, |peak, s| peak.max(s.peak()))
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &StereoSample {
        &self.frames[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut StereoSample {
        &mut self.frames[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_sample_mix_and_peak() {
        let s = StereoSample::new(1.0, -3.0);
        assert_eq!(s.mono_mix(), -1.0);
        assert_eq!(s.peak(), 3.0);
        assert_eq!(StereoSample::silence(), StereoSample::new(0.0, 0.0));
    }

    #[test]
    fn test_stereo_buffer_from_interleaved() {
        let interleaved = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let buffer = StereoBuffer::from_interleaved(&interleaved);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer[0], StereoSample::new(1.0, 2.0));
        assert_eq!(buffer[2].right, 6.0);
        assert_eq!(buffer.as_interleaved(), &interleaved[..6]);
        assert_eq!(buffer.peak(), 6.0);
    }

    #[test]
    fn test_set_len_from_capacity_keeps_allocation() {
        let mut buffer = StereoBuffer::with_capacity(1024);
        let capacity = buffer.capacity();

        buffer.set_len_from_capacity(512);
        assert_eq!(buffer.len(), 512);
        assert!(buffer.iter().all(|s| *s == StereoSample::silence()));

        buffer[3] = StereoSample::new(0.25, 0.25);
        buffer.set_len_from_capacity(4);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer[3].left, 0.25);
        assert_eq!(buffer.capacity(), capacity);
    }
}
