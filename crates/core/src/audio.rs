//! Canonical in-memory audio representation.

use std::time::Duration;

/// Decoded audio samples with their format metadata.
///
/// Samples are signed integers; 16-bit linear PCM is the canonical working
/// depth, while `source_bit_depth` records the container's native depth so
/// encoders can re-expand (FLAC carries 8/16/24-bit streams). Channels are
/// interleaved.
///
/// Invariant: `data.len()` is a multiple of `channels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    /// Interleaved samples.
    pub data: Vec<i32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo).
    pub channels: u16,
    /// Bit depth of the source material.
    pub source_bit_depth: u16,
}

impl PcmBuffer {
    pub fn new(data: Vec<i32>, sample_rate: u32, channels: u16, source_bit_depth: u16) -> Self {
        debug_assert!(channels >= 1, "channel count must be positive");
        debug_assert!(
            data.len() % channels as usize == 0,
            "sample count must align to the channel count"
        );
        Self {
            data,
            sample_rate,
            channels,
            source_bit_depth,
        }
    }

    /// Mono 16-bit buffer, the shape most of the pipeline works in.
    pub fn mono16(data: Vec<i32>, sample_rate: u32) -> Self {
        Self::new(data, sample_rate, 1, 16)
    }

    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.data.len() / self.channels as usize
    }

    /// Playback duration implied by the frame count and sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_respects_channels() {
        let buf = PcmBuffer::new(vec![0, 1, 2, 3], 8000, 2, 16);
        assert_eq!(buf.frame_count(), 2);
    }

    #[test]
    fn duration_from_rate() {
        let buf = PcmBuffer::mono16(vec![0; 16000], 16000);
        assert_eq!(buf.duration(), Duration::from_secs(1));
    }

    #[test]
    fn empty_buffer() {
        let buf = PcmBuffer::mono16(Vec::new(), 8000);
        assert!(buf.is_empty());
        assert_eq!(buf.duration(), Duration::ZERO);
    }
}
