//! Silence detection over raw 16-bit PCM capture bytes.
//!
//! Works on byte magnitudes: quiet capture keeps both bytes of each sample
//! near zero, so a sliding window whose mean falls under the threshold marks
//! a pause. Empirically calibrated for a 16-bit 44.1 kHz microphone.

use std::ops::Range;

/// Parameters of the PCM silence scan.
#[derive(Debug, Clone)]
pub struct PcmVadConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Sliding window span, in milliseconds.
    pub window_ms: u32,
    /// A window whose byte-magnitude mean is below this counts as silence.
    pub silence_threshold: f64,
    /// Minimum run-up from the cursor before a cut is allowed.
    pub min_speech_ms: u32,
    /// Unflushed tail size that triggers a scan.
    pub flush_after_ms: u32,
    /// Segments shorter than this are dropped (transcriber minimum).
    pub min_segment_ms: u32,
}

impl PcmVadConfig {
    /// Profile for the local microphone capture.
    pub fn local_mic(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            window_ms: 20,
            silence_threshold: 110.0,
            min_speech_ms: 250,
            flush_after_ms: 2000,
            min_segment_ms: 100,
        }
    }

    /// Window length in buffer positions.
    fn window_len(&self) -> usize {
        (self.window_ms as u64 * self.sample_rate as u64 * self.channels as u64 / 1000) as usize
    }

    /// Byte length of `ms` milliseconds of 16-bit capture.
    fn bytes_for_ms(&self, ms: u32) -> usize {
        (ms as u64 * self.sample_rate as u64 * self.channels as u64 * 2 / 1000) as usize
    }
}

/// Cursor state of the PCM segmenter.
///
/// The owner appends capture bytes to its buffer and calls [`PcmVad::scan`]
/// with the whole buffer; the segmenter tracks how far it has flushed and
/// returns byte ranges worth transcribing.
#[derive(Debug)]
pub struct PcmVad {
    config: PcmVadConfig,
    cursor: usize,
}

impl PcmVad {
    pub fn new(config: PcmVadConfig) -> Self {
        Self { config, cursor: 0 }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Inspect the unflushed tail of `buffer`. Returns a byte range to emit
    /// as a segment, or `None` when there is nothing (yet) to emit. The
    /// cursor may advance without an emission when the flushed span holds no
    /// speech; callers simply keep appending and re-scanning.
    pub fn scan(&mut self, buffer: &[u8], is_end: bool) -> Option<Range<usize>> {
        let unflushed = buffer.len().saturating_sub(self.cursor);
        if !is_end && unflushed <= self.config.bytes_for_ms(self.config.flush_after_ms) {
            return None;
        }
        if unflushed == 0 {
            return None;
        }

        let window = self.config.window_len();
        let tail = &buffer[self.cursor..];

        let cut = if is_end {
            buffer.len()
        } else {
            // Latest quiet window in the tail marks the cut candidate; the
            // quiet run usually ends where new voice comes in, so cut at the
            // window midpoint.
            let candidate = find_last_window_below(tail, window, self.config.silence_threshold)?;
            if candidate < self.config.bytes_for_ms(self.config.min_speech_ms) {
                tracing::trace!(candidate, "not enough run-up before the quiet window");
                return None;
            }
            let mut cut = self.cursor + candidate - window / 2;
            if cut % 2 == 1 {
                cut -= 1;
            }
            if cut >= buffer.len() {
                return None;
            }
            cut
        };

        let start = self.cursor;
        self.cursor = cut;

        // Trim the flushed span to its speech extent; a span of pure
        // silence advances the cursor and emits nothing.
        let slice = &buffer[start..cut];
        let (speech_start, speech_end) =
            speech_extent(slice, window, self.config.silence_threshold)?;

        let mut lo = start + speech_start;
        let mut hi = start + speech_end;
        if lo % 2 == 1 {
            lo -= 1;
        }
        if hi % 2 == 1 {
            hi += 1;
        }
        let hi = hi.min(cut);

        if hi - lo < self.config.bytes_for_ms(self.config.min_segment_ms) {
            tracing::trace!(len = hi - lo, "dropping sub-minimum segment");
            return None;
        }

        tracing::trace!(start_byte = lo, end_byte = hi, "flushing capture slice");
        Some(lo..hi)
    }
}

/// Last position `i` such that the window `data[i-window..i]` has a
/// byte-magnitude mean below `threshold`. Rolling sum, O(n).
fn find_last_window_below(data: &[u8], window: usize, threshold: f64) -> Option<usize> {
    let n = data.len();
    if window == 0 || n < window {
        return None;
    }

    let mut last = None;
    let mut sum: u64 = data[..window].iter().map(|&b| b as u64).sum();
    for i in window..n {
        if (sum as f64) < threshold * window as f64 {
            last = Some(i);
        }
        sum -= data[i - window] as u64;
        sum += data[i] as u64;
    }
    // The final window, ending exactly at the buffer edge.
    if (sum as f64) < threshold * window as f64 {
        last = Some(n);
    }
    last
}

/// First and last positions of above-threshold windows in `slice`, each
/// widened by half a window; `None` when the slice is entirely quiet.
fn speech_extent(slice: &[u8], window: usize, threshold: f64) -> Option<(usize, usize)> {
    let n = slice.len();
    if window == 0 || n < window {
        return None;
    }

    let limit = threshold * window as f64;
    let mut first = None;
    let mut last = None;
    let mut sum: u64 = slice[..window].iter().map(|&b| b as u64).sum();
    let mut start = 0usize;
    loop {
        if sum as f64 >= limit {
            if first.is_none() {
                first = Some(start);
            }
            last = Some(start + window);
        }
        if start + window >= n {
            break;
        }
        sum -= slice[start] as u64;
        sum += slice[start + window] as u64;
        start += 1;
    }

    let first = first?;
    let last = last?;
    Some((
        first.saturating_sub(window / 2),
        (last + window / 2).min(n),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44_100;

    fn config() -> PcmVadConfig {
        PcmVadConfig::local_mic(RATE, 1)
    }

    /// 16-bit LE bytes of `seconds` of silence.
    fn silence(seconds: f64) -> Vec<u8> {
        vec![0u8; (seconds * RATE as f64) as usize * 2]
    }

    /// 16-bit LE bytes of `seconds` of a 1 kHz sine at amplitude 16000.
    fn speech(seconds: f64) -> Vec<u8> {
        let count = (seconds * RATE as f64) as usize;
        let mut bytes = Vec::with_capacity(count * 2);
        for i in 0..count {
            let phase = 2.0 * std::f64::consts::PI * 1000.0 * i as f64 / RATE as f64;
            let sample = (phase.sin() * 16000.0) as i16;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn pure_silence_emits_nothing() {
        let mut vad = PcmVad::new(config());
        let buffer = silence(6.0);

        let mut emitted = Vec::new();
        // Streaming arrival in ~0.5 s chunks.
        let chunk = RATE as usize; // 0.5 s of bytes
        let mut len = 0;
        while len < buffer.len() {
            len = (len + chunk).min(buffer.len());
            if let Some(range) = vad.scan(&buffer[..len], false) {
                emitted.push(range);
            }
        }
        if let Some(range) = vad.scan(&buffer, true) {
            emitted.push(range);
        }
        assert!(emitted.is_empty(), "silence produced segments: {emitted:?}");
    }

    #[test]
    fn silence_speech_silence_yields_one_speech_segment() {
        let mut buffer = silence(1.0);
        let speech_begin = buffer.len();
        buffer.extend(speech(2.0));
        let speech_end = buffer.len();
        buffer.extend(silence(1.0));

        let mut vad = PcmVad::new(config());
        let mut emitted = Vec::new();
        let chunk = RATE as usize / 2; // 0.25 s of bytes
        let mut len = 0;
        while len < buffer.len() {
            len = (len + chunk).min(buffer.len());
            if let Some(range) = vad.scan(&buffer[..len], false) {
                emitted.push(range);
            }
        }
        if let Some(range) = vad.scan(&buffer, true) {
            emitted.push(range);
        }

        assert_eq!(emitted.len(), 1, "expected one segment, got {emitted:?}");
        let seg = emitted[0].clone();

        // Payload covers the middle two seconds, give or take a window.
        let window = 2 * (RATE as usize * 20 / 1000);
        assert!(
            seg.start.abs_diff(speech_begin) <= window,
            "segment start {} vs speech start {}",
            seg.start,
            speech_begin
        );
        assert!(
            seg.end.abs_diff(speech_end) <= window,
            "segment end {} vs speech end {}",
            seg.end,
            speech_end
        );
    }

    #[test]
    fn segments_do_not_overlap_and_stay_ordered() {
        let mut buffer = Vec::new();
        for _ in 0..3 {
            buffer.extend(speech(1.5));
            buffer.extend(silence(1.0));
        }

        let mut vad = PcmVad::new(config());
        let mut emitted: Vec<Range<usize>> = Vec::new();
        let chunk = RATE as usize / 2;
        let mut len = 0;
        while len < buffer.len() {
            len = (len + chunk).min(buffer.len());
            if let Some(range) = vad.scan(&buffer[..len], false) {
                emitted.push(range);
            }
        }
        if let Some(range) = vad.scan(&buffer, true) {
            emitted.push(range);
        }

        assert!(!emitted.is_empty());
        for pair in emitted.windows(2) {
            assert!(pair[0].end <= pair[1].start, "segments overlap: {emitted:?}");
        }
        for seg in &emitted {
            // Every emitted segment is at least the transcriber minimum.
            assert!(seg.end - seg.start >= (RATE as usize * 2) / 10);
        }
    }

    #[test]
    fn waits_for_more_data_without_a_quiet_window() {
        // Continuous speech longer than the flush threshold: no cut yet.
        let buffer = speech(3.0);
        let mut vad = PcmVad::new(config());
        assert!(vad.scan(&buffer, false).is_none());
        // End of stream flushes the lot.
        let range = vad.scan(&buffer, true).expect("end flush");
        assert!(range.end - range.start > buffer.len() / 2);
    }
}
