//! End-of-turn detection over the telephony mu-law stream.
//!
//! One byte per sample at 8 kHz, silence companded to 0xFF. The state
//! machine tracks where speech began and where the current silence run
//! started; a long-enough silence closes the turn, a shorter pause after
//! enough speech flushes a continuation segment.

use std::ops::Range;

#[derive(Debug, Clone)]
pub struct MulawVadConfig {
    pub sample_rate: u32,
    /// Companded silence value.
    pub silence_byte: u8,
    /// Segments shorter than this are dropped (transcriber minimum).
    pub min_segment_ms: u32,
    /// Speech length required before a mid-turn flush.
    pub continuation_speech_ms: u32,
    /// Trailing silence required for a mid-turn flush.
    pub continuation_silence_ms: u32,
    /// Silence run that ends the turn.
    pub end_of_turn_silence_ms: u32,
}

impl Default for MulawVadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            silence_byte: 0xFF,
            min_segment_ms: 100,
            continuation_speech_ms: 2000,
            continuation_silence_ms: 100,
            end_of_turn_silence_ms: 5000,
        }
    }
}

impl MulawVadConfig {
    fn samples_for_ms(&self, ms: u32) -> usize {
        (ms as u64 * self.sample_rate as u64 / 1000) as usize
    }
}

/// What the segmenter asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MulawVadEvent {
    /// Emit this byte range of the inbound buffer as a transcribable
    /// segment.
    Segment(Range<usize>),
    /// The caller stopped talking; submit the turn.
    EndOfTurn,
}

/// Cursor state machine over the growing inbound mu-law buffer.
///
/// Invariant: `speech_start <= silence_start <= cursor` whenever
/// `speech_start >= 0`; `silence_start == -1` means "currently in speech".
#[derive(Debug)]
pub struct MulawVad {
    config: MulawVadConfig,
    speech_start: isize,
    silence_start: isize,
    cursor: usize,
}

impl MulawVad {
    pub fn new(config: MulawVadConfig) -> Self {
        Self {
            config,
            speech_start: -1,
            silence_start: -1,
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Walk the bytes appended since the last call and collect emissions.
    pub fn advance(&mut self, buffer: &[u8]) -> Vec<MulawVadEvent> {
        let min_segment = self.config.samples_for_ms(self.config.min_segment_ms);
        let continuation_speech = self.config.samples_for_ms(self.config.continuation_speech_ms);
        let continuation_silence = self
            .config
            .samples_for_ms(self.config.continuation_silence_ms);
        let end_of_turn = self.config.samples_for_ms(self.config.end_of_turn_silence_ms);

        let mut events = Vec::new();
        while self.cursor < buffer.len() {
            let i = self.cursor;
            self.cursor += 1;

            if buffer[i] != self.config.silence_byte {
                if self.speech_start < 0 {
                    self.speech_start = i as isize;
                }
                self.silence_start = -1;
                continue;
            }

            // Silence byte. Only meaningful once speech has started.
            if self.speech_start < 0 {
                continue;
            }
            if self.silence_start < 0 {
                self.silence_start = i as isize;
            }

            let speech_start = self.speech_start as usize;
            let silence_start = self.silence_start as usize;
            let silence_run = i + 1 - silence_start;
            let speech_len = silence_start - speech_start;

            if silence_run >= end_of_turn {
                if speech_len >= min_segment {
                    events.push(MulawVadEvent::Segment(speech_start..silence_start));
                } else if speech_len > 0 {
                    tracing::debug!(speech_len, "dropping sub-minimum segment at end of turn");
                }
                events.push(MulawVadEvent::EndOfTurn);
                self.speech_start = -1;
                self.silence_start = -1;
            } else if speech_len >= continuation_speech && silence_run >= continuation_silence {
                events.push(MulawVadEvent::Segment(speech_start..silence_start));
                // The pause may yet grow into an end of turn; keep counting
                // the same silence run.
                self.speech_start = self.silence_start;
            }
        }
        events
    }

    /// Stream ended: flush whatever speech is still open.
    pub fn finish(&mut self, buffer_len: usize) -> Option<Range<usize>> {
        if self.speech_start < 0 {
            return None;
        }
        let start = self.speech_start as usize;
        let end = if self.silence_start >= 0 {
            self.silence_start as usize
        } else {
            buffer_len
        };
        self.speech_start = -1;
        self.silence_start = -1;

        let min_segment = self.config.samples_for_ms(self.config.min_segment_ms);
        if end.saturating_sub(start) < min_segment {
            return None;
        }
        Some(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEECH: u8 = 0x7B;
    const SILENCE: u8 = 0xFF;

    fn run(vad: &mut MulawVad, buffer: &[u8]) -> Vec<MulawVadEvent> {
        vad.advance(buffer)
    }

    #[test]
    fn pure_silence_emits_nothing() {
        let mut vad = MulawVad::new(MulawVadConfig::default());
        let buffer = vec![SILENCE; 80_000]; // ten seconds
        assert!(run(&mut vad, &buffer).is_empty());
        assert!(vad.finish(buffer.len()).is_none());
    }

    #[test]
    fn speech_then_long_silence_is_segment_plus_end_of_turn() {
        // Three seconds of speech, five seconds of silence.
        let mut buffer = vec![SPEECH; 24_000];
        buffer.extend(vec![SILENCE; 40_000]);

        let mut vad = MulawVad::new(MulawVadConfig::default());
        let events = run(&mut vad, &buffer);

        assert_eq!(
            events,
            vec![
                MulawVadEvent::Segment(0..24_000),
                MulawVadEvent::EndOfTurn,
            ]
        );
    }

    #[test]
    fn one_end_of_turn_per_silence_episode() {
        let mut buffer = vec![SPEECH; 24_000];
        buffer.extend(vec![SILENCE; 200_000]); // 25 s of silence

        let mut vad = MulawVad::new(MulawVadConfig::default());
        let events = run(&mut vad, &buffer);
        let submits = events
            .iter()
            .filter(|e| **e == MulawVadEvent::EndOfTurn)
            .count();
        assert_eq!(submits, 1);
    }

    #[test]
    fn long_speech_flushes_continuation_segments() {
        // 2.5 s speech, 200 ms pause, 2.5 s speech, 5 s silence.
        let mut buffer = vec![SPEECH; 20_000];
        buffer.extend(vec![SILENCE; 1_600]);
        buffer.extend(vec![SPEECH; 20_000]);
        buffer.extend(vec![SILENCE; 40_000]);

        let mut vad = MulawVad::new(MulawVadConfig::default());
        let events = run(&mut vad, &buffer);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], MulawVadEvent::Segment(0..20_000));
        // Second segment starts where the first pause began and runs to the
        // final silence.
        assert_eq!(events[1], MulawVadEvent::Segment(20_000..41_600));
        assert_eq!(events[2], MulawVadEvent::EndOfTurn);
    }

    #[test]
    fn short_blip_is_dropped_but_turn_still_ends() {
        // 50 ms of speech then 5 s of silence: below the transcriber
        // minimum, but the caller clearly stopped.
        let mut buffer = vec![SPEECH; 400];
        buffer.extend(vec![SILENCE; 40_000]);

        let mut vad = MulawVad::new(MulawVadConfig::default());
        let events = run(&mut vad, &buffer);
        assert_eq!(events, vec![MulawVadEvent::EndOfTurn]);
    }

    #[test]
    fn incremental_arrival_matches_batch() {
        let mut buffer = vec![SPEECH; 24_000];
        buffer.extend(vec![SILENCE; 40_000]);

        let mut batch = MulawVad::new(MulawVadConfig::default());
        let batch_events = batch.advance(&buffer);

        let mut incremental = MulawVad::new(MulawVadConfig::default());
        let mut incremental_events = Vec::new();
        // 20 ms frames, the telephony media cadence.
        let mut len = 0;
        while len < buffer.len() {
            len = (len + 160).min(buffer.len());
            incremental_events.extend(incremental.advance(&buffer[..len]));
        }

        assert_eq!(batch_events, incremental_events);
    }

    #[test]
    fn finish_flushes_open_speech() {
        let buffer = vec![SPEECH; 8_000]; // one second, never pausing
        let mut vad = MulawVad::new(MulawVadConfig::default());
        assert!(vad.advance(&buffer).is_empty());
        assert_eq!(vad.finish(buffer.len()), Some(0..8_000));
        // Idempotent.
        assert!(vad.finish(buffer.len()).is_none());
    }
}
