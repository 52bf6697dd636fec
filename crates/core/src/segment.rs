//! Audio segment events flowing between pipeline stages.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// What a segment means to the stage receiving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Captured audio heading toward transcription.
    Input,
    /// Synthesized audio heading toward playback.
    Output,
    /// End-of-turn sentinel with an empty body.
    SubmitPrompt,
}

/// Container format of a segment's byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Flac,
    Mulaw,
}

impl AudioFormat {
    /// File extension, also used as the transcription upload hint.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Mulaw => "mulaw",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Observability metadata carried along with every segment.
///
/// Not part of correctness; it exists so the end-to-end latency of a chunk
/// can be read off the logs.
#[derive(Debug, Clone)]
pub struct Trace {
    pub created_at: DateTime<Utc>,
    pub creator: String,
    pub received_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processor: Option<String>,
}

impl Trace {
    pub fn new(creator: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            creator: creator.into(),
            received_at: None,
            processed_at: None,
            processor: None,
        }
    }

    pub fn mark_received(&mut self) {
        self.received_at = Some(Utc::now());
    }

    pub fn mark_processed(&mut self, processor: impl Into<String>) {
        self.processed_at = Some(Utc::now());
        self.processor = Some(processor.into());
    }

    pub fn log(&self) {
        let dur_to_process = self
            .processed_at
            .map(|at| (at - self.created_at).num_milliseconds());
        tracing::trace!(
            created_at = %self.created_at,
            creator = %self.creator,
            processor = self.processor.as_deref().unwrap_or(""),
            dur_to_process_ms = dur_to_process,
            "segment trace"
        );
    }
}

/// The unit of flow through every pipeline queue.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub kind: SegmentKind,
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
    /// Best-effort playback duration estimate.
    pub duration: Duration,
    /// Text representation, filled in by transcription or synthesis.
    pub text: String,
    pub trace: Trace,
}

impl AudioSegment {
    pub fn input(
        bytes: Vec<u8>,
        format: AudioFormat,
        duration: Duration,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            kind: SegmentKind::Input,
            bytes,
            format,
            duration,
            text: String::new(),
            trace: Trace::new(creator),
        }
    }

    pub fn output(
        bytes: Vec<u8>,
        format: AudioFormat,
        duration: Duration,
        text: impl Into<String>,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            kind: SegmentKind::Output,
            bytes,
            format,
            duration,
            text: text.into(),
            trace: Trace::new(creator),
        }
    }

    /// Empty-bodied end-of-turn sentinel.
    pub fn submit(creator: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::SubmitPrompt,
            bytes: Vec::new(),
            format: AudioFormat::Wav,
            duration: Duration::ZERO,
            text: String::new(),
            trace: Trace::new(creator),
        }
    }

    pub fn is_submit(&self) -> bool {
        self.kind == SegmentKind::SubmitPrompt
    }
}
