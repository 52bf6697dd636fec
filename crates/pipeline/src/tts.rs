//! TTS segmentation stage.
//!
//! Buffers chat tokens until a prosodic boundary, synthesizes the buffer,
//! and pushes the audio downstream. Triggering on punctuation keeps the
//! first-byte-to-play latency low without splitting mid-phrase.

use std::sync::Arc;

use tokio::sync::mpsc;

use voicewire_core::{AudioSegment, Synthesizer};

use crate::filler::FillerGate;

/// Below this many buffered characters synthesis is not worth a round trip
/// (it would speak fragments like "1,").
pub const MIN_TTS_BUFFER_CHARS: usize = 3;

/// Does the buffer end on a prosodic boundary?
pub fn ends_with_punctuation(s: &str) -> bool {
    matches!(
        s.chars().last(),
        Some(',' | '.' | '?' | '!' | ';' | ':')
    )
}

/// Run the TTS segmenter until the token channel closes, flushing any
/// residual buffer on the way out.
///
/// `gate`, when present, is marked on every emission so the filler task
/// knows real reply audio exists.
pub async fn run_tts_stage(
    synthesizer: Arc<dyn Synthesizer>,
    mut tokens: mpsc::Receiver<String>,
    audio_out: mpsc::Sender<AudioSegment>,
    speed: f32,
    gate: Option<FillerGate>,
) {
    tracing::info!("tts segmenter started");
    let mut buffer = String::new();
    let mut first_trigger = true;

    loop {
        let token = tokens.recv().await;
        let open = token.is_some();
        if let Some(token) = &token {
            buffer.push_str(token);
        }

        let boundary = buffer.len() > MIN_TTS_BUFFER_CHARS && ends_with_punctuation(&buffer);
        if boundary || (!open && !buffer.is_empty()) {
            if first_trigger {
                tracing::debug!(buffer = %buffer, "first synthesis triggered");
                first_trigger = false;
            }
            match synthesizer.create_speech(&buffer, speed).await {
                Ok(segment) => {
                    // Mark before enqueueing so a racing filler can never
                    // slot in behind real reply audio.
                    if let Some(gate) = &gate {
                        gate.mark_reply_started();
                    }
                    if audio_out.send(segment).await.is_err() {
                        tracing::info!("audio channel closed, tts segmenter stopping");
                        return;
                    }
                }
                Err(err) => {
                    tracing::error!(%err, buffer = %buffer, "synthesis failed, dropping buffer");
                }
            }
            buffer.clear();
        }

        if !open {
            tracing::info!("tts segmenter ended");
            return;
        }
    }
}
