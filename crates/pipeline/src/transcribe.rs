//! Incremental transcription stage.
//!
//! Runs for the lifetime of a session: consumes audio segments in emission
//! order, builds the running turn transcript, and forks an early partial
//! transcript for the filler task once the turn has been going a while.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use voicewire_core::{AudioSegment, Transcriber};

/// How far into a turn the partial transcript is forked to the filler task.
pub const EARLY_TRANSCRIPT_AFTER: Duration = Duration::from_secs(7);

/// Consecutive suffix repetitions that mean the caller went quiet and the
/// transcriber is hallucinating its own prompt back.
const MAX_TRANSCRIPT_REPETITIONS: u32 = 2;

/// Strip non-ASCII code points and the literal `MBC` marker.
///
/// Silence comes back from the transcriber as stray CJK subtitles credited
/// to the `MBC` broadcaster; neither belongs in an English transcript.
pub fn sanitize_transcript(text: &str) -> String {
    let ascii: String = text.chars().filter(|c| c.is_ascii()).collect();
    ascii.replace("MBC", "")
}

/// Run the transcription stage until the segment channel closes. Returns
/// the final transcript of the last open turn.
///
/// Forwarded segments carry their transcribed `text`; `SubmitPrompt`
/// markers pass through and reset the turn state. Failures on a single
/// segment are logged and the segment dropped.
pub async fn run_transcription_stage(
    transcriber: Arc<dyn Transcriber>,
    mut segments: mpsc::Receiver<AudioSegment>,
    texts: mpsc::Sender<AudioSegment>,
    early_transcript: mpsc::Sender<String>,
) -> String {
    tracing::info!("transcription stage started");

    let mut transcript = String::new();
    let mut repetitions = 0u32;
    let mut turn_started_at: Option<DateTime<Utc>> = None;
    let mut early_sent = false;

    while let Some(mut segment) = segments.recv().await {
        if turn_started_at.is_none() {
            turn_started_at = Some(segment.trace.created_at);
        }
        segment.trace.mark_received();

        if segment.is_submit() {
            tracing::info!("submit marker received, resetting turn state");
            transcript.clear();
            repetitions = 0;
            turn_started_at = None;
            early_sent = false;
            if texts.send(segment).await.is_err() {
                break;
            }
            continue;
        }

        let raw = match transcriber
            .transcribe(&segment.bytes, segment.format, &transcript)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(
                    %err,
                    chunk_byte_length = segment.bytes.len(),
                    "cannot transcribe segment, dropping it"
                );
                continue;
            }
        };

        let text = sanitize_transcript(&raw);
        if text != raw {
            tracing::info!(original = %raw, processed = %text, "sanitizer removed text");
        }

        if text.len() >= 3 && transcript.ends_with(&text) {
            repetitions += 1;
        } else {
            repetitions = 0;
        }
        if repetitions >= MAX_TRANSCRIPT_REPETITIONS {
            tracing::info!(
                repetitions,
                transcript = %text,
                "transcript stuck on repetition, submitting the turn"
            );
            repetitions = 0;
            if texts
                .send(AudioSegment::submit("transcribe_stage"))
                .await
                .is_err()
            {
                break;
            }
            continue;
        }
        if repetitions > 0 {
            tracing::info!(transcript = %text, "repeated previous words, skipping segment");
            continue;
        }

        transcript.push(' ');
        transcript.push_str(&text);

        segment.text = text;
        segment.trace.mark_processed("transcribe_stage");
        segment.trace.log();
        if texts.send(segment).await.is_err() {
            break;
        }

        if !early_sent {
            if let Some(started) = turn_started_at {
                let elapsed = (Utc::now() - started)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if elapsed > EARLY_TRANSCRIPT_AFTER {
                    early_sent = true;
                    match early_transcript.try_send(transcript.clone()) {
                        Ok(()) => tracing::info!("sent early transcript"),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!("early transcript channel full, dropping")
                        }
                        // No filler task on this session.
                        Err(mpsc::error::TrySendError::Closed(_)) => {}
                    }
                }
            }
        }
    }

    tracing::info!(final_transcript = %transcript, "transcription stage ended");
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration as StdDuration;
    use voicewire_core::{AudioFormat, ServiceError};

    /// Scripted transcriber: pops canned responses in order.
    struct ScriptedTranscriber {
        responses: Mutex<Vec<Result<String, ServiceError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedTranscriber {
        fn new(responses: Vec<Result<String, ServiceError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(
            &self,
            _audio: &[u8],
            _format: AudioFormat,
            prompt: &str,
        ) -> Result<String, ServiceError> {
            self.prompts.lock().push(prompt.to_string());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(String::new())
            } else {
                responses.remove(0)
            }
        }
    }

    fn input_segment() -> AudioSegment {
        AudioSegment::input(vec![0; 64], AudioFormat::Wav, StdDuration::ZERO, "test")
    }

    #[test]
    fn sanitize_strips_hallucinations() {
        // The spaces around the stripped CJK run are left as-is.
        assert_eq!(
            sanitize_transcript("MBC \u{b274}\u{c2a4} Yeah, tell me."),
            "  Yeah, tell me."
        );
        assert_eq!(sanitize_transcript("plain text"), "plain text");
    }

    #[tokio::test]
    async fn appends_and_forwards_with_prompt_bias() {
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![
            Ok("hello".to_string()),
            Ok("world".to_string()),
        ]));
        let (seg_tx, seg_rx) = mpsc::channel(8);
        let (text_tx, mut text_rx) = mpsc::channel(8);
        let (early_tx, _early_rx) = mpsc::channel(1);

        let stage = tokio::spawn(run_transcription_stage(
            transcriber.clone(),
            seg_rx,
            text_tx,
            early_tx,
        ));

        seg_tx.send(input_segment()).await.unwrap();
        seg_tx.send(input_segment()).await.unwrap();
        drop(seg_tx);

        let first = text_rx.recv().await.unwrap();
        assert_eq!(first.text, "hello");
        let second = text_rx.recv().await.unwrap();
        assert_eq!(second.text, "world");
        assert!(text_rx.recv().await.is_none(), "stage closes text channel");

        let final_transcript = stage.await.unwrap();
        assert_eq!(final_transcript, " hello world");

        // Second call was biased with the words accepted so far.
        let prompts = transcriber.prompts.lock().clone();
        assert_eq!(prompts, vec!["".to_string(), " hello".to_string()]);
    }

    #[tokio::test]
    async fn repetition_guard_submits_turn() {
        // "hello" accepted, then repeated twice: the second repetition
        // emits a synthetic submit.
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![
            Ok("hello".to_string()),
            Ok("hello".to_string()),
            Ok("hello".to_string()),
        ]));
        let (seg_tx, seg_rx) = mpsc::channel(8);
        let (text_tx, mut text_rx) = mpsc::channel(8);
        let (early_tx, _early_rx) = mpsc::channel(1);

        let stage = tokio::spawn(run_transcription_stage(
            transcriber,
            seg_rx,
            text_tx,
            early_tx,
        ));

        for _ in 0..3 {
            seg_tx.send(input_segment()).await.unwrap();
        }
        drop(seg_tx);

        let first = text_rx.recv().await.unwrap();
        assert_eq!(first.text, "hello");
        // Second segment is silently skipped; third triggers the submit.
        let submit = text_rx.recv().await.unwrap();
        assert!(submit.is_submit());
        assert!(text_rx.recv().await.is_none());

        stage.await.unwrap();
    }

    #[tokio::test]
    async fn submit_marker_resets_turn_state() {
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![
            Ok("first turn".to_string()),
            Ok("second turn".to_string()),
        ]));
        let (seg_tx, seg_rx) = mpsc::channel(8);
        let (text_tx, mut text_rx) = mpsc::channel(8);
        let (early_tx, _early_rx) = mpsc::channel(1);

        let stage = tokio::spawn(run_transcription_stage(
            transcriber.clone(),
            seg_rx,
            text_tx,
            early_tx,
        ));

        seg_tx.send(input_segment()).await.unwrap();
        seg_tx.send(AudioSegment::submit("test")).await.unwrap();
        seg_tx.send(input_segment()).await.unwrap();
        drop(seg_tx);

        assert_eq!(text_rx.recv().await.unwrap().text, "first turn");
        assert!(text_rx.recv().await.unwrap().is_submit());
        assert_eq!(text_rx.recv().await.unwrap().text, "second turn");

        let final_transcript = stage.await.unwrap();
        // Builder was reset at the marker.
        assert_eq!(final_transcript, " second turn");

        // And the second turn's prompt bias does not leak the first turn.
        let prompts = transcriber.prompts.lock().clone();
        assert_eq!(prompts[1], "");
    }

    #[tokio::test]
    async fn failed_segment_is_dropped_and_stage_continues() {
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![
            Err(ServiceError::Http("boom".to_string())),
            Ok("recovered".to_string()),
        ]));
        let (seg_tx, seg_rx) = mpsc::channel(8);
        let (text_tx, mut text_rx) = mpsc::channel(8);
        let (early_tx, _early_rx) = mpsc::channel(1);

        tokio::spawn(run_transcription_stage(
            transcriber,
            seg_rx,
            text_tx,
            early_tx,
        ));

        seg_tx.send(input_segment()).await.unwrap();
        seg_tx.send(input_segment()).await.unwrap();
        drop(seg_tx);

        assert_eq!(text_rx.recv().await.unwrap().text, "recovered");
        assert!(text_rx.recv().await.is_none());
    }
}
