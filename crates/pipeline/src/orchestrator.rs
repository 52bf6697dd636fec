//! Session orchestration: queue wiring, playback, barge-in.
//!
//! Queue lifecycle rule: the capture → segmenter → transcriber channels
//! live for the whole session; everything downstream of a submitted prompt
//! (`chat_tokens`, `tts_audio`) is created fresh each turn so no stale
//! reply audio leaks across turns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use voicewire_codec::{decode_flac, decode_mp3, decode_wav};
use voicewire_core::{
    debug_dump, AudioFormat, AudioSegment, ChatAgent, Conversation, ModelQuality, PlaybackSink,
    Role, SegmentKind,
};

/// Chat token queue size. Generous; tokens are tiny and the model bursts.
pub const CHAT_TOKEN_QUEUE: usize = 256;

/// TTS output queue size. Small on purpose: synthesis should not run far
/// ahead of what the caller is still willing to listen to.
pub const TTS_AUDIO_QUEUE: usize = 3;

/// Queue feeding the player. Capacity one, so the playback device applies
/// backpressure all the way up the reply path.
pub const PLAYBACK_QUEUE: usize = 1;

/// Prompts shorter than this are noise ("Bye-bye", a stray "You") and are
/// not worth a completion round trip.
pub const MIN_PROMPT_CHARS: usize = 15;

/// What a finished playback loop reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Concatenated text of every segment actually handed to the player.
    pub spoken_text: String,
    /// Whether the turn ended by barge-in rather than by running dry.
    pub interrupted: bool,
}

/// Resolve when the interrupt fires. Sender dropping counts as an
/// interrupt: a vanished controller must not leave the loop running.
async fn interrupted(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|fired| *fired).await;
}

/// Drain the turn's TTS audio into the player queue until the reply is
/// exhausted or the interrupt fires.
///
/// Both the receive and the forward are raced against the interrupt; once
/// it fires, not a single further segment reaches the player.
pub async fn playback_loop(
    mut tts_audio: mpsc::Receiver<AudioSegment>,
    audio_to_play: mpsc::Sender<AudioSegment>,
    mut interrupt: watch::Receiver<bool>,
) -> TurnOutcome {
    tracing::info!("playback loop started");
    let mut spoken_text = String::new();

    loop {
        tokio::select! {
            segment = tts_audio.recv() => {
                let Some(segment) = segment else {
                    tracing::info!("tts audio exhausted, playback loop done");
                    return TurnOutcome { spoken_text, interrupted: false };
                };
                let text = segment.text.clone();
                tokio::select! {
                    sent = audio_to_play.send(segment) => {
                        if sent.is_err() {
                            tracing::warn!("player queue closed mid-turn");
                            return TurnOutcome { spoken_text, interrupted: false };
                        }
                        spoken_text.push_str(&text);
                    }
                    _ = interrupted(&mut interrupt) => {
                        tracing::info!("interrupt while handing segment to player");
                        return TurnOutcome { spoken_text, interrupted: true };
                    }
                }
            }
            _ = interrupted(&mut interrupt) => {
                tracing::info!("interrupt received, playback loop done");
                return TurnOutcome { spoken_text, interrupted: true };
            }
        }
    }
}

/// Session-long player task: decode each queued segment and play it to the
/// sink, waiting for completion when the sink reports any.
pub async fn run_player(
    sink: Arc<dyn PlaybackSink>,
    mut audio_to_play: mpsc::Receiver<AudioSegment>,
    dump_dir: Option<PathBuf>,
) {
    tracing::info!("player started");
    let mut chunk_index = 0u32;

    while let Some(segment) = audio_to_play.recv().await {
        chunk_index += 1;
        let started = Instant::now();

        if let Some(dir) = &dump_dir {
            debug_dump(
                dir.join(format!("reply-{chunk_index}.{}", segment.format)),
                &segment.bytes,
            );
        }

        let decoded = match segment.format {
            AudioFormat::Mp3 => decode_mp3(&segment.bytes),
            AudioFormat::Flac => decode_flac(&segment.bytes),
            AudioFormat::Wav => decode_wav(&segment.bytes),
            AudioFormat::Mulaw => {
                tracing::error!("raw mu-law reached the player, skipping chunk");
                continue;
            }
        };
        let buffer = match decoded {
            Ok(buffer) => buffer,
            Err(err) => {
                tracing::error!(%err, format = %segment.format, "decode failed, skipping chunk");
                continue;
            }
        };

        tracing::debug!(
            sample_rate = buffer.sample_rate,
            frames = buffer.frame_count(),
            "player starting chunk"
        );
        match sink.play(buffer).await {
            Ok(Some(done)) => done.wait().await,
            Ok(None) => {}
            Err(err) => tracing::error!(%err, "cannot play decoded chunk"),
        }
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "player chunk done");
    }
    tracing::info!("player finished");
}

/// Drain transcribed text chunks into one prompt, stopping at the submit
/// marker or channel close. The local mode's step 4.
pub async fn collect_prompt(texts: &mut mpsc::Receiver<AudioSegment>) -> String {
    let mut prompt = String::new();
    while let Some(chunk) = texts.recv().await {
        if chunk.is_submit() {
            break;
        }
        prompt.push_str(&chunk.text);
        prompt.push(' ');
    }
    prompt
}

/// Session-long turn loop for sources that signal end-of-turn in-band
/// (telephony). Accumulates transcribed text; each submit marker snapshots
/// the conversation and streams a reply into the shared token channel.
pub async fn run_submit_loop(
    agent: Arc<dyn ChatAgent>,
    mut texts: mpsc::Receiver<AudioSegment>,
    chat_tokens: mpsc::Sender<String>,
    mut conversation: Conversation,
) {
    let mut pending = String::new();

    while let Some(chunk) = texts.recv().await {
        if chunk.kind != SegmentKind::SubmitPrompt {
            pending.push_str(&chunk.text);
            pending.push(' ');
            continue;
        }

        // Sustained silence can spam submit markers; only real prompts go
        // to the agent.
        let prompt = std::mem::take(&mut pending);
        if prompt.trim().len() < MIN_PROMPT_CHARS {
            tracing::warn!(len = prompt.trim().len(), "prompt too short, skipping turn");
            continue;
        }

        conversation.add(Role::User, prompt);
        let snapshot = conversation.clone();

        let (turn_tx, mut turn_rx) = mpsc::channel(CHAT_TOKEN_QUEUE);
        let agent = agent.clone();
        tokio::spawn(async move {
            if let Err(err) = agent
                .run_prompt(ModelQuality::SlowerSmarter, snapshot, turn_tx)
                .await
            {
                tracing::error!(%err, "chat stream failed for telephony turn");
            }
        });

        // Forward the turn's tokens into the session-long channel so the
        // running TTS segmenter picks them up.
        let out = chat_tokens.clone();
        tokio::spawn(async move {
            while let Some(token) = turn_rx.recv().await {
                if out.send(token).await.is_err() {
                    break;
                }
            }
        });
    }
    tracing::info!("submit loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use voicewire_core::{DeviceError, PcmBuffer, PlaybackDone, ServiceError};

    fn output_segment(text: &str) -> AudioSegment {
        AudioSegment::output(
            vec![0u8; 4],
            AudioFormat::Mp3,
            Duration::ZERO,
            text,
            "test",
        )
    }

    #[tokio::test]
    async fn playback_loop_accumulates_spoken_text() {
        let (tts_tx, tts_rx) = mpsc::channel(4);
        let (play_tx, mut play_rx) = mpsc::channel(4);
        let (_interrupt_tx, interrupt_rx) = watch::channel(false);

        // Consume the player side so sends complete.
        tokio::spawn(async move { while play_rx.recv().await.is_some() {} });

        tts_tx.send(output_segment("Hello ")).await.unwrap();
        tts_tx.send(output_segment("world.")).await.unwrap();
        drop(tts_tx);

        let outcome = playback_loop(tts_rx, play_tx, interrupt_rx).await;
        assert_eq!(outcome.spoken_text, "Hello world.");
        assert!(!outcome.interrupted);
    }

    #[tokio::test]
    async fn barge_in_stops_forwarding() {
        // Player queue of capacity 1 and nobody consuming: the first
        // segment is queued, the second send blocks, then the interrupt
        // fires.
        let (tts_tx, tts_rx) = mpsc::channel(4);
        let (play_tx, play_rx) = mpsc::channel(PLAYBACK_QUEUE);
        let (interrupt_tx, interrupt_rx) = watch::channel(false);

        tts_tx.send(output_segment("one ")).await.unwrap();
        tts_tx.send(output_segment("two ")).await.unwrap();
        tts_tx.send(output_segment("three")).await.unwrap();

        let handle = tokio::spawn(playback_loop(tts_rx, play_tx, interrupt_rx));

        // Give the loop a moment to queue the first segment and block on
        // the second.
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupt_tx.send(true).unwrap();

        let outcome = handle.await.unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.spoken_text, "one ");

        // Exactly one segment ever reached the player queue.
        let mut play_rx = play_rx;
        assert_eq!(play_rx.recv().await.unwrap().text, "one ");
        assert!(play_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn interrupt_sender_drop_counts_as_barge_in() {
        let (_tts_tx, tts_rx) = mpsc::channel::<AudioSegment>(1);
        let (play_tx, _play_rx) = mpsc::channel(1);
        let (interrupt_tx, interrupt_rx) = watch::channel(false);

        let handle = tokio::spawn(playback_loop(tts_rx, play_tx, interrupt_rx));
        drop(interrupt_tx);

        let outcome = handle.await.unwrap();
        assert!(outcome.interrupted);
    }

    /// Playback sink that records how many chunks it played.
    #[derive(Default)]
    struct CountingSink {
        played: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl PlaybackSink for CountingSink {
        async fn play(&self, audio: PcmBuffer) -> Result<Option<PlaybackDone>, DeviceError> {
            self.played.lock().push(audio.data.len());
            Ok(None)
        }

        async fn stop(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn player_skips_undecodable_chunks() {
        let sink = Arc::new(CountingSink::default());
        let (tx, rx) = mpsc::channel(4);

        // Garbage mp3 followed by a valid wav.
        tx.send(output_segment("bad mp3")).await.unwrap();
        let wav = voicewire_codec::encode_wav_simple(&PcmBuffer::mono16(vec![1, 2, 3, 4], 8000))
            .unwrap();
        let good = AudioSegment::output(wav, AudioFormat::Wav, Duration::ZERO, "ok", "test");
        tx.send(good).await.unwrap();
        drop(tx);

        run_player(sink.clone(), rx, None).await;
        assert_eq!(sink.played.lock().clone(), vec![4]);
    }

    #[tokio::test]
    async fn collect_prompt_stops_at_submit() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut hello = AudioSegment::input(Vec::new(), AudioFormat::Wav, Duration::ZERO, "test");
        hello.text = "hello".into();
        tx.send(hello).await.unwrap();
        tx.send(AudioSegment::submit("test")).await.unwrap();
        let mut after = AudioSegment::input(Vec::new(), AudioFormat::Wav, Duration::ZERO, "test");
        after.text = "after".into();
        tx.send(after).await.unwrap();

        let prompt = collect_prompt(&mut rx).await;
        assert_eq!(prompt, "hello ");
        // The post-submit chunk is still queued for the next turn.
        assert_eq!(rx.recv().await.unwrap().text, "after");
    }

    struct OneWordAgent;

    #[async_trait]
    impl ChatAgent for OneWordAgent {
        async fn run_prompt(
            &self,
            _quality: ModelQuality,
            _conversation: Conversation,
            tokens: mpsc::Sender<String>,
        ) -> Result<(), ServiceError> {
            let _ = tokens.send("reply".to_string()).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn submit_loop_skips_short_prompts_and_streams_real_ones() {
        let (text_tx, text_rx) = mpsc::channel(8);
        let (token_tx, mut token_rx) = mpsc::channel(8);

        let loop_handle = tokio::spawn(run_submit_loop(
            Arc::new(OneWordAgent),
            text_rx,
            token_tx,
            Conversation::new(),
        ));

        // Too-short prompt: skipped.
        let mut short = AudioSegment::input(Vec::new(), AudioFormat::Wav, Duration::ZERO, "test");
        short.text = "hi".into();
        text_tx.send(short).await.unwrap();
        text_tx.send(AudioSegment::submit("test")).await.unwrap();

        // Real prompt: streamed.
        let mut real = AudioSegment::input(Vec::new(), AudioFormat::Wav, Duration::ZERO, "test");
        real.text = "tell me about rust please".into();
        text_tx.send(real).await.unwrap();
        text_tx.send(AudioSegment::submit("test")).await.unwrap();
        drop(text_tx);

        assert_eq!(token_rx.recv().await.unwrap(), "reply");
        loop_handle.await.unwrap();
        assert!(token_rx.recv().await.is_none());
    }
}
