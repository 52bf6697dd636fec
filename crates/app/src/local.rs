//! Interactive local session: microphone in, speakers out, Enter as the
//! submit and barge-in trigger.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch, Mutex};

use voicewire_config::Settings;
use voicewire_core::{
    debug_dump, AudioFormat, AudioSegment, CaptureSource, Conversation, ModelQuality,
    PlaybackSink, Role, Transcriber,
};
use voicewire_device::{Microphone, Speakers};
use voicewire_pipeline::{
    collect_prompt, playback_loop, run_filler_task, run_player, run_transcription_stage,
    run_tts_stage, spawn_chat_stage, FillerGate, CHAT_TOKEN_QUEUE, PLAYBACK_QUEUE,
    TTS_AUDIO_QUEUE,
};

use crate::Services;

/// Session-scoped channel capacity for capture segments and text chunks.
const SESSION_QUEUE: usize = 1024;

pub async fn run(settings: Settings, services: Services) -> Result<(), Box<dyn Error>> {
    let setup_start = Instant::now();

    let speakers: Arc<dyn PlaybackSink> = Arc::new(Speakers::new()?);
    let dump_dir = settings
        .debug
        .dump_audio
        .then(|| PathBuf::from(&settings.debug.output_dir));

    // Session-scoped plumbing: capture segments flow through the
    // transcription stage for the whole conversation; only reply-side
    // queues are per turn.
    let (segment_tx, segment_rx) = mpsc::channel::<AudioSegment>(SESSION_QUEUE);
    let (text_tx, text_rx) = mpsc::channel(SESSION_QUEUE);
    let (early_tx, early_rx) = mpsc::channel(1);
    let (audio_play_tx, audio_play_rx) = mpsc::channel(PLAYBACK_QUEUE);

    tokio::spawn(run_transcription_stage(
        services.transcriber.clone(),
        segment_rx,
        text_tx,
        early_tx,
    ));
    tokio::spawn(run_player(
        speakers.clone(),
        audio_play_rx,
        dump_dir.clone(),
    ));

    // One task owns stdin; an Enter press is a submit during capture and a
    // barge-in during playback.
    let (enter_tx, enter_rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if enter_tx.send(()).await.is_err() {
                return;
            }
        }
    });

    tracing::debug!(
        setup_ms = setup_start.elapsed().as_millis() as u64,
        "setup done"
    );

    let mut session = LocalSession {
        settings,
        services,
        speakers,
        dump_dir,
        segment_tx,
        text_rx,
        early_rx: Arc::new(Mutex::new(early_rx)),
        enter_rx: Arc::new(Mutex::new(enter_rx)),
        audio_play_tx,
        conversation: Conversation::new(),
        turn_index: 0,
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt signal received, ending session");
                session.conversation.debug_log();
                return Ok(());
            }
            result = session.run_turn() => result?,
        }
    }
}

struct LocalSession {
    settings: Settings,
    services: Services,
    speakers: Arc<dyn PlaybackSink>,
    dump_dir: Option<PathBuf>,
    segment_tx: mpsc::Sender<AudioSegment>,
    text_rx: mpsc::Receiver<AudioSegment>,
    early_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    enter_rx: Arc<Mutex<mpsc::Receiver<()>>>,
    audio_play_tx: mpsc::Sender<AudioSegment>,
    conversation: Conversation,
    turn_index: u32,
}

impl LocalSession {
    async fn run_turn(&mut self) -> Result<(), Box<dyn Error>> {
        self.turn_index += 1;

        // Turn-scoped reply queues and the filler task, spawned before
        // capture so it can work off the early transcript mid-turn.
        let (tts_tx, tts_rx) = mpsc::channel(TTS_AUDIO_QUEUE);
        let gate = FillerGate::new();
        let filler = tokio::spawn(run_filler_task(
            self.services.agent.clone(),
            self.services.synthesizer.clone(),
            self.early_rx.clone(),
            tts_tx.clone(),
            gate.clone(),
            self.settings.openai.filler_speed,
        ));

        // A fresh microphone per turn; open failure is fatal.
        let microphone = Microphone::new(self.settings.audio.mic_sample_rate, self.dump_dir.clone());
        microphone.start(self.segment_tx.clone()).await?;

        println!("Press Enter to submit your input...");
        self.await_enter().await;

        let entire_recording = microphone.stop().await?;
        if let Some(dir) = &self.dump_dir {
            debug_dump(
                dir.join(format!("entire-recording-{}.wav", self.turn_index)),
                &entire_recording,
            );
        }
        // In-band end-of-turn marker, now that every buffered segment is
        // ahead of it in the queue.
        self.segment_tx
            .send(AudioSegment::submit("local_session"))
            .await
            .map_err(|_| "transcription stage gone")?;

        let prompt = collect_prompt(&mut self.text_rx).await;
        tracing::info!(prompt = %prompt, "turn submitted");
        self.conversation.add(Role::User, prompt.clone());

        // Sliced transcription quality check against the whole recording.
        tokio::spawn(compare_to_full_transcript(
            self.services.transcriber.clone(),
            entire_recording,
            prompt,
        ));

        let (chat_tx, chat_rx) = mpsc::channel(CHAT_TOKEN_QUEUE);
        let tts_stage = tokio::spawn(run_tts_stage(
            self.services.synthesizer.clone(),
            chat_rx,
            tts_tx,
            self.settings.openai.reply_speed,
            Some(gate),
        ));
        // Once the reply is fully synthesized a still-waiting filler can
        // never win; retiring it releases its queue sender so the playback
        // loop can drain to completion.
        let filler_abort = filler.abort_handle();
        tokio::spawn(async move {
            let _ = tts_stage.await;
            filler_abort.abort();
        });
        spawn_chat_stage(
            self.services.agent.clone(),
            ModelQuality::SlowerSmarter,
            self.conversation.clone(),
            chat_tx,
        );

        // Enter during the reply is a barge-in.
        let (interrupt_tx, interrupt_rx) = watch::channel(false);
        let enter_rx = self.enter_rx.clone();
        let interrupt_listener = tokio::spawn(async move {
            println!("Press Enter to stop output and make new input...");
            if enter_rx.lock().await.recv().await.is_some() {
                let _ = interrupt_tx.send(true);
            }
        });

        let outcome = playback_loop(tts_rx, self.audio_play_tx.clone(), interrupt_rx).await;
        interrupt_listener.abort();
        filler.abort();

        if outcome.interrupted {
            // Truncate whatever chunk is mid-playback.
            if let Err(err) = self.speakers.stop().await {
                tracing::error!(%err, "cannot stop playback after barge-in");
            }
        }

        self.conversation.add(Role::Assistant, outcome.spoken_text);
        self.conversation.debug_log();
        Ok(())
    }

    async fn await_enter(&self) {
        if self.enter_rx.lock().await.recv().await.is_none() {
            // Stdin closed; park until ctrl-c tears the session down.
            std::future::pending::<()>().await;
        }
    }
}

async fn compare_to_full_transcript(
    transcriber: Arc<dyn Transcriber>,
    wav: Vec<u8>,
    sliced_transcript: String,
) {
    match transcriber.transcribe(&wav, AudioFormat::Wav, "").await {
        Ok(full_transcript) => tracing::info!(
            full_transcript = %full_transcript,
            sliced_transcript = %sliced_transcript,
            "comparing full transcript to sliced"
        ),
        Err(err) => tracing::debug!(%err, "full-transcript comparison failed"),
    }
}
