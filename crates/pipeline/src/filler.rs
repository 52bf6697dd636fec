//! Filler-word pre-emption.
//!
//! While the real reply is still being generated, a short filler phrase
//! ("Hmm got it, the weather...") masks the end-to-end latency. The filler
//! is built from the early partial transcript and must play before the
//! reply or not at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use voicewire_core::{AudioSegment, ChatAgent, Conversation, ModelQuality, Synthesizer};

/// Early transcripts shorter than this carry too little to name a topic.
pub const MIN_EARLY_TRANSCRIPT_CHARS: usize = 20;

/// Fallback phrase when no usable early transcript arrived.
pub const CANNED_FILLER: &str = "Uhm, ...";

/// First-or-never ordering gate between the filler and the real reply.
///
/// Both sides race to flip the flag: the TTS stage marks it on every reply
/// emission, the filler claims it exactly once. Whoever flips it first wins
/// the head of the shared audio queue, so the filler can never play after
/// reply audio has been enqueued.
#[derive(Debug, Clone, Default)]
pub struct FillerGate {
    reply_started: Arc<AtomicBool>,
}

impl FillerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply side: real reply audio is about to be enqueued.
    pub fn mark_reply_started(&self) {
        self.reply_started.store(true, Ordering::SeqCst);
    }

    /// Filler side: returns true when no reply audio has been enqueued yet,
    /// closing the gate in the same step.
    pub fn try_claim(&self) -> bool {
        !self.reply_started.swap(true, Ordering::SeqCst)
    }
}

/// Wait for the early transcript, build and synthesize a filler phrase, and
/// enqueue it ahead of the reply when the gate allows.
///
/// The task is turn-scoped; the orchestrator aborts it when the turn ends
/// without an early transcript.
pub async fn run_filler_task(
    agent: Arc<dyn ChatAgent>,
    synthesizer: Arc<dyn Synthesizer>,
    early_transcript: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    audio_out: mpsc::Sender<AudioSegment>,
    gate: FillerGate,
    speed: f32,
) {
    tracing::info!("filler task started");
    let early = {
        let mut rx = early_transcript.lock().await;
        match rx.recv().await {
            Some(early) => early,
            None => return,
        }
    };
    tracing::info!(early_transcript = %early, "filler task received early transcript");

    let filler = if early.len() < MIN_EARLY_TRANSCRIPT_CHARS {
        tracing::debug!("early transcript too short, using the canned phrase");
        CANNED_FILLER.to_string()
    } else {
        match topic_of(agent, &early).await {
            Some(topic) => format!("Hmm got it, {topic}... ."),
            None => CANNED_FILLER.to_string(),
        }
    };

    match synthesizer.create_speech(&filler, speed).await {
        Ok(segment) => {
            if gate.try_claim() {
                tracing::info!(filler = %filler, "queueing filler audio");
                let _ = audio_out.send(segment).await;
            } else {
                tracing::debug!("reply already started, dropping filler");
            }
        }
        Err(err) => tracing::error!(%err, "cannot synthesize filler"),
    }
    tracing::info!("filler task ended");
}

/// Ask the agent to name the main object/subject of the transcript.
async fn topic_of(agent: Arc<dyn ChatAgent>, early_transcript: &str) -> Option<String> {
    let prompt = format!(
        "what is the main object/subject asked for in this transcript, \
         only return the object/subject name using maximum of 3 words: {early_transcript}"
    );

    let (tx, mut rx) = mpsc::channel(64);
    let handle = tokio::spawn(async move {
        agent
            .run_prompt(
                ModelQuality::SlowerSmarter,
                Conversation::from_user_text(prompt),
                tx,
            )
            .await
    });

    let mut topic = String::new();
    while let Some(token) = rx.recv().await {
        topic.push_str(&token);
    }
    if let Ok(Err(err)) = handle.await {
        tracing::debug!(%err, "topic prompt failed");
    }

    let topic = topic.trim().to_string();
    if topic.is_empty() {
        None
    } else {
        Some(topic)
    }
}
