//! Streaming conversation pipeline
//!
//! The stages of one conversational session, each a task wired to its
//! neighbors by bounded channels:
//! - Voice-activity segmentation (PCM and mu-law profiles)
//! - Incremental transcription with hallucination guards and the
//!   early-transcript fork
//! - Streaming chat completion
//! - Punctuation-boundary TTS segmentation
//! - Filler-word pre-emption behind a first-or-never gate
//! - Playback with barge-in

pub mod chat;
pub mod filler;
pub mod orchestrator;
pub mod transcribe;
pub mod tts;
pub mod vad;

pub use chat::spawn_chat_stage;
pub use filler::{run_filler_task, FillerGate, CANNED_FILLER, MIN_EARLY_TRANSCRIPT_CHARS};
pub use orchestrator::{
    collect_prompt, playback_loop, run_player, run_submit_loop, TurnOutcome, CHAT_TOKEN_QUEUE,
    MIN_PROMPT_CHARS, PLAYBACK_QUEUE, TTS_AUDIO_QUEUE,
};
pub use transcribe::{run_transcription_stage, sanitize_transcript, EARLY_TRANSCRIPT_AFTER};
pub use tts::{ends_with_punctuation, run_tts_stage, MIN_TTS_BUFFER_CHARS};
pub use vad::{MulawVad, MulawVadConfig, MulawVadEvent, PcmVad, PcmVadConfig};
