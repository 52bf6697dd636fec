//! Seams for the external AI services.
//!
//! Transcription, chat completion, and speech synthesis are black-box
//! streaming services; the pipeline only ever sees these traits.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::conversation::Conversation;
use crate::segment::{AudioFormat, AudioSegment};

/// Model tier to use for a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelQuality {
    FastCheap,
    SlowerSmarter,
}

/// Errors surfaced by the external service clients.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed service response: {0}")]
    Response(String),
}

/// Speech-to-text over one bounded audio segment.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio` (encoded as `format`). `prompt` carries the words
    /// already accepted this turn so the model biases toward continuation.
    async fn transcribe(
        &self,
        audio: &[u8],
        format: AudioFormat,
        prompt: &str,
    ) -> Result<String, ServiceError>;
}

/// Streaming chat completion.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Run a completion against a conversation snapshot, relaying delta
    /// tokens in model order into `tokens`. The channel closes (sender
    /// dropped) on end-of-stream; rate limits surface to the caller.
    async fn run_prompt(
        &self,
        quality: ModelQuality,
        conversation: Conversation,
        tokens: mpsc::Sender<String>,
    ) -> Result<(), ServiceError>;
}

/// Text-to-speech for one accumulated text chunk.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` at the given speed; the returned segment carries
    /// the encoded audio and the text it speaks.
    async fn create_speech(&self, text: &str, speed: f32) -> Result<AudioSegment, ServiceError>;
}
