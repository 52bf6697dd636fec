//! OpenAI clients for the three external collaborators
//!
//! Whisper transcription, streaming chat completions and speech synthesis,
//! all behind the core service traits. The pipeline never imports this
//! crate directly; the binary wires the clients in.

pub mod chat;
pub mod tts;
pub mod whisper;

pub use chat::OpenAiChatAgent;
pub use tts::OpenAiSynthesizer;
pub use whisper::WhisperTranscriber;

use voicewire_core::ServiceError;

pub(crate) const API_BASE: &str = "https://api.openai.com/v1";

/// Capture a non-2xx response body into a typed error. Rate limits get
/// their own variant since callers treat them as transient.
pub(crate) async fn api_error(response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ServiceError::RateLimited(message)
    } else {
        ServiceError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

pub(crate) fn http_error(err: reqwest::Error) -> ServiceError {
    ServiceError::Http(err.to_string())
}
