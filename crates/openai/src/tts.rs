//! Speech-synthesis client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use voicewire_core::{AudioFormat, AudioSegment, ServiceError, Synthesizer};

use crate::{api_error, http_error, API_BASE};

const MODEL: &str = "tts-1";
const VOICE: &str = "echo";
// Opus would stream better; mp3 keeps the decode path simple.
const RESPONSE_FORMAT: &str = "mp3";

pub struct OpenAiSynthesizer {
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiSynthesizer {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'static str,
    input: &'a str,
    voice: &'static str,
    response_format: &'static str,
    speed: f32,
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn create_speech(&self, text: &str, speed: f32) -> Result<AudioSegment, ServiceError> {
        let started = Instant::now();
        tracing::debug!(input = %text, speed, "speech request start");

        let request = SpeechRequest {
            model: MODEL,
            input: text,
            voice: VOICE,
            response_format: RESPONSE_FORMAT,
            speed,
        };
        let response = self
            .http
            .post(format!("{API_BASE}/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(http_error)?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let bytes = response.bytes().await.map_err(http_error)?;
        tracing::debug!(
            output_bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "speech request done"
        );

        // Duration is unknown until decode; the player measures for real.
        Ok(AudioSegment::output(
            bytes.to_vec(),
            AudioFormat::Mp3,
            Duration::ZERO,
            text,
            "openai_tts",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_request_serialization() {
        let request = SpeechRequest {
            model: MODEL,
            input: "Hello there.",
            voice: VOICE,
            response_format: RESPONSE_FORMAT,
            speed: 1.15,
        };
        let rendered = serde_json::to_string(&request).unwrap();
        assert!(rendered.contains(r#""model":"tts-1""#));
        assert!(rendered.contains(r#""voice":"echo""#));
        assert!(rendered.contains(r#""response_format":"mp3""#));
        assert!(rendered.contains(r#""speed":1.15"#));
    }
}
