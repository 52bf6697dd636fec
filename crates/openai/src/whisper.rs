//! Whisper transcription client.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use voicewire_core::{AudioFormat, ServiceError, Transcriber};

use crate::{api_error, http_error, API_BASE};

const MODEL: &str = "whisper-1";

pub struct WhisperTranscriber {
    http: reqwest::Client,
    api_key: String,
}

impl WhisperTranscriber {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn mime_for(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Wav => "audio/wav",
        AudioFormat::Mp3 => "audio/mpeg",
        AudioFormat::Flac => "audio/flac",
        AudioFormat::Mulaw => "application/octet-stream",
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        format: AudioFormat,
        prompt: &str,
    ) -> Result<String, ServiceError> {
        let started = Instant::now();

        // The upload needs no real filename, only an extension for format
        // detection. Whisper takes up to 244 prompt tokens and biases
        // toward continuing them, which is what the running transcript is
        // for.
        let part = Part::bytes(audio.to_vec())
            .file_name(format!("audio.{}", format.extension()))
            .mime_str(mime_for(format))
            .map_err(http_error)?;
        let form = Form::new()
            .part("file", part)
            .text("model", MODEL)
            .text("prompt", prompt.to_string());

        tracing::debug!(model = MODEL, prompt = %prompt, "creating transcription request");
        let response = self
            .http
            .post(format!("{API_BASE}/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Response(e.to_string()))?;

        tracing::debug!(
            transcription = %body.text,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "received transcription"
        );
        Ok(body.text)
    }
}
