//! Settings for the voicewire runtime.
//!
//! Sources, lowest to highest priority: built-in defaults, an optional
//! `config/default` file, `VOICEWIRE__*` environment variables, and the
//! two direct environment knobs the deployment contract names (`PORT`,
//! `OPEN_AI_API_KEY`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("OPEN_AI_API_KEY is not set")]
    MissingApiKey,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("configuration error: {0}")]
    Source(#[from] config::ConfigError),
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub debug: DebugConfig,
}

impl Settings {
    /// Load settings from files and environment, then apply the direct
    /// `PORT` / `OPEN_AI_API_KEY` contract.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("VOICEWIRE")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => settings.server.port = port,
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        field: "PORT".to_string(),
                        message: format!("not a port number: {port}"),
                    })
                }
            }
        }
        if let Ok(key) = std::env::var("OPEN_AI_API_KEY") {
            settings.openai.api_key = key;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// The API key is the only setting without a usable default; everything
    /// that talks to the transcriber/agent/synthesizer needs it at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openai.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.audio.mic_sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.mic_sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Telephony server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port (`PORT` env overrides).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Websocket upgrade path.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8081
}
fn default_ws_path() -> String {
    "/ws".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
        }
    }
}

/// External service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key; required, no default (`OPEN_AI_API_KEY` env).
    #[serde(default)]
    pub api_key: String,

    /// Sample rate of the synthesizer's mp3 output.
    #[serde(default = "default_tts_sample_rate")]
    pub tts_sample_rate: u32,

    /// Synthesis speed for reply audio.
    #[serde(default = "default_reply_speed")]
    pub reply_speed: f32,

    /// Synthesis speed for filler audio.
    #[serde(default = "default_filler_speed")]
    pub filler_speed: f32,
}

fn default_tts_sample_rate() -> u32 {
    24_000
}
fn default_reply_speed() -> f32 {
    1.15
}
fn default_filler_speed() -> f32 {
    1.0
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            tts_sample_rate: default_tts_sample_rate(),
            reply_speed: default_reply_speed(),
            filler_speed: default_filler_speed(),
        }
    }
}

/// Audio device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Local microphone capture rate.
    #[serde(default = "default_mic_sample_rate")]
    pub mic_sample_rate: u32,

    /// Telephony leg rate, fixed by the wire protocol.
    #[serde(default = "default_telephony_sample_rate")]
    pub telephony_sample_rate: u32,
}

fn default_mic_sample_rate() -> u32 {
    44_100
}
fn default_telephony_sample_rate() -> u32 {
    8_000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mic_sample_rate: default_mic_sample_rate(),
            telephony_sample_rate: default_telephony_sample_rate(),
        }
    }
}

/// Diagnostic artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Dump per-segment / per-reply / whole-session audio under `output_dir`.
    #[serde(default)]
    pub dump_audio: bool,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            dump_audio: false,
            output_dir: default_output_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.server.ws_path, "/ws");
        assert_eq!(settings.audio.mic_sample_rate, 44_100);
        assert_eq!(settings.audio.telephony_sample_rate, 8_000);
        assert!(!settings.debug.dump_audio);
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let settings = Settings::default();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn validate_accepts_key() {
        let settings = Settings {
            openai: OpenAiConfig {
                api_key: "sk-test".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }
}
