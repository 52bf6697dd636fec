//! Wire frames of the telephony stream protocol.
//!
//! Every frame is one JSON object with an `event` discriminator, a decimal
//! `sequenceNumber`, and an event-specific payload. `streamSid` correlates
//! frames to the session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How much of a media payload makes it into a log line.
const LOGGED_PAYLOAD_CHARS: usize = 100;

/// One protocol frame, inbound or outbound.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamMessage {
    /// One of `connected`, `start`, `media`, `stop`, `mark` or `clear`.
    pub event: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sequence_number: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_sid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<StartPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<MarkPayload>,

    // `connected` carries its payload inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl StreamMessage {
    /// Serialize for logging, with any media payload cut down to its first
    /// hundred characters. Full base64 audio has no business in a log line.
    pub fn log_render(&self) -> String {
        let mut clone = self.clone();
        if let Some(media) = &mut clone.media {
            if media.payload.chars().count() > LOGGED_PAYLOAD_CHARS {
                let head: String = media.payload.chars().take(LOGGED_PAYLOAD_CHARS).collect();
                media.payload = format!("{head} ... (truncated)");
            }
        }
        serde_json::to_string(&clone).unwrap_or_else(|_| format!("{clone:?}"))
    }
}

/// Stream metadata, sent right after `connected`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub stream_sid: String,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub call_sid: String,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    pub media_format: MediaFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaFormat {
    /// The only format the protocol speaks, in either direction.
    pub fn mulaw_8k() -> Self {
        Self {
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
        }
    }
}

/// Audio frame payload; `payload` is base64 mu-law.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    /// `inbound` or `outbound`.
    pub track: String,
    /// Per-direction media counter, starting at "1".
    pub chunk: String,
    /// Milliseconds since stream start.
    pub timestamp: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StopPayload {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub call_sid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MarkPayload {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_start_frame() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZ123",
                "accountSid": "AC123",
                "callSid": "CA123",
                "tracks": ["inbound"],
                "customParameters": {},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ123"
        }"#;
        let msg: StreamMessage = serde_json::from_str(raw).expect("valid frame");
        assert_eq!(msg.event, "start");
        let start = msg.start.expect("start payload");
        assert_eq!(start.stream_sid, "MZ123");
        assert_eq!(start.tracks, vec!["inbound"]);
        assert_eq!(start.media_format, MediaFormat::mulaw_8k());
    }

    #[test]
    fn serializes_without_empty_payloads() {
        let msg = StreamMessage {
            event: "media".to_string(),
            sequence_number: "2".to_string(),
            stream_sid: Some("MZ123".to_string()),
            media: Some(MediaPayload {
                track: "outbound".to_string(),
                chunk: "1".to_string(),
                timestamp: "120".to_string(),
                payload: "AAAA".to_string(),
            }),
            ..Default::default()
        };
        let rendered = serde_json::to_string(&msg).expect("serializable");
        assert!(rendered.contains(r#""sequenceNumber":"2""#));
        assert!(!rendered.contains("start"));
        assert!(!rendered.contains("mark"));
    }

    #[test]
    fn log_render_truncates_large_payloads() {
        let msg = StreamMessage {
            event: "media".to_string(),
            media: Some(MediaPayload {
                track: "outbound".to_string(),
                chunk: "1".to_string(),
                timestamp: "0".to_string(),
                payload: "A".repeat(4096),
            }),
            ..Default::default()
        };
        let rendered = msg.log_render();
        assert!(rendered.len() < 400);
        assert!(rendered.contains("(truncated)"));
    }
}
