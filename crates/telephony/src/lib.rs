//! Telephony stream protocol
//!
//! A phone call arrives as a bidirectional stream of JSON text frames over
//! a websocket: inbound mu-law media to transcribe, outbound mu-law media
//! to speak. The handler here owns the session state machine and doubles
//! as both the capture source and the playback sink for the phone leg.

pub mod handler;
pub mod messages;

pub use handler::StreamHandler;
pub use messages::{
    MarkPayload, MediaFormat, MediaPayload, StartPayload, StopPayload, StreamMessage,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("session closed")]
    Closed,
}
