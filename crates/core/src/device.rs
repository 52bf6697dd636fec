//! Seams for audio capture and playback devices.
//!
//! Both the local sound hardware and the telephony stream handler present
//! these capabilities; the orchestrator never knows which one it drives.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::audio::PcmBuffer;
use crate::segment::AudioSegment;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("capture already started")]
    AlreadyStarted,

    #[error("playback already in progress, call stop first")]
    AlreadyPlaying,

    #[error("double-stop: the player is already being stopped")]
    AlreadyStopping,

    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("session closed")]
    Closed,
}

/// Resolves when a playback genuinely finished or was stopped.
#[derive(Debug)]
pub struct PlaybackDone {
    rx: watch::Receiver<bool>,
}

impl PlaybackDone {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Wait for the playback to end. A dropped sender counts as done.
    pub async fn wait(mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Produces a stream of captured audio segments.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Begin capture, emitting segments into `segments`. One-shot per
    /// instance.
    async fn start(&self, segments: mpsc::Sender<AudioSegment>) -> Result<(), DeviceError>;

    /// Stop capture. Blocks until buffered audio has been flushed to the
    /// segment channel (which is then closed) and returns the entire
    /// recording as a WAV container. Idempotent after the first call.
    async fn stop(&self) -> Result<Vec<u8>, DeviceError>;
}

/// Plays decoded audio buffers.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Start playing `audio`. Returns a wait handle when the sink can
    /// observe completion (local hardware), `None` when it cannot
    /// (telephony). Calling `play` while a playback is active is an error.
    async fn play(&self, audio: PcmBuffer) -> Result<Option<PlaybackDone>, DeviceError>;

    /// Truncate the current playback, if any.
    async fn stop(&self) -> Result<(), DeviceError>;
}
