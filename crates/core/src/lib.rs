//! Core traits and types for the voicewire runtime
//!
//! This crate provides the foundational types used across all other crates:
//! - `PcmBuffer`, the canonical in-memory audio interchange type
//! - `AudioSegment` events and their traces
//! - Conversation history types
//! - Service seams (transcriber, chat agent, synthesizer)
//! - Device seams (capture source, playback sink)

pub mod audio;
pub mod conversation;
pub mod device;
pub mod dump;
pub mod segment;
pub mod services;

pub use audio::PcmBuffer;
pub use conversation::{Conversation, Message, Role};
pub use device::{CaptureSource, DeviceError, PlaybackDone, PlaybackSink};
pub use dump::debug_dump;
pub use segment::{AudioFormat, AudioSegment, SegmentKind, Trace};
pub use services::{ChatAgent, ModelQuality, ServiceError, Synthesizer, Transcriber};
