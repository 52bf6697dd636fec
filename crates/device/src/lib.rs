//! Local audio hardware adapters
//!
//! The microphone and speaker adapters present the same capture/playback
//! seams as the telephony handler, so a session never knows whether it is
//! talking to sound hardware or a phone call.
//!
//! Platform streams (`cpal::Stream`, the rodio output stream) are not
//! `Send`; each adapter parks its stream on a dedicated OS thread and
//! talks to it through channels.

pub mod microphone;
pub mod speakers;

pub use microphone::Microphone;
pub use speakers::Speakers;
