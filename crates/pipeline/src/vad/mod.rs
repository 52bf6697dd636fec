//! Voice-activity segmentation.
//!
//! Two profiles over the same cursor-advancing shape: the PCM profile scans
//! byte-magnitude windows of the local microphone stream, the mu-law
//! profile walks the telephony stream byte-for-byte against the companded
//! silence value. Both are pure state machines — the owner appends bytes to
//! its buffer and asks the segmenter what to emit.

mod mulaw;
mod pcm;

pub use mulaw::{MulawVad, MulawVadConfig, MulawVadEvent};
pub use pcm::{PcmVad, PcmVadConfig};
