//! In-memory audio conversions for the voicewire runtime.
//!
//! Everything happens on byte and sample buffers so deployment needs no
//! ffmpeg, temp files or other external tooling:
//! - G.711 mu-law companding (telephony wire format)
//! - WAV containers (PCM via `hound`, mu-law written by hand)
//! - MP3 and FLAC decoding (`symphonia`)
//! - Linear-interpolation resampling and stereo downmix
//!
//! Usage mirrors the interchange design: decode any format into a
//! [`PcmBuffer`], then encode the buffer into whatever the consumer needs.

pub mod media;
pub mod mulaw;
pub mod pcm;
pub mod resample;
pub mod wav;

pub use media::{decode_flac, decode_mp3};
pub use mulaw::{
    decode_mulaw, encode_mulaw, linear16_to_mulaw, mulaw_to_linear16, mulaw_to_wav, wav_to_mulaw,
};
pub use pcm::{pcm16_bytes_to_samples, pcm_bytes_to_wav, samples_to_pcm16_bytes};
pub use resample::{resample_linear, stereo_to_mono};
pub use wav::{decode_wav, encode_wav, encode_wav_simple, WavAudioFormat};

use thiserror::Error;

pub use voicewire_core::PcmBuffer;

/// Codec errors. Values only; no partial writes escape a failed call.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed {format} data: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },

    #[error("unsupported audio format: {0}")]
    Unsupported(String),

    #[error("stereo data must have an even number of samples")]
    OddSampleCount,

    #[error("sample count does not align to channel count")]
    ChannelMisalignment,

    #[error("wav encoding failed: {0}")]
    WavWrite(String),
}
