//! Offline codec smoke test: mu-law round trip plus a handful of WAV
//! container variants written under `output/` for manual inspection.

use std::error::Error;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use voicewire_codec::{
    decode_mulaw, encode_mulaw, encode_wav, resample_linear, PcmBuffer, WavAudioFormat,
};
use voicewire_core::debug_dump;

/// A real inbound telephony frame, base64 mu-law.
const PHONE_FRAME_B64: &str = "e/Pu8P11cXf99vb8eHN3/vf2/HZsbv/v6/B7bm149/D3fHd98+30d2xtevLs7\
35ubHX06+79cm959e7zfHR2//j4fnd2eXz++/f4/Ht0c3r47/D7eHf+9PT/b2xz9uvt/W5sdvTt83ltbXb8+Pt8ev33\
9/x7en759fp8d3r89/j9fHv/+/v/e3l5eHd6e3t9///++/n6/Pz+/ff2+n58fA==";

pub fn run() -> Result<(), Box<dyn Error>> {
    let mulaw = BASE64.decode(PHONE_FRAME_B64)?;
    tracing::info!(bytes = mulaw.len(), "decoded sample telephony frame");

    let buffer = decode_mulaw(&mulaw, 8000);
    let reencoded = encode_mulaw(&buffer, 8000)?;
    if reencoded != mulaw {
        return Err("mu-law round trip mismatch".into());
    }
    tracing::info!(samples = buffer.data.len(), "mu-law round trip ok");

    // Container variants, best-effort dumps for eyeballing with xxd.
    let upsampled = PcmBuffer::mono16(resample_linear(&buffer.data, 8000, 16000), 16000);
    let variants: [(&str, &PcmBuffer, u16, WavAudioFormat); 4] = [
        ("output/8000-16-1-1.wav", &buffer, 16, WavAudioFormat::Pcm),
        ("output/8000-8-1-7.wav", &buffer, 8, WavAudioFormat::Mulaw),
        ("output/16000-16-1-1.wav", &upsampled, 16, WavAudioFormat::Pcm),
        ("output/16000-8-1-7.wav", &upsampled, 8, WavAudioFormat::Mulaw),
    ];
    for (path, source, bit_depth, format) in variants {
        let wav = encode_wav(source, bit_depth, format)?;
        tracing::info!(path = %path, bytes = wav.len(), "writing container variant");
        debug_dump(path, &wav);
    }

    Ok(())
}
