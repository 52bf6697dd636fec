//! ITU-T G.711 mu-law companding.
//!
//! Telephony streams carry one mu-law byte per sample at 8 kHz; silence sits
//! at 0xFF. The expansion/compression pair below is exactly invertible for
//! every byte except 0x7F (negative zero), which re-encodes as 0xFF.

use voicewire_core::PcmBuffer;

use crate::resample::resample_linear;
use crate::wav::{decode_wav, encode_wav, WavAudioFormat};
use crate::CodecError;

const BIAS: i16 = 0x84;

/// Expand one mu-law byte to a 16-bit linear sample.
pub fn mulaw_to_linear16(mu: u8) -> i16 {
    let mu = !mu;
    let sign = (mu & 0x80) != 0;
    let segment = (mu & 0x70) >> 4;
    let mantissa = mu & 0x0F;

    let mut value = ((mantissa as i16) << 3) + BIAS;
    value <<= segment as i16;
    if sign {
        BIAS - value
    } else {
        value - BIAS
    }
}

/// Compress a 16-bit linear sample to its mu-law byte.
pub fn linear16_to_mulaw(sample: i16) -> u8 {
    const MAX: i32 = 0x7FFF;

    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > MAX {
        pcm = MAX;
    }
    pcm += BIAS as i32;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Expand a mu-law byte stream into a mono 16-bit buffer.
pub fn decode_mulaw(bytes: &[u8], sample_rate: u32) -> PcmBuffer {
    let data = bytes
        .iter()
        .map(|&b| mulaw_to_linear16(b) as i32)
        .collect();
    // The source depth was 8 bits, but the expansion yields 16-bit samples.
    PcmBuffer::mono16(data, sample_rate)
}

/// Compress a buffer into a mu-law byte stream at `target_rate`, resampling
/// first when the rates differ. Expects mono input.
pub fn encode_mulaw(buffer: &PcmBuffer, target_rate: u32) -> Result<Vec<u8>, CodecError> {
    tracing::debug!(
        input_sample_rate = buffer.sample_rate,
        output_sample_rate = target_rate,
        channels = buffer.channels,
        source_bit_depth = buffer.source_bit_depth,
        frames = buffer.frame_count(),
        "encoding buffer as mu-law"
    );

    if buffer.channels != 1 {
        return Err(CodecError::Unsupported(format!(
            "mu-law encoding expects mono input, got {} channels",
            buffer.channels
        )));
    }

    let resampled;
    let samples = if buffer.sample_rate != target_rate {
        resampled = resample_linear(&buffer.data, buffer.sample_rate, target_rate);
        &resampled
    } else {
        &buffer.data
    };

    Ok(samples
        .iter()
        .map(|&s| linear16_to_mulaw(s.clamp(i16::MIN as i32, i16::MAX as i32) as i16))
        .collect())
}

/// Expand a mu-law byte stream and package it as a 16-bit PCM WAV at
/// `output_rate`. Used for whole-call recordings and transcription chunks.
pub fn mulaw_to_wav(
    bytes: &[u8],
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<u8>, CodecError> {
    let mut buffer = decode_mulaw(bytes, input_rate);
    if input_rate != output_rate {
        buffer.data = resample_linear(&buffer.data, input_rate, output_rate);
        buffer.sample_rate = output_rate;
    }
    encode_wav(&buffer, 16, WavAudioFormat::Pcm)
}

/// Decode a WAV container and compress its samples to mu-law at
/// `target_rate`. The outbound telephony path.
pub fn wav_to_mulaw(wav_bytes: &[u8], target_rate: u32) -> Result<Vec<u8>, CodecError> {
    let buffer = decode_wav(wav_bytes)?;
    encode_mulaw(&buffer, target_rate)
}

/// A real inbound telephony frame payload, base64-decoded. Test fixture
/// shared across the codec tests.
#[cfg(test)]
pub(crate) const PHONE_FRAME: &[u8] = &[
    0x7b, 0xf3, 0xee, 0xf0, 0xfd, 0x75, 0x71, 0x77, 0xfd, 0xf6, 0xf6, 0xfc, 0x78, 0x73, 0x77,
    0xfe, 0xf7, 0xf6, 0xfc, 0x76, 0x6c, 0x6e, 0xff, 0xef, 0xeb, 0xf0, 0x7b, 0x6e, 0x6d, 0x78,
    0xf7, 0xf0,
];
