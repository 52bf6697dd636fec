//! Raw 16-bit little-endian PCM byte streams.
//!
//! The local microphone callback hands over bytes in this shape; these
//! helpers move between the byte view and the sample view.

use voicewire_core::PcmBuffer;

use crate::wav::{encode_wav, WavAudioFormat};
use crate::CodecError;

/// Reinterpret 16-bit LE bytes as signed samples. A trailing odd byte is
/// ignored.
pub fn pcm16_bytes_to_samples(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as i32)
        .collect()
}

/// Serialize samples back into 16-bit LE bytes, clamping to the i16 range.
pub fn samples_to_pcm16_bytes(samples: &[i32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        bytes.extend_from_slice(&clamped.to_le_bytes());
    }
    bytes
}

/// Wrap a raw 16-bit LE capture slice in a PCM WAV container.
pub fn pcm_bytes_to_wav(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, CodecError> {
    let buffer = PcmBuffer::new(pcm16_bytes_to_samples(bytes), sample_rate, channels, 16);
    encode_wav(&buffer, 16, WavAudioFormat::Pcm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::decode_wav;

    #[test]
    fn bytes_to_samples_signed() {
        let bytes = [0x00, 0x00, 0xFF, 0x7F, 0x00, 0x80];
        assert_eq!(pcm16_bytes_to_samples(&bytes), vec![0, 32767, -32768]);
    }

    #[test]
    fn byte_sample_roundtrip() {
        let samples = vec![0, 1, -1, 32767, -32768, 1234, -4321];
        let bytes = samples_to_pcm16_bytes(&samples);
        assert_eq!(pcm16_bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn capture_bytes_to_wav() {
        let samples = vec![100i32, -100, 2000, -2000];
        let bytes = samples_to_pcm16_bytes(&samples);

        let wav = pcm_bytes_to_wav(&bytes, 44100, 1).expect("encode");
        let decoded = decode_wav(&wav).expect("decode");
        assert_eq!(decoded.data, samples);
        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.channels, 1);
    }
}
