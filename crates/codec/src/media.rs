//! Compressed media decoding (MP3, FLAC) via symphonia.
//!
//! Both decoders work fully in memory: probe the byte vector, decode every
//! packet, and interleave the samples into a [`PcmBuffer`].

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use voicewire_core::PcmBuffer;

use crate::resample::stereo_to_mono;
use crate::CodecError;

struct DecodedMedia {
    /// Interleaved samples at full 32-bit scale.
    samples: Vec<i32>,
    sample_rate: u32,
    channels: u16,
    /// Native bit depth when the container declares one.
    bits_per_sample: Option<u16>,
}

/// Decode an MP3 byte vector.
///
/// The decoded stream is normalized to 16-bit and downmixed to mono before
/// returning; everything downstream of the synthesizer operates in mono.
pub fn decode_mp3(bytes: &[u8]) -> Result<PcmBuffer, CodecError> {
    let media = decode_with_symphonia(bytes, "mp3")?;
    tracing::debug!(
        sample_rate = media.sample_rate,
        channels = media.channels,
        sample_count = media.samples.len(),
        "decoded mp3"
    );

    // Full scale down to the canonical 16-bit range.
    let mut samples: Vec<i32> = media.samples.iter().map(|&s| s >> 16).collect();
    if media.channels == 2 {
        samples = stereo_to_mono(&samples)?;
    } else if media.channels != 1 {
        return Err(CodecError::Unsupported(format!(
            "mp3 with {} channels",
            media.channels
        )));
    }

    Ok(PcmBuffer::mono16(samples, media.sample_rate))
}

/// Decode a FLAC byte vector.
///
/// Container metadata (bit depth, channels, rate) is attached verbatim.
/// 8-bit streams follow the unsigned WAV convention (midpoint 0x80).
pub fn decode_flac(bytes: &[u8]) -> Result<PcmBuffer, CodecError> {
    let media = decode_with_symphonia(bytes, "flac")?;
    let bits = media.bits_per_sample.unwrap_or(16);
    tracing::debug!(
        byte_length = bytes.len(),
        sample_rate = media.sample_rate,
        bits_per_sample = bits,
        channels = media.channels,
        "decoded flac"
    );

    let shift = 32u32.saturating_sub(bits as u32);
    let data = media
        .samples
        .iter()
        .map(|&s| {
            let native = s >> shift;
            if bits == 8 {
                native + 0x80
            } else {
                native
            }
        })
        .collect();

    Ok(PcmBuffer::new(
        data,
        media.sample_rate,
        media.channels,
        bits,
    ))
}

fn decode_with_symphonia(bytes: &[u8], extension: &str) -> Result<DecodedMedia, CodecError> {
    let format_name: &'static str = if extension == "mp3" { "mp3" } else { "flac" };
    let malformed = |message: String| CodecError::Malformed {
        format: format_name,
        message,
    };

    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(extension);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| malformed(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| malformed("no decodable track".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| malformed(e.to_string()))?;

    let mut sample_rate = params.sample_rate.unwrap_or(0);
    let mut channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let bits_per_sample = params.bits_per_sample.map(|b| b as u16);

    let mut samples: Vec<i32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of the in-memory stream.
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(malformed(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let mut buf = SampleBuffer::<i32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // A bad frame is skippable; the stream may recover.
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(error = e, "skipping undecodable frame");
                continue;
            }
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(malformed(e.to_string())),
        }
    }

    if samples.is_empty() {
        return Err(malformed("no audio frames decoded".to_string()));
    }
    if sample_rate == 0 || channels == 0 {
        return Err(malformed("stream did not declare a signal spec".to_string()));
    }

    Ok(DecodedMedia {
        samples,
        sample_rate,
        channels,
        bits_per_sample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_mp3_is_malformed() {
        let err = decode_mp3(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { format: "mp3", .. }));
    }

    #[test]
    fn garbage_flac_is_malformed() {
        let err = decode_flac(b"definitely not a flac stream").unwrap_err();
        assert!(matches!(err, CodecError::Malformed { format: "flac", .. }));
    }

    #[test]
    fn empty_input_is_malformed() {
        assert!(decode_mp3(&[]).is_err());
        assert!(decode_flac(&[]).is_err());
    }
}
