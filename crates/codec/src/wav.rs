//! RIFF/WAVE containers.
//!
//! PCM containers (audio-format code 1) go through `hound`. Mu-law
//! containers (code 7) are written and parsed by hand since `hound` only
//! speaks PCM and float; the layout matches what the telephony leg expects
//! (16-byte fmt chunk, one byte per sample).
//!
//! 8-bit samples follow the WAV convention: stored unsigned, midpoint 0x80.

use std::io::Cursor;

use voicewire_core::PcmBuffer;

use crate::mulaw::{linear16_to_mulaw, mulaw_to_linear16};
use crate::CodecError;

/// WAV audio-format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavAudioFormat {
    Pcm,
    Mulaw,
}

impl WavAudioFormat {
    pub fn code(&self) -> u16 {
        match self {
            WavAudioFormat::Pcm => 1,
            WavAudioFormat::Mulaw => 7,
        }
    }
}

/// Encode a buffer into a WAV container with the buffer's own bit depth and
/// PCM sample format. The common case for transcription chunks.
pub fn encode_wav_simple(buffer: &PcmBuffer) -> Result<Vec<u8>, CodecError> {
    encode_wav(buffer, buffer.source_bit_depth, WavAudioFormat::Pcm)
}

/// Encode a buffer into a WAV container.
///
/// Sample rate and channel count come from the buffer; `bit_depth` and
/// `format` choose the on-disk sample encoding. An empty buffer yields an
/// empty byte vector with no error.
pub fn encode_wav(
    buffer: &PcmBuffer,
    bit_depth: u16,
    format: WavAudioFormat,
) -> Result<Vec<u8>, CodecError> {
    if buffer.data.is_empty() {
        return Ok(Vec::new());
    }
    if buffer.channels == 0 || buffer.data.len() % buffer.channels as usize != 0 {
        return Err(CodecError::ChannelMisalignment);
    }

    tracing::debug!(
        sample_count = buffer.data.len(),
        sample_rate = buffer.sample_rate,
        source_bit_depth = buffer.source_bit_depth,
        output_bit_depth = bit_depth,
        channels = buffer.channels,
        audio_format = format.code(),
        "encoding sample buffer as wav"
    );

    match format {
        WavAudioFormat::Pcm => encode_pcm_wav(buffer, bit_depth),
        WavAudioFormat::Mulaw => Ok(encode_mulaw_wav(buffer)),
    }
}

fn encode_pcm_wav(buffer: &PcmBuffer, bit_depth: u16) -> Result<Vec<u8>, CodecError> {
    let spec = hound::WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: bit_depth,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CodecError::WavWrite(e.to_string()))?;
        for &sample in &buffer.data {
            // hound works in signed samples at every depth; shift our
            // unsigned 8-bit convention down before handing it over.
            let signed = if bit_depth == 8 { sample - 0x80 } else { sample };
            writer
                .write_sample(signed)
                .map_err(|e| CodecError::WavWrite(e.to_string()))?;
        }
        // Finalize patches the RIFF and data chunk lengths.
        writer
            .finalize()
            .map_err(|e| CodecError::WavWrite(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

fn encode_mulaw_wav(buffer: &PcmBuffer) -> Vec<u8> {
    let payload: Vec<u8> = buffer
        .data
        .iter()
        .map(|&s| linear16_to_mulaw(s.clamp(i16::MIN as i32, i16::MAX as i32) as i16))
        .collect();

    let channels = buffer.channels;
    let byte_rate = buffer.sample_rate * channels as u32;
    let block_align = channels;

    let mut out = Vec::with_capacity(44 + payload.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + payload.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&WavAudioFormat::Mulaw.code().to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&buffer.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&8u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Decode a WAV container into a sample buffer.
///
/// PCM containers keep their declared bit depth; mu-law containers are
/// expanded to 16-bit samples.
pub fn decode_wav(bytes: &[u8]) -> Result<PcmBuffer, CodecError> {
    match scan_format_code(bytes)? {
        1 => decode_pcm_wav(bytes),
        7 => decode_mulaw_wav(bytes),
        other => Err(CodecError::Unsupported(format!(
            "wav audio-format code {other}"
        ))),
    }
}

fn decode_pcm_wav(bytes: &[u8]) -> Result<PcmBuffer, CodecError> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| CodecError::Malformed {
        format: "wav",
        message: e.to_string(),
    })?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int {
        return Err(CodecError::Unsupported(
            "float wav samples".to_string(),
        ));
    }

    let mut reader = reader;
    let data: Vec<i32> = reader
        .samples::<i32>()
        .map(|s| {
            s.map(|v| {
                if spec.bits_per_sample == 8 {
                    // Back to the unsigned 8-bit convention.
                    v + 0x80
                } else {
                    v
                }
            })
        })
        .collect::<Result<_, _>>()
        .map_err(|e| CodecError::Malformed {
            format: "wav",
            message: e.to_string(),
        })?;

    Ok(PcmBuffer::new(
        data,
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
    ))
}

fn decode_mulaw_wav(bytes: &[u8]) -> Result<PcmBuffer, CodecError> {
    let (channels, sample_rate, payload) = walk_riff_chunks(bytes)?;
    let data = payload
        .iter()
        .map(|&b| mulaw_to_linear16(b) as i32)
        .collect();
    Ok(PcmBuffer::new(data, sample_rate, channels, 16))
}

/// Locate the fmt chunk and return its audio-format code.
fn scan_format_code(bytes: &[u8]) -> Result<u16, CodecError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(CodecError::Malformed {
            format: "wav",
            message: "missing RIFF/WAVE header".to_string(),
        });
    }
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body = offset + 8;
        if id == b"fmt " {
            if body + 2 > bytes.len() {
                break;
            }
            return Ok(u16::from_le_bytes([bytes[body], bytes[body + 1]]));
        }
        // Chunks are padded to even lengths.
        offset = body + size + (size % 2);
    }
    Err(CodecError::Malformed {
        format: "wav",
        message: "no fmt chunk".to_string(),
    })
}

/// Pull channels, sample rate and the data payload out of a mu-law container.
fn walk_riff_chunks(bytes: &[u8]) -> Result<(u16, u32, &[u8]), CodecError> {
    let mut fmt: Option<(u16, u32)> = None;
    let mut data: Option<&[u8]> = None;

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body = offset + 8;
        let end = (body + size).min(bytes.len());
        match id {
            b"fmt " if size >= 8 => {
                let channels = u16::from_le_bytes([bytes[body + 2], bytes[body + 3]]);
                let sample_rate = u32::from_le_bytes([
                    bytes[body + 4],
                    bytes[body + 5],
                    bytes[body + 6],
                    bytes[body + 7],
                ]);
                fmt = Some((channels, sample_rate));
            }
            b"data" => data = Some(&bytes[body..end]),
            _ => {}
        }
        offset = body + size + (size % 2);
    }

    match (fmt, data) {
        (Some((channels, sample_rate)), Some(payload)) => Ok((channels, sample_rate, payload)),
        _ => Err(CodecError::Malformed {
            format: "wav",
            message: "missing fmt or data chunk".to_string(),
        }),
    }
}
