//! Linear-interpolation resampling and channel downmix.
//!
//! Linear interpolation is knowingly low-fi; it is sufficient for moving
//! voice between 16 kHz and 8 kHz. Anything better (polyphase, windowed
//! sinc) drags in native libraries this crate deliberately avoids.

use crate::CodecError;

/// Resample `input` from `from_rate` to `to_rate`.
///
/// Output length is `round(n * to_rate / from_rate)`. Sample `k` is the
/// linear blend of the two source samples around `k * from_rate / to_rate`;
/// the final output sample copies the final input sample.
pub fn resample_linear(input: &[i32], from_rate: u32, to_rate: u32) -> Vec<i32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (input.len() as f64 * ratio).round() as usize;
    if output_len == 0 {
        return Vec::new();
    }

    let mut output = Vec::with_capacity(output_len);
    let step = from_rate as f64 / to_rate as f64;
    for k in 0..output_len - 1 {
        let position = k as f64 * step;
        let lower = position as usize;
        let upper = (lower + 1).min(input.len() - 1);
        let t = position - lower as f64;
        let blended = (1.0 - t) * input[lower] as f64 + t * input[upper] as f64;
        output.push(blended as i32);
    }
    output.push(input[input.len() - 1]);

    output
}

/// Downmix interleaved stereo to mono by averaging each L/R pair.
pub fn stereo_to_mono(stereo: &[i32]) -> Result<Vec<i32>, CodecError> {
    if stereo.len() % 2 != 0 {
        return Err(CodecError::OddSampleCount);
    }
    Ok(stereo
        .chunks_exact(2)
        .map(|pair| (pair[0] + pair[1]) / 2)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_rates_match() {
        let input = vec![1, 2, 3, 4, 5];
        assert_eq!(resample_linear(&input, 8000, 8000), input);
    }

    #[test]
    fn output_length_is_rounded_ratio() {
        let input = vec![0; 1000];
        assert_eq!(resample_linear(&input, 16000, 8000).len(), 500);
        assert_eq!(resample_linear(&input, 8000, 16000).len(), 2000);
        assert_eq!(resample_linear(&input, 44100, 24000).len(), 544);
    }

    #[test]
    fn upsample_interpolates_between_neighbors() {
        let input = vec![0, 100];
        let output = resample_linear(&input, 8000, 16000);
        assert_eq!(output.len(), 4);
        assert_eq!(output[0], 0);
        assert_eq!(output[1], 50);
        // Last sample is copied from the input tail.
        assert_eq!(output[3], 100);
    }

    #[test]
    fn downsample_keeps_endpoints() {
        let input: Vec<i32> = (0..16).collect();
        let output = resample_linear(&input, 16000, 8000);
        assert_eq!(output.len(), 8);
        assert_eq!(output[0], 0);
        assert_eq!(*output.last().unwrap(), 15);
    }

    #[test]
    fn empty_input() {
        assert!(resample_linear(&[], 8000, 16000).is_empty());
    }

    #[test]
    fn mono_downmix_halves_and_bounds() {
        let stereo = vec![100, 200, -100, -300, 32767, 32767];
        let mono = stereo_to_mono(&stereo).expect("even count");
        assert_eq!(mono.len(), 3);
        assert_eq!(mono, vec![150, -200, 32767]);

        for (pair, &m) in stereo.chunks_exact(2).zip(&mono) {
            assert!(m.abs() <= pair[0].abs().max(pair[1].abs()));
        }
    }

    #[test]
    fn odd_sample_count_is_an_error() {
        assert!(matches!(
            stereo_to_mono(&[1, 2, 3]),
            Err(CodecError::OddSampleCount)
        ));
    }
}
