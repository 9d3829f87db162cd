//! Audio format conversion utilities.
//!
//! f32↔i16, WAV encode/decode via `hound`, linear resampling, and
//! stereo→mono downmix. All pure computation, no device access.

use crate::audio::types::Utterance;
use crate::error::AudioError;

/// Convert f32 samples (-1.0..1.0) to i16 samples.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            (clamped * i16::MAX as f32) as i16
        })
        .collect()
}

/// Convert i16 samples to f32 samples (-1.0..1.0).
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
}

/// Resample audio using linear interpolation.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;
        if idx + 1 < samples.len() {
            out.push(samples[idx] * (1.0 - frac) + samples[idx + 1] * frac);
        } else if idx < samples.len() {
            out.push(samples[idx]);
        }
    }
    out
}

/// Convert stereo interleaved samples to mono by averaging channels.
pub fn stereo_to_mono(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks(2)
        .map(|pair| {
            if pair.len() == 2 {
                (pair[0] + pair[1]) / 2.0
            } else {
                pair[0]
            }
        })
        .collect()
}

/// Bring captured audio to the pipeline's working shape: mono at the
/// requested rate, whatever shape the hardware delivered.
pub fn normalize_capture(
    samples: Vec<f32>,
    from_rate: u32,
    from_channels: u16,
    to_rate: u32,
) -> Vec<f32> {
    let mono = match from_channels {
        2 => stereo_to_mono(&samples),
        _ => samples,
    };
    if from_rate == to_rate {
        mono
    } else {
        resample(&mono, from_rate, to_rate)
    }
}

/// Encode an utterance to 16-bit PCM WAV bytes.
pub fn encode_wav(audio: &Utterance) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| AudioError::UnsupportedFormat {
                detail: format!("WAV write error: {e}"),
            })?;
        for sample in f32_to_i16(&audio.samples) {
            writer
                .write_sample(sample)
                .map_err(|e| AudioError::UnsupportedFormat {
                    detail: format!("WAV sample write error: {e}"),
                })?;
        }
        writer
            .finalize()
            .map_err(|e| AudioError::UnsupportedFormat {
                detail: format!("WAV finalize error: {e}"),
            })?;
    }
    Ok(cursor.into_inner())
}

/// Decode WAV bytes to an utterance.
pub fn decode_wav(data: &[u8]) -> Result<Utterance, AudioError> {
    let cursor = std::io::Cursor::new(data);
    let mut reader = hound::WavReader::new(cursor).map_err(|e| AudioError::UnsupportedFormat {
        detail: format!("WAV read error: {e}"),
    })?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| AudioError::UnsupportedFormat {
                    detail: format!("WAV sample read error: {e}"),
                })?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| AudioError::UnsupportedFormat {
                detail: format!("WAV float sample read error: {e}"),
            })?,
    };

    Ok(Utterance::new(samples, spec.sample_rate, spec.channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_i16_roundtrip() {
        let original = vec![0.0f32, 0.5, -0.5, 0.25, -0.25];
        let i16s = f32_to_i16(&original);
        let restored = i16_to_f32(&i16s);
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 0.001, "expected {}, got {}", a, b);
        }
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        let i16s = f32_to_i16(&[2.0, -2.0]);
        assert_eq!(i16s[0], i16::MAX);
        assert_eq!(i16s[1], -i16::MAX);
    }

    #[test]
    fn test_stereo_to_mono() {
        let stereo = vec![0.4, 0.6, 0.2, 0.8, -0.5, 0.5];
        let mono = stereo_to_mono(&stereo);
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.5).abs() < 0.001);
        assert!((mono[2] - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_resample_upsample() {
        let samples = vec![0.0, 0.5, 1.0, 0.5];
        let resampled = resample(&samples, 8000, 16000);
        assert!(resampled.len() >= 7);
        assert!((resampled[0] - 0.0).abs() < 0.01);
        assert!(resampled[1] > 0.0 && resampled[1] < 0.5);
    }

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_normalize_capture_downmixes_and_resamples() {
        // interleaved stereo at 48 kHz down to mono 16 kHz
        let stereo: Vec<f32> = (0..96).flat_map(|_| [0.4, 0.6]).collect();
        let normalized = normalize_capture(stereo, 48_000, 2, 16_000);
        assert_eq!(normalized.len(), 32);
        for s in &normalized {
            assert!((s - 0.5).abs() < 0.001);
        }
    }

    #[test]
    fn test_normalize_capture_passthrough() {
        let mono = vec![0.1, 0.2, 0.3];
        assert_eq!(normalize_capture(mono.clone(), 16_000, 1, 16_000), mono);
    }

    #[test]
    fn test_wav_roundtrip() {
        let original = Utterance::new(vec![0.0, 0.25, 0.5, 0.75, 1.0, 0.75, 0.5, 0.25], 16000, 1);
        let wav_bytes = encode_wav(&original).unwrap();
        assert_eq!(&wav_bytes[0..4], b"RIFF");
        assert_eq!(&wav_bytes[8..12], b"WAVE");

        let decoded = decode_wav(&wav_bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), original.samples.len());
        for (a, b) in original.samples.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() < 0.001, "expected {}, got {}", a, b);
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_wav(b"not a wav file").is_err());
    }
}
