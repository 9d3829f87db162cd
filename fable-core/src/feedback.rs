//! Audible feedback cues.
//!
//! The device has no screen, so short tones are the only way to tell the
//! listener what state it is in: a rising chime when the wake phrase is
//! heard, a soft tick when listening stops, and a low tone on error. The
//! apology clip is a pre-recorded (or generated) phrase played when a
//! session fails and no synthesized response is available.

use std::f32::consts::PI;
use std::path::Path;

use crate::audio::{convert, Utterance};
use crate::error::AudioError;

const CUE_SAMPLE_RATE: u32 = 16_000;

fn tone(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let count = (duration_secs * CUE_SAMPLE_RATE as f32) as usize;
    let fade = (count / 8).max(1);
    (0..count)
        .map(|i| {
            let t = i as f32 / CUE_SAMPLE_RATE as f32;
            let mut sample = (2.0 * PI * frequency * t).sin() * amplitude;
            if i < fade {
                sample *= i as f32 / fade as f32;
            } else if i >= count - fade {
                sample *= (count - i) as f32 / fade as f32;
            }
            sample
        })
        .collect()
}

/// Rising two-note chime: the wake phrase was heard, speak now.
pub fn wake_chime() -> Utterance {
    let mut samples = tone(523.25, 0.1, 0.4);
    samples.extend(tone(783.99, 0.15, 0.4));
    Utterance::new(samples, CUE_SAMPLE_RATE, 1)
}

/// Soft tick: listening has stopped, the device is thinking.
pub fn listening_done_cue() -> Utterance {
    Utterance::new(tone(659.25, 0.08, 0.25), CUE_SAMPLE_RATE, 1)
}

/// Low falling tone: something went wrong.
pub fn error_tone() -> Utterance {
    let mut samples = tone(329.63, 0.12, 0.35);
    samples.extend(tone(261.63, 0.2, 0.35));
    Utterance::new(samples, CUE_SAMPLE_RATE, 1)
}

/// Load the configured apology clip, or fall back to a generated
/// three-note phrase when no clip is configured or it fails to decode.
pub fn apology_clip(path: Option<&Path>) -> Utterance {
    if let Some(path) = path {
        match load_clip(path) {
            Ok(clip) => return clip,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "apology clip unusable, using generated fallback");
            }
        }
    }
    generated_apology()
}

fn load_clip(path: &Path) -> Result<Utterance, AudioError> {
    let data = std::fs::read(path).map_err(|e| AudioError::UnsupportedFormat {
        detail: format!("read {}: {e}", path.display()),
    })?;
    convert::decode_wav(&data)
}

fn generated_apology() -> Utterance {
    let mut samples = tone(440.0, 0.15, 0.3);
    samples.extend(tone(392.0, 0.15, 0.3));
    samples.extend(tone(349.23, 0.25, 0.3));
    Utterance::new(samples, CUE_SAMPLE_RATE, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cues_are_audible() {
        for cue in [wake_chime(), listening_done_cue(), error_tone()] {
            assert_eq!(cue.sample_rate, CUE_SAMPLE_RATE);
            assert!(cue.rms_energy() > 0.01);
            assert!(cue.duration_secs() < 1.0);
        }
    }

    #[test]
    fn test_apology_falls_back_when_unset() {
        let clip = apology_clip(None);
        assert!(clip.rms_energy() > 0.01);
    }

    #[test]
    fn test_apology_falls_back_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apology.wav");
        std::fs::write(&path, b"not a wav file").unwrap();
        let clip = apology_clip(Some(&path));
        assert!(clip.rms_energy() > 0.01);
    }

    #[test]
    fn test_apology_loads_valid_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apology.wav");
        let original = Utterance::new(tone(440.0, 0.5, 0.5), CUE_SAMPLE_RATE, 1);
        std::fs::write(&path, convert::encode_wav(&original).unwrap()).unwrap();

        let clip = apology_clip(Some(&path));
        assert_eq!(clip.sample_rate, CUE_SAMPLE_RATE);
        assert!((clip.duration_secs() - 0.5).abs() < 0.01);
    }
}
