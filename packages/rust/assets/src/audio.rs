//! Audio helpers: format sniffing, WAV encoding, and duration measurement.
//!
//! WAV payloads are measured with `hound`. Anything else is handed to
//! `ffprobe`.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tokio::process::Command;
use tracing::debug;

/// Container format of a narration payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    /// File extension (without dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }

    /// Guess the format from the first bytes of a payload.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Some(Self::Wav);
        }
        let mpeg_sync = bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0;
        if bytes.starts_with(b"ID3") || mpeg_sync {
            return Some(Self::Mp3);
        }
        None
    }
}

/// Failure measuring an audio file.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run {bin}: {source}")]
    Spawn {
        bin: String,
        source: std::io::Error,
    },

    #[error("ffprobe exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unreadable duration {0:?}")]
    Unparseable(String),
}

// ---------------------------------------------------------------------------
// WAV
// ---------------------------------------------------------------------------

/// Encode `duration_secs` of 16-bit mono PCM silence as a WAV file.
pub fn silence_wav(duration_secs: f64, sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let num_samples = (f64::from(sample_rate) * duration_secs.max(0.0)).round() as u32;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for _ in 0..num_samples {
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Duration of a WAV payload, from its sample count and sample rate.
///
/// Streamed WAVs often carry a placeholder `data` size; the frame count is
/// capped at the frames actually present.
pub fn wav_duration_secs(bytes: &[u8]) -> Option<f64> {
    if AudioFormat::sniff(bytes) != Some(AudioFormat::Wav) {
        return None;
    }

    let reader = WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return None;
    }
    let declared = u64::from(reader.duration());

    let data_start = usize::try_from(reader.into_inner().position()).ok()?;
    let frame_bytes = u64::from(spec.channels) * u64::from(spec.bits_per_sample.div_ceil(8));
    let present = bytes.len().saturating_sub(data_start) as u64 / frame_bytes.max(1);

    Some(declared.min(present) as f64 / f64::from(spec.sample_rate))
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// Measures audio durations, natively for WAV and via `ffprobe` otherwise.
#[derive(Debug, Clone)]
pub struct AudioProbe {
    ffprobe_bin: String,
}

impl AudioProbe {
    pub fn new(ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    /// Duration in seconds of the audio stored at `path` whose contents are
    /// `bytes`.
    pub async fn duration_secs(&self, path: &Path, bytes: &[u8]) -> Result<f64, ProbeError> {
        if let Some(secs) = wav_duration_secs(bytes) {
            return Ok(secs);
        }
        self.ffprobe_duration(path).await
    }

    async fn ffprobe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        debug!(bin = %self.ffprobe_bin, ?path, "probing audio duration");

        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                bin: self.ffprobe_bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        text.parse::<f64>()
            .map_err(|_| ProbeError::Unparseable(text.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_wav_has_expected_duration() {
        let wav = silence_wav(2.5, 22_050).expect("encode");
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        let secs = wav_duration_secs(&wav).expect("measurable");
        assert!((secs - 2.5).abs() < 1e-3);
    }

    #[test]
    fn empty_silence_measures_zero() {
        let wav = silence_wav(0.0, 8_000).expect("encode");
        assert_eq!(wav_duration_secs(&wav), Some(0.0));
    }

    #[test]
    fn streamed_wav_size_is_capped() {
        let mut wav = silence_wav(1.0, 8_000).expect("encode");
        // Placeholder data size far beyond the payload, kept frame aligned.
        let data_size = wav
            .windows(4)
            .position(|w| w == b"data")
            .expect("data chunk")
            + 4;
        wav[data_size..data_size + 4].copy_from_slice(&0x7FFF_FFFEu32.to_le_bytes());
        let secs = wav_duration_secs(&wav).expect("measurable");
        assert!((secs - 1.0).abs() < 1e-6);
    }

    #[test]
    fn truncated_wav_counts_present_frames() {
        let wav = silence_wav(1.0, 8_000).expect("encode");
        let half = &wav[..wav.len() - 8_000];
        let secs = wav_duration_secs(half).expect("measurable");
        assert!((secs - 0.5).abs() < 1e-6);
    }

    #[test]
    fn non_wav_is_not_measured_natively() {
        assert_eq!(wav_duration_secs(b"ID3\x04\x00rest"), None);
        assert_eq!(wav_duration_secs(b""), None);
    }

    #[test]
    fn sniff_formats() {
        let wav = silence_wav(0.1, 8_000).expect("encode");
        assert_eq!(AudioFormat::sniff(&wav), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::sniff(b"ID3\x03"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::sniff(&[0xFF, 0xFB, 0x90]), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::sniff(b"<html>"), None);
    }

    #[tokio::test]
    async fn probe_reports_missing_binary() {
        let probe = AudioProbe::new("storyreel-no-such-ffprobe");
        let err = probe
            .duration_secs(Path::new("/nonexistent.mp3"), b"ID3")
            .await
            .expect_err("binary missing");
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }
}
