//! WAV encoding of recorded clips using hound
//!
//! Clips are uploaded as 16-bit mono WAV and replies that come back as WAV
//! are decoded for playback.

use hound::{WavSpec, WavWriter};
use std::io::Cursor;

use super::pcm::f32_to_i16;
use crate::config::MIN_RECORDING_SECS;
use crate::error::{AgentError, Result};

/// A finished microphone recording
#[derive(Clone, Debug)]
pub struct RecordedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl RecordedClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        WavCodec::duration_seconds(self.samples.len(), self.sample_rate)
    }

    /// Reject clips too short to be worth uploading
    pub fn ensure_long_enough(&self) -> Result<()> {
        let duration = self.duration_seconds();
        if duration < MIN_RECORDING_SECS {
            return Err(AgentError::RecordingTooShort {
                duration,
                minimum: MIN_RECORDING_SECS,
            });
        }
        Ok(())
    }
}

/// In-memory WAV encoding and decoding
pub struct WavCodec;

impl WavCodec {
    fn spec(sample_rate: u32) -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    /// Encode a clip as an in-memory WAV file
    pub fn encode(clip: &RecordedClip) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, Self::spec(clip.sample_rate))?;
            for &sample in &clip.samples {
                writer.write_sample(f32_to_i16(sample))?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    /// Decode WAV bytes into mono samples and their rate
    pub fn decode(bytes: &[u8]) -> Result<RecordedClip> {
        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        Ok(RecordedClip::new(
            super::resample::downmix(&samples, channels),
            spec.sample_rate,
        ))
    }

    /// Get duration of samples in seconds
    pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        sample_count as f64 / sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_calculation() {
        assert_eq!(WavCodec::duration_seconds(16000, 16000), 1.0);
        assert_eq!(WavCodec::duration_seconds(32000, 16000), 2.0);
        assert_eq!(WavCodec::duration_seconds(8000, 16000), 0.5);
    }

    #[test]
    fn test_encode_decode_keeps_shape() {
        let clip = RecordedClip::new(vec![0.25; 1600], 16000);
        let bytes = WavCodec::encode(&clip).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + 1600 * 2);

        let decoded = WavCodec::decode(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples.len(), 1600);
        assert!((decoded.samples[0] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_short_clip_rejected() {
        let clip = RecordedClip::new(vec![0.0; 4000], 16000);
        assert!(matches!(
            clip.ensure_long_enough(),
            Err(AgentError::RecordingTooShort { .. })
        ));
        assert!(RecordedClip::new(vec![0.0; 8000], 16000)
            .ensure_long_enough()
            .is_ok());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            WavCodec::decode(b"definitely not a wav"),
            Err(AgentError::Wav(_))
        ));
    }
}
