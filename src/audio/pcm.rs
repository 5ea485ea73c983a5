//! 16-bit PCM conversion and incoming frame decoding

use base64::{engine::general_purpose, Engine as _};

use crate::error::{AgentError, Result};

/// Size of the RIFF/WAV container header prepended to some frames
pub const WAV_HEADER_LEN: usize = 44;

const WAV_MAGIC: &[u8; 4] = b"RIFF";

/// Convert a float sample to int16, clamping to [-1, 1] first
///
/// Scales by 32768 so that decoding with [`i16_to_f32`] lands within one
/// quantization step; +1.0 saturates at `i16::MAX`.
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    (clamped * 32768.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert an int16 sample to float in [-1, 1)
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn floats_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16(s)).collect()
}

pub fn i16_to_floats(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| i16_to_f32(s)).collect()
}

/// Serialize samples as little-endian bytes
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Interpret bytes as little-endian int16 samples
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Whether the buffer starts with a WAV container header
pub fn has_wav_header(bytes: &[u8]) -> bool {
    bytes.len() >= WAV_MAGIC.len() && &bytes[..WAV_MAGIC.len()] == WAV_MAGIC
}

/// Skip the container header when one is present
pub fn strip_wav_header(bytes: &[u8]) -> &[u8] {
    if has_wav_header(bytes) {
        bytes.get(WAV_HEADER_LEN..).unwrap_or(&[])
    } else {
        bytes
    }
}

/// Decode the transport encoding of an incoming audio frame
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| AgentError::Malformed(format!("Failed to decode base64 audio: {}", e)))
}

/// Decode raw frame bytes into normalized float samples
pub fn decode_pcm_frame(bytes: &[u8]) -> Vec<f32> {
    let pcm = strip_wav_header(bytes);
    i16_to_floats(&le_bytes_to_i16(pcm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamps_out_of_range() {
        assert_eq!(f32_to_i16(2.5), i16::MAX);
        assert_eq!(f32_to_i16(-7.0), i16::MIN);
        assert_eq!(f32_to_i16(0.5), 16384);
        assert_eq!(f32_to_i16(f32::NAN), 0);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let pattern: Vec<f32> = (0..512)
            .map(|i| (i as f32 * 0.05).sin() * 0.9)
            .collect();
        let restored = i16_to_floats(&floats_to_i16(&pattern));
        for (original, restored) in pattern.iter().zip(&restored) {
            assert!(
                (original - restored).abs() <= 1.0 / 32768.0 + f32::EPSILON,
                "{} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_le_bytes() {
        let samples = [0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = i16_to_le_bytes(&samples);
        assert_eq!(bytes[2..4], [1, 0]);
        assert_eq!(le_bytes_to_i16(&bytes), samples);
        // trailing odd byte dropped
        assert_eq!(le_bytes_to_i16(&[1, 0, 9]), vec![1]);
    }

    #[test]
    fn test_header_stripped_only_with_magic() {
        let mut with_header = b"RIFF".to_vec();
        with_header.resize(WAV_HEADER_LEN, 0);
        with_header.extend_from_slice(&[0x00, 0x40]);
        assert_eq!(decode_pcm_frame(&with_header), vec![0.5]);

        let bare = [0x00, 0x40, 0x00, 0xc0];
        assert_eq!(decode_pcm_frame(&bare), vec![0.5, -0.5]);
    }

    #[test]
    fn test_truncated_header_yields_nothing() {
        assert!(strip_wav_header(b"RIFF\x00\x00").is_empty());
    }

    #[test]
    fn test_decode_base64() {
        let encoded = general_purpose::STANDARD.encode([0x00u8, 0x40]);
        assert_eq!(decode_base64(&encoded).unwrap(), vec![0x00, 0x40]);
        assert!(matches!(
            decode_base64("not base64!!"),
            Err(AgentError::Malformed(_))
        ));
    }
}
