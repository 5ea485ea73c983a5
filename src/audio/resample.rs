//! Resampling between the device rate and the stream rate
//!
//! Whole clips go through [`resample`]. Live capture arrives in small
//! device blocks and goes through [`StreamResampler`], which keeps its
//! filter state between blocks.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{AgentError, Result};

/// Stateful mono resampler for a continuous stream
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    from_rate: u32,
    /// Input not yet consumed; the filter takes fixed-size chunks
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(AgentError::InvalidInput(format!(
                "Cannot resample {} Hz to {} Hz",
                from_rate, to_rate
            )));
        }

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        // 10 ms of input per chunk
        let chunk_size = (from_rate / 100).max(1) as usize;
        let ratio = to_rate as f64 / from_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, 1).map_err(|e| {
            AgentError::Device(format!("Failed to create resampler: {:?}", e))
        })?;

        Ok(Self {
            inner,
            from_rate,
            pending: Vec::with_capacity(chunk_size * 2),
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Feed one block and return every output sample now available
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk = [&self.pending[..needed]];
            let mut planar = self
                .inner
                .process(&chunk[..], None)
                .map_err(|e| AgentError::Device(format!("Resampling failed: {:?}", e)))?;
            self.pending.drain(..needed);
            if let Some(channel) = planar.pop() {
                output.extend_from_slice(&channel);
            }
        }
        Ok(output)
    }
}

/// Simple linear resampling
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let idx = src_idx as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples[idx.min(samples.len() - 1)]
        };

        output.push(sample);
    }

    output
}

/// Mix interleaved frames down to mono
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_48k_to_16k() {
        let samples = vec![0.25; 4800];
        let resampled = resample(&samples, 48000, 16000);
        assert_eq!(resampled.len(), 1600);
        assert!(resampled.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_same_rate_is_identity() {
        let samples = vec![0.0, 1.0, 0.0, -1.0];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_upsample_interpolates() {
        let resampled = resample(&[0.0, 1.0], 1, 2);
        assert_eq!(resampled, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_blockwise_stream_matches_whole_clip() {
        let input: Vec<f32> = (0..128_000).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();

        let mut whole = StreamResampler::new(44100, 16000).unwrap();
        let whole_len = whole.process(&input).unwrap().len();

        let mut blockwise = StreamResampler::new(44100, 16000).unwrap();
        let block_len: usize = input
            .chunks(128)
            .map(|block| blockwise.process(block).unwrap().len())
            .sum();

        assert_eq!(block_len, whole_len);
        // Only the last partial 10 ms chunk is held back
        let expected = 128_000.0 * 16000.0 / 44100.0;
        assert!((block_len as f64 - expected).abs() < 170.0);
    }

    #[test]
    fn test_stream_resampler_holds_partial_chunk() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        assert!(resampler.process(&[0.1; 100]).unwrap().is_empty());
        assert!(!resampler.process(&[0.1; 400]).unwrap().is_empty());
        assert_eq!(resampler.from_rate(), 48000);
    }

    #[test]
    fn test_stream_resampler_rejects_zero_rate() {
        assert!(StreamResampler::new(0, 16000).is_err());
    }

    #[test]
    fn test_downmix() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.3], 1), vec![0.3]);
    }
}
