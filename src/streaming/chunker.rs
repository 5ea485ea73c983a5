//! Capture chunker: continuous float samples in, fixed-duration PCM frames out

use std::collections::VecDeque;

use log::{trace, warn};

use crate::audio::pcm;
use crate::config::StreamConfig;

/// Frame sizing for the chunker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSpec {
    /// Samples per emitted frame
    pub target_len: usize,
    /// Frames longer than this are discarded
    pub max_len: usize,
}

impl FrameSpec {
    pub fn new(sample_rate: u32, chunk_ms: u32) -> Self {
        let target_len = (sample_rate as usize * chunk_ms as usize) / 1000;
        Self {
            target_len,
            max_len: target_len * 8,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        let target_len = config.frame_len();
        Self {
            target_len,
            max_len: target_len * config.max_frame_multiple,
        }
    }
}

/// What happens to an incomplete remainder when the stream stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrailingPolicy {
    #[default]
    Discard,
    Flush,
}

/// One block of 16-bit PCM ready for the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleFrame {
    pub samples: Vec<i16>,
}

impl SampleFrame {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wire encoding: little-endian int16
    pub fn to_le_bytes(&self) -> Vec<u8> {
        pcm::i16_to_le_bytes(&self.samples)
    }
}

/// Accumulates converted samples and cuts them into frames in capture order
pub struct CaptureChunker {
    spec: FrameSpec,
    policy: TrailingPolicy,
    pending: VecDeque<Vec<i16>>,
    pending_len: usize,
    frames_dropped: u64,
}

impl CaptureChunker {
    pub fn new(spec: FrameSpec) -> Self {
        Self {
            spec,
            policy: TrailingPolicy::default(),
            pending: VecDeque::new(),
            pending_len: 0,
            frames_dropped: 0,
        }
    }

    pub fn with_trailing_policy(mut self, policy: TrailingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of samples waiting for the next frame
    pub fn pending_samples(&self) -> usize {
        self.pending_len
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Append an int16 copy of a captured block
    pub fn on_samples_available(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let converted = pcm::floats_to_i16(samples);
        self.pending_len += converted.len();
        self.pending.push_back(converted);
    }

    /// Cut one frame if enough samples are pending
    ///
    /// Below the target length this is a no-op and may be called repeatedly.
    pub fn try_emit_frame(&mut self) -> Option<SampleFrame> {
        let target = self.spec.target_len;
        if target == 0 || self.pending_len < target {
            return None;
        }

        let samples = self.take_front(target);
        self.checked(SampleFrame { samples })
    }

    /// Emit every complete frame currently available
    pub fn drain_frames(&mut self) -> Vec<SampleFrame> {
        let mut frames = Vec::new();
        while self.pending_len >= self.spec.target_len && self.spec.target_len > 0 {
            if let Some(frame) = self.try_emit_frame() {
                frames.push(frame);
            }
        }
        frames
    }

    /// End of stream: apply the trailing policy and clear pending state
    pub fn finish(&mut self) -> Option<SampleFrame> {
        let remainder = self.pending_len;
        if remainder == 0 {
            return None;
        }
        let samples = self.take_front(remainder);
        match self.policy {
            TrailingPolicy::Flush => self.checked(SampleFrame { samples }),
            TrailingPolicy::Discard => {
                trace!("Discarding {} trailing samples", samples.len());
                None
            }
        }
    }

    fn take_front(&mut self, count: usize) -> Vec<i16> {
        let mut frame = Vec::with_capacity(count);
        while frame.len() < count {
            let Some(mut chunk) = self.pending.pop_front() else {
                break;
            };
            let needed = count - frame.len();
            if chunk.len() > needed {
                // split across the frame boundary, remainder stays in front
                let rest = chunk.split_off(needed);
                self.pending.push_front(rest);
            }
            frame.extend_from_slice(&chunk);
        }
        self.pending_len -= frame.len();
        frame
    }

    fn checked(&mut self, frame: SampleFrame) -> Option<SampleFrame> {
        if frame.len() > self.spec.max_len {
            warn!(
                "Dropping oversized frame: {} samples (limit {})",
                frame.len(),
                self.spec.max_len
            );
            self.frames_dropped += 1;
            return None;
        }
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|i| i as f32 / 32768.0).collect()
    }

    fn spec(target_len: usize) -> FrameSpec {
        FrameSpec {
            target_len,
            max_len: target_len * 8,
        }
    }

    #[test]
    fn test_frame_spec_from_rate() {
        let spec = FrameSpec::new(16000, 100);
        assert_eq!(spec.target_len, 1600);
        assert_eq!(spec.max_len, 12800);
        assert_eq!(FrameSpec::from_config(&StreamConfig::default()), spec);
    }

    #[test]
    fn test_3200_samples_make_two_frames() {
        let mut chunker = CaptureChunker::new(FrameSpec::new(16000, 100));
        chunker.on_samples_available(&vec![0.1; 3200]);

        let frames = chunker.drain_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 1600));
        assert_eq!(chunker.pending_samples(), 0);
    }

    #[test]
    fn test_below_threshold_is_noop() {
        let mut chunker = CaptureChunker::new(spec(10));
        chunker.on_samples_available(&ramp(0, 9));
        assert!(chunker.try_emit_frame().is_none());
        assert!(chunker.try_emit_frame().is_none());
        assert_eq!(chunker.pending_samples(), 9);
    }

    #[test]
    fn test_order_preserved_across_uneven_blocks() {
        let mut chunker = CaptureChunker::new(spec(4));
        let mut next = 0;
        for len in [3, 1, 5, 2, 1] {
            chunker.on_samples_available(&ramp(next, len));
            next += len;
        }

        let frames = chunker.drain_frames();
        assert_eq!(frames.len(), 3);
        let flat: Vec<i16> = frames.iter().flat_map(|f| f.samples.clone()).collect();
        let expected: Vec<i16> = (0..12).collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_remainder_leads_next_frame() {
        let mut chunker = CaptureChunker::new(spec(4));
        chunker.on_samples_available(&ramp(0, 6));
        assert_eq!(chunker.try_emit_frame().unwrap().samples, vec![0, 1, 2, 3]);
        assert!(chunker.try_emit_frame().is_none());
        assert_eq!(chunker.pending_samples(), 2);

        chunker.on_samples_available(&ramp(6, 2));
        assert_eq!(chunker.try_emit_frame().unwrap().samples, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let mut chunker = CaptureChunker::new(FrameSpec {
            target_len: 10,
            max_len: 5,
        });
        chunker.on_samples_available(&ramp(0, 10));
        assert!(chunker.try_emit_frame().is_none());
        assert_eq!(chunker.frames_dropped(), 1);
        assert_eq!(chunker.pending_samples(), 0);
    }

    #[test]
    fn test_emitted_frames_never_exceed_limit() {
        let mut chunker = CaptureChunker::new(spec(7)).with_trailing_policy(TrailingPolicy::Flush);
        for len in [1, 50, 13, 99, 2] {
            chunker.on_samples_available(&vec![0.0; len]);
        }
        let mut frames = chunker.drain_frames();
        frames.extend(chunker.finish());
        assert!(frames.iter().all(|f| f.len() <= 7 * 8));
        let total: usize = frames.iter().map(|f| f.len()).sum();
        assert_eq!(total, 165);
    }

    #[test]
    fn test_trailing_policy() {
        let mut discard = CaptureChunker::new(spec(4));
        discard.on_samples_available(&ramp(0, 3));
        assert!(discard.finish().is_none());
        assert_eq!(discard.pending_samples(), 0);

        let mut flush = CaptureChunker::new(spec(4)).with_trailing_policy(TrailingPolicy::Flush);
        flush.on_samples_available(&ramp(0, 3));
        assert_eq!(flush.finish().unwrap().samples, vec![0, 1, 2]);
    }

    #[test]
    fn test_out_of_range_input_clamped() {
        let mut chunker = CaptureChunker::new(spec(2));
        chunker.on_samples_available(&[3.0, -3.0]);
        assert_eq!(
            chunker.try_emit_frame().unwrap().samples,
            vec![i16::MAX, i16::MIN]
        );
    }

    #[test]
    fn test_frame_wire_bytes() {
        let frame = SampleFrame {
            samples: vec![1, -2],
        };
        assert_eq!(frame.to_le_bytes(), vec![1, 0, 0xfe, 0xff]);
    }
}
