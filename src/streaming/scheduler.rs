//! Gapless playback scheduling of incoming audio frames
//!
//! Frames are scheduled in arrival order against the output device clock.
//! Nothing is reordered: a frame that arrives late plays late.

use std::time::Duration;

use log::{debug, trace};

use super::transport::IncomingAudio;
use crate::audio::pcm;
use crate::audio::playback::{PlayableBuffer, PlaybackSink};
use crate::error::Result;

/// Where a buffer landed on the device timeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledBuffer {
    pub start_time: f64,
    pub duration: f64,
    pub sample_count: usize,
}

/// Bookkeeping for one stream of replies
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaybackStats {
    pub buffers_scheduled: u64,
    pub samples_scheduled: u64,
    pub stream_ended: bool,
    /// Device time at which the last scheduled buffer finishes
    pub ends_at: f64,
}

pub struct PlaybackScheduler<S: PlaybackSink> {
    sink: S,
    output_rate: u32,
    guard: f64,
    playhead: f64,
    stats: PlaybackStats,
}

impl<S: PlaybackSink> PlaybackScheduler<S> {
    pub fn new(sink: S, output_rate: u32, guard_interval: Duration) -> Self {
        Self {
            sink,
            output_rate,
            guard: guard_interval.as_secs_f64(),
            playhead: 0.0,
            stats: PlaybackStats::default(),
        }
    }

    /// Decode and schedule one incoming frame
    ///
    /// Returns `Ok(None)` for frames that carry no samples.
    pub fn schedule(&mut self, audio: &IncomingAudio) -> Result<Option<ScheduledBuffer>> {
        let samples = match audio {
            IncomingAudio::Base64(data) => pcm::decode_pcm_frame(&pcm::decode_base64(data)?),
            IncomingAudio::Binary(bytes) => pcm::decode_pcm_frame(bytes),
        };
        Ok(self.schedule_samples(samples))
    }

    /// Schedule already-decoded samples right after the previous buffer
    pub fn schedule_samples(&mut self, samples: Vec<f32>) -> Option<ScheduledBuffer> {
        if samples.is_empty() {
            trace!("Skipping empty audio frame");
            return None;
        }

        let buffer = PlayableBuffer::new(samples, self.output_rate);
        let duration = buffer.duration();
        let sample_count = buffer.samples.len();

        let earliest = self.sink.current_time() + self.guard;
        if self.playhead < earliest {
            self.playhead = earliest;
        }
        let start_time = self.playhead;
        self.sink.schedule(buffer, start_time);
        self.playhead += duration;

        self.stats.buffers_scheduled += 1;
        self.stats.samples_scheduled += sample_count as u64;
        self.stats.ends_at = self.playhead;
        trace!(
            "Scheduled {} samples at {:.3}s ({:.3}s)",
            sample_count,
            start_time,
            duration
        );

        Some(ScheduledBuffer {
            start_time,
            duration,
            sample_count,
        })
    }

    /// Finish bookkeeping for the current stream; scheduled audio keeps playing
    pub fn end_stream(&mut self) -> PlaybackStats {
        self.stats.stream_ended = true;
        debug!(
            "Playback stream ended: {} buffers, audio until {:.3}s",
            self.stats.buffers_scheduled, self.stats.ends_at
        );
        self.stats
    }

    /// Start bookkeeping for a new stream
    pub fn reset(&mut self) {
        self.stats = PlaybackStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose, Engine as _};
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeSink {
        now: Cell<f64>,
        scheduled: RefCell<Vec<(f64, usize)>>,
    }

    impl PlaybackSink for FakeSink {
        fn current_time(&self) -> f64 {
            self.now.get()
        }

        fn schedule(&self, buffer: PlayableBuffer, start_time: f64) {
            self.scheduled
                .borrow_mut()
                .push((start_time, buffer.samples.len()));
        }
    }

    fn scheduler(now: f64) -> PlaybackScheduler<FakeSink> {
        let sink = FakeSink::default();
        sink.now.set(now);
        PlaybackScheduler::new(sink, 1000, Duration::from_millis(150))
    }

    fn pcm_frame(samples: usize) -> IncomingAudio {
        IncomingAudio::Binary(vec![0u8; samples * 2])
    }

    #[test]
    fn test_first_buffer_waits_for_guard() {
        let mut scheduler = scheduler(2.0);
        let first = scheduler.schedule(&pcm_frame(100)).unwrap().unwrap();
        assert!((first.start_time - 2.15).abs() < 1e-9);
        assert!((first.duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_consecutive_buffers_are_gapless() {
        let mut scheduler = scheduler(0.0);
        let durations = [120, 40, 300, 1];
        let scheduled: Vec<ScheduledBuffer> = durations
            .iter()
            .map(|&n| scheduler.schedule(&pcm_frame(n)).unwrap().unwrap())
            .collect();

        for pair in scheduled.windows(2) {
            let expected = pair[0].start_time + pair[0].duration;
            assert!((pair[1].start_time - expected).abs() < 1e-9);
        }
        assert!((scheduler.playhead - (0.15 + 0.461)).abs() < 1e-9);
    }

    #[test]
    fn test_playhead_catches_up_after_idle() {
        let mut scheduler = scheduler(0.0);
        scheduler.schedule(&pcm_frame(100)).unwrap();
        scheduler.sink.now.set(5.0);
        let late = scheduler.schedule(&pcm_frame(100)).unwrap().unwrap();
        assert!((late.start_time - 5.15).abs() < 1e-9);
    }

    #[test]
    fn test_playhead_never_moves_backwards() {
        let mut scheduler = scheduler(1.0);
        scheduler.schedule(&pcm_frame(1000)).unwrap();
        let before = scheduler.playhead;
        scheduler.sink.now.set(0.5);
        let next = scheduler.schedule(&pcm_frame(10)).unwrap().unwrap();
        assert!((next.start_time - before).abs() < 1e-9);
    }

    #[test]
    fn test_base64_with_header() {
        let mut bytes = b"RIFF".to_vec();
        bytes.resize(pcm::WAV_HEADER_LEN, 0);
        bytes.extend_from_slice(&[0u8; 20]);
        let encoded = general_purpose::STANDARD.encode(&bytes);

        let mut scheduler = scheduler(0.0);
        let buffer = scheduler
            .schedule(&IncomingAudio::Base64(encoded))
            .unwrap()
            .unwrap();
        assert_eq!(buffer.sample_count, 10);
    }

    #[test]
    fn test_empty_and_malformed_frames() {
        let mut scheduler = scheduler(0.0);
        assert!(scheduler.schedule(&pcm_frame(0)).unwrap().is_none());
        assert!(scheduler
            .schedule(&IncomingAudio::Base64("%%%".into()))
            .is_err());
        assert_eq!(scheduler.stats.buffers_scheduled, 0);
    }

    #[test]
    fn test_end_stream_keeps_scheduled_audio() {
        let mut scheduler = scheduler(0.0);
        scheduler.schedule(&pcm_frame(100)).unwrap();
        let stats = scheduler.end_stream();
        assert!(stats.stream_ended);
        assert_eq!(stats.buffers_scheduled, 1);
        assert_eq!(scheduler.sink.scheduled.borrow().len(), 1);

        scheduler.reset();
        assert_eq!(scheduler.stats, PlaybackStats::default());
    }
}
