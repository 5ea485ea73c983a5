//! Audio capture, playback and processing using PipeWire
//!
//! This module provides:
//! - Microphone capture with volume metering
//! - Timeline playback with a device clock
//! - PCM conversion, resampling and WAV encoding via hound

mod capture;
pub mod pcm;
pub mod playback;
mod recorder;
pub mod resample;

pub use capture::{AudioCapture, CaptureSource, CapturedBlock, SharedCaptureState};
pub use playback::{AudioPlayer, PlayableBuffer, PlaybackSink, SharedPlaybackState};
pub use recorder::{RecordedClip, WavCodec};
