//! Audio playback using PipeWire
//!
//! The output stream renders a timeline of buffers scheduled at absolute
//! device times. The number of frames rendered so far is the device clock.

use log::{debug, error, info, trace, warn};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::resample::resample;
use crate::error::{AgentError, Result};

/// How long `start` waits for the output stream to connect
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Mono float samples ready for the output device
#[derive(Clone, Debug, PartialEq)]
pub struct PlayableBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlayableBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// An output that plays buffers at given times on its own clock
pub trait PlaybackSink {
    /// Current device time in seconds, monotonic
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at device time `start_time`
    fn schedule(&self, buffer: PlayableBuffer, start_time: f64);
}

struct TimelineEntry {
    start_frame: u64,
    samples: Vec<f32>,
}

impl TimelineEntry {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

struct PlaybackStateInner {
    sample_rate: u32,
    /// Frames handed to the device since the stream started
    frames_rendered: u64,
    scheduled: Vec<TimelineEntry>,
    /// Set once the output is gone; nothing would ever drain the timeline
    closed: bool,
}

/// Shared state for audio playback - thread-safe
#[derive(Clone)]
pub struct SharedPlaybackState {
    inner: Arc<Mutex<PlaybackStateInner>>,
}

impl SharedPlaybackState {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackStateInner {
                sample_rate,
                frames_rendered: 0,
                scheduled: Vec::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackStateInner> {
        // a panicked render callback leaves the timeline usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    fn set_sample_rate(&self, rate: u32) {
        if rate > 0 {
            self.lock().sample_rate = rate;
        }
    }

    /// Whether any scheduled audio is still to be played
    pub fn is_idle(&self) -> bool {
        self.lock().scheduled.is_empty()
    }

    fn reopen(&self) {
        self.lock().closed = false;
    }

    /// Drop everything not yet played and refuse new buffers
    fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.scheduled.clear();
    }

    /// Fill `out` with the next output frames and advance the clock
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut inner = self.lock();
        let window_start = inner.frames_rendered;
        let window_end = window_start + out.len() as u64;

        for entry in &inner.scheduled {
            if entry.start_frame >= window_end || entry.end_frame() <= window_start {
                continue;
            }
            let from = entry.start_frame.max(window_start);
            let to = entry.end_frame().min(window_end);
            for frame in from..to {
                let out_idx = (frame - window_start) as usize;
                let src_idx = (frame - entry.start_frame) as usize;
                out[out_idx] += entry.samples[src_idx];
            }
        }

        inner.frames_rendered = window_end;
        inner.scheduled.retain(|entry| entry.end_frame() > window_end);
        drop(inner);
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

impl PlaybackSink for SharedPlaybackState {
    fn current_time(&self) -> f64 {
        let inner = self.lock();
        inner.frames_rendered as f64 / inner.sample_rate as f64
    }

    fn schedule(&self, buffer: PlayableBuffer, start_time: f64) {
        let mut inner = self.lock();
        if inner.closed {
            trace!("Output closed, dropping {} samples", buffer.samples.len());
            return;
        }
        let rate = inner.sample_rate;
        let samples = if buffer.sample_rate != rate {
            resample(&buffer.samples, buffer.sample_rate, rate)
        } else {
            buffer.samples
        };

        let mut start_frame = (start_time.max(0.0) * rate as f64).round() as u64;
        if start_frame < inner.frames_rendered {
            debug!(
                "Buffer scheduled {} frames in the past, playing now",
                inner.frames_rendered - start_frame
            );
            start_frame = inner.frames_rendered;
        }
        trace!("Timeline: {} samples at frame {}", samples.len(), start_frame);
        inner.scheduled.push(TimelineEntry {
            start_frame,
            samples,
        });
    }
}

/// Audio player using PipeWire
pub struct AudioPlayer {
    state: SharedPlaybackState,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PlaybackCommand>>,
}

enum PlaybackCommand {
    Stop,
}

impl AudioPlayer {
    /// Create a new audio player rendering at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: SharedPlaybackState::new(sample_rate),
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
        }
    }

    /// Get the shared timeline, which is also the scheduling sink
    pub fn shared_state(&self) -> SharedPlaybackState {
        self.state.clone()
    }

    /// Check if the output stream is running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Open the output stream; it plays silence until audio is scheduled
    ///
    /// Waits for the device to connect so failures surface here.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.state.reopen();
        self.is_running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let is_running = self.is_running.clone();

        // Create channel for stopping the loop
        let (sender, receiver) = pw::channel::channel::<PlaybackCommand>();
        self.sender = Some(sender);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("voice-agent-playback".to_string())
            .spawn(move || {
                if let Err(e) = run_playback_loop(state.clone(), receiver, ready_tx.clone()) {
                    error!("Playback error: {}", e);
                    let _ = ready_tx.send(Err(e));
                }
                state.close();
                is_running.store(false, Ordering::SeqCst);
            })?;
        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Audio output started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AgentError::Device(
                    "Timed out waiting for the audio output".to_string(),
                ))
            }
        }
    }

    /// Stop the output stream, cutting anything still scheduled
    pub fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PlaybackCommand::Stop);
        }

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Playback thread panicked");
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        self.state.close();
    }

    /// Play a complete clip as soon as possible
    pub fn play_clip(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<f64> {
        self.start()?;
        let buffer = PlayableBuffer::new(samples, sample_rate);
        let duration = buffer.duration();
        let now = self.state.current_time();
        self.state.schedule(buffer, now);
        Ok(duration)
    }

    /// Resolve once every scheduled buffer has been played
    pub async fn wait_until_idle(&self) {
        while self.is_running() && !self.state.is_idle() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn device_err(what: &str, e: &dyn std::fmt::Display) -> AgentError {
    AgentError::Device(format!("Failed to {}: {}", what, e))
}

/// Run the PipeWire playback loop in a background thread
fn run_playback_loop(
    state: SharedPlaybackState,
    receiver: pw::channel::Receiver<PlaybackCommand>,
    ready: std_mpsc::Sender<Result<()>>,
) -> Result<()> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| device_err("create PipeWire main loop", &e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| device_err("create PipeWire context", &e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| device_err("connect to PipeWire", &e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        PlaybackCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedPlaybackState,
        /// Mono mix reused across process callbacks
        mix: Vec<f32>,
    }

    let requested_rate = state.sample_rate();
    let user_data = UserData {
        format: Default::default(),
        state: state.clone(),
        mix: Vec::with_capacity(8192),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Communication",
        *pw::keys::APP_NAME => "Voice Agent",
    };

    let stream = pw::stream::StreamBox::new(&core, "voice-agent-playback", props)
        .map_err(|e| device_err("create PipeWire stream", &e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let (media_type, media_subtype) = match format_utils::parse_format(param) {
                Ok(v) => v,
                Err(_) => return,
            };

            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if let Err(e) = user_data.format.parse(param) {
                error!("Failed to parse playback format: {:?}", e);
                return;
            }
            debug!(
                "Playback format: {} Hz, {} channels",
                user_data.format.rate(),
                user_data.format.channels()
            );
            user_data.state.set_sample_rate(user_data.format.rate());
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let sample_size = std::mem::size_of::<f32>();
            let stride = sample_size * n_channels;

            let Some(slice) = data.data() else {
                return;
            };

            let n_frames = slice.len() / stride;
            user_data.mix.resize(n_frames, 0.0);
            user_data.state.render(&mut user_data.mix);

            for (i, &sample) in user_data.mix.iter().enumerate() {
                let bytes = sample.to_le_bytes();
                for channel in 0..n_channels {
                    let offset = i * stride + channel * sample_size;
                    slice[offset..offset + sample_size].copy_from_slice(&bytes);
                }
            }

            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = stride as i32;
            *chunk.size_mut() = (n_frames * stride) as u32;
        })
        .register()
        .map_err(|e| device_err("register stream listener", &e))?;

    // F32LE mono at the timeline rate
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(requested_rate);
    audio_info.set_channels(1);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| AgentError::Device(format!("Failed to serialize audio format: {:?}", e)))?
    .0
    .into_inner();

    let pod = Pod::from_bytes(&values)
        .ok_or_else(|| AgentError::Device("Invalid audio format pod".to_string()))?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| device_err("connect stream", &e))?;

    let _ = ready.send(Ok(()));
    mainloop.run();

    Ok(())
}
