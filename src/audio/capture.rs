//! Audio capture using PipeWire
//!
//! Provides microphone capture with volume metering. Captured blocks are
//! either accumulated into a clip or forwarded to a channel as they arrive.

use log::{debug, error, info};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use super::resample::downmix;
use crate::error::{AgentError, Result};

/// How long to wait for the device to come up
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// One device callback worth of mono samples
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Current state of audio capture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Error,
}

/// A microphone the streaming session can drive
pub trait CaptureSource {
    /// Start capturing, forwarding every block to `sink`
    fn start_streaming(&mut self, sink: mpsc::UnboundedSender<CapturedBlock>) -> Result<()>;

    /// Stop capturing and release the device
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Shared state for audio capture - thread-safe
#[derive(Clone)]
pub struct SharedCaptureState {
    inner: Arc<Mutex<CaptureStateInner>>,
}

struct CaptureStateInner {
    /// Smoothed RMS volume level (0.0 - 1.0)
    volume_level: f32,
    /// Peak volume level with slow decay
    peak_level: f32,
    /// Accumulated samples (clip mode only)
    samples: Vec<f32>,
    /// Total captured duration in seconds
    duration: f64,
    state: CaptureState,
    error: Option<String>,
    /// Rate reported by the device
    sample_rate: u32,
    accumulate: bool,
    forward: Option<mpsc::UnboundedSender<CapturedBlock>>,
}

impl SharedCaptureState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureStateInner {
                volume_level: 0.0,
                peak_level: 0.0,
                samples: Vec::new(),
                duration: 0.0,
                state: CaptureState::Idle,
                error: None,
                sample_rate: 48000,
                accumulate: true,
                forward: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureStateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn volume_level(&self) -> f32 {
        self.lock().volume_level
    }

    pub fn peak_level(&self) -> f32 {
        self.lock().peak_level
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    pub fn duration(&self) -> f64 {
        self.lock().duration
    }

    pub fn samples(&self) -> Vec<f32> {
        self.lock().samples.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn set_state(&self, state: CaptureState) {
        self.lock().state = state;
    }

    pub fn set_error(&self, error: String) {
        let mut inner = self.lock();
        inner.error = Some(error);
        inner.state = CaptureState::Error;
    }

    fn set_sample_rate(&self, rate: u32) {
        if rate > 0 {
            self.lock().sample_rate = rate;
        }
    }

    /// Reset for a new capture, choosing clip or forwarding mode
    fn reset(&self, forward: Option<mpsc::UnboundedSender<CapturedBlock>>) {
        let mut inner = self.lock();
        inner.samples.clear();
        inner.duration = 0.0;
        inner.volume_level = 0.0;
        inner.peak_level = 0.0;
        inner.error = None;
        inner.state = CaptureState::Idle;
        inner.accumulate = forward.is_none();
        inner.forward = forward;
    }

    /// Disconnect the forwarding channel; later blocks go nowhere
    fn detach(&self) {
        self.lock().forward = None;
    }

    /// Process incoming audio samples
    pub fn process_samples(&self, samples: &[f32], sample_rate: u32) {
        if sample_rate == 0 {
            return;
        }
        let mut inner = self.lock();
        inner.sample_rate = sample_rate;

        if samples.is_empty() {
            return;
        }

        let rms = calculate_rms(samples);
        inner.volume_level = inner.volume_level * 0.7 + rms * 0.3;
        inner.peak_level = (inner.peak_level * 0.95).max(calculate_peak(samples));
        inner.duration += samples.len() as f64 / sample_rate as f64;

        if inner.accumulate {
            inner.samples.extend_from_slice(samples);
        }

        let delivered = match &inner.forward {
            Some(tx) => tx
                .send(CapturedBlock {
                    samples: samples.to_vec(),
                    sample_rate,
                })
                .is_ok(),
            None => true,
        };
        if !delivered {
            debug!("Capture consumer gone, no longer forwarding");
            inner.forward = None;
        }
    }
}

impl Default for SharedCaptureState {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio capture manager using PipeWire
pub struct AudioCapture {
    state: SharedCaptureState,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PipeWireCommand>>,
}

enum PipeWireCommand {
    Stop,
}

impl AudioCapture {
    /// Create a new audio capture instance
    pub fn new() -> Self {
        Self {
            state: SharedCaptureState::new(),
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
        }
    }

    /// Get shared capture state for level metering
    pub fn shared_state(&self) -> SharedCaptureState {
        self.state.clone()
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Start capturing a clip; samples are returned by [`AudioCapture::stop_recording`]
    pub fn start_recording(&mut self) -> Result<()> {
        self.start(None)
    }

    /// Stop capturing and return the clip and its sample rate
    pub fn stop_recording(&mut self) -> Result<(Vec<f32>, u32)> {
        if !self.is_running() {
            let reason = self
                .state
                .error()
                .unwrap_or_else(|| "Capture not running".to_string());
            self.halt();
            return Err(AgentError::Device(reason));
        }
        let sample_rate = self.state.sample_rate();
        self.halt();
        Ok((self.state.samples(), sample_rate))
    }

    fn start(&mut self, forward: Option<mpsc::UnboundedSender<CapturedBlock>>) -> Result<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(AgentError::Device("Capture already running".to_string()));
        }

        self.state.reset(forward);
        self.state.set_state(CaptureState::Capturing);
        self.is_running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let is_running = self.is_running.clone();

        // Create channel for stopping the loop
        let (sender, receiver) = pw::channel::channel::<PipeWireCommand>();
        self.sender = Some(sender);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("voice-agent-capture".to_string())
            .spawn(move || {
                if let Err(e) = run_capture_loop(state.clone(), receiver, ready_tx.clone()) {
                    state.set_error(e.to_string());
                    let _ = ready_tx.send(Err(e));
                }
                is_running.store(false, Ordering::SeqCst);
            })?;
        self.thread_handle = Some(handle);

        // Wait for the device to come up so failures surface here
        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Microphone capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.halt();
                Err(e)
            }
            Err(_) => {
                self.halt();
                Err(AgentError::Device(
                    "Timed out waiting for the microphone".to_string(),
                ))
            }
        }
    }

    fn halt(&mut self) {
        self.state.detach();

        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PipeWireCommand::Stop);
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }

        self.is_running.store(false, Ordering::SeqCst);
        if self.state.state() != CaptureState::Error {
            self.state.set_state(CaptureState::Idle);
        }
    }
}

impl CaptureSource for AudioCapture {
    fn start_streaming(&mut self, sink: mpsc::UnboundedSender<CapturedBlock>) -> Result<()> {
        self.start(Some(sink))
    }

    fn stop(&mut self) {
        if self.is_running() || self.thread_handle.is_some() {
            self.halt();
            info!("Microphone released");
        }
    }

    fn is_running(&self) -> bool {
        AudioCapture::is_running(self)
    }
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.halt();
        }
    }
}

fn map_device_error(what: &str, e: &dyn std::fmt::Display) -> AgentError {
    let text = e.to_string();
    let lower = text.to_lowercase();
    if lower.contains("permission") || lower.contains("access denied") || lower.contains("eacces")
    {
        AgentError::PermissionDenied(format!("Failed to {}: {}", what, text))
    } else {
        AgentError::Device(format!("Failed to {}: {}", what, text))
    }
}

/// Run the PipeWire capture loop in a background thread
fn run_capture_loop(
    state: SharedCaptureState,
    receiver: pw::channel::Receiver<PipeWireCommand>,
    ready: std_mpsc::Sender<Result<()>>,
) -> Result<()> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| map_device_error("create PipeWire main loop", &e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| map_device_error("create PipeWire context", &e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| map_device_error("connect to PipeWire", &e))?;

    // Set up channel receiver to stop the loop
    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        PipeWireCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedCaptureState,
    }

    let user_data = UserData {
        format: Default::default(),
        state: state.clone(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Communication",
        *pw::keys::APP_NAME => "Voice Agent",
    };

    let stream = pw::stream::StreamBox::new(&core, "voice-agent-capture", props)
        .map_err(|e| map_device_error("create PipeWire stream", &e))?;

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
                error!("Failed to parse capture format: {:?}", e);
                return;
            }
            debug!(
                "Capture format: {} Hz, {} channels",
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
            let sample_rate = user_data.format.rate();
            let size = data.chunk().size() as usize;

            if let Some(raw) = data.data() {
                let end = size.min(raw.len());
                let interleaved: Vec<f32> = raw[..end]
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                let mono = downmix(&interleaved, n_channels);
                user_data.state.process_samples(&mono, sample_rate);
            }
        })
        .register()
        .map_err(|e| map_device_error("register stream listener", &e))?;

    // Request F32LE; rate and channel count follow the device
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);

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
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| map_device_error("connect stream", &e))?;

    let _ = ready.send(Ok(()));

    // Run until stopped
    mainloop.run();

    Ok(())
}

/// Calculate RMS volume from samples
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Calculate peak volume from samples
pub fn calculate_peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_and_peak() {
        assert_eq!(calculate_rms(&[]), 0.0);
        assert!((calculate_rms(&[0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(calculate_peak(&[0.1, -0.8, 0.3]), 0.8);
    }

    #[test]
    fn test_clip_mode_accumulates() {
        let state = SharedCaptureState::new();
        state.reset(None);
        state.process_samples(&[0.1; 480], 48000);
        state.process_samples(&[0.2; 480], 48000);
        assert_eq!(state.samples().len(), 960);
        assert!((state.duration() - 0.02).abs() < 1e-9);
        assert!(state.peak_level() > 0.19);
    }

    #[test]
    fn test_forward_mode_sends_blocks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = SharedCaptureState::new();
        state.reset(Some(tx));
        state.process_samples(&[0.5; 4], 16000);

        let block = rx.try_recv().unwrap();
        assert_eq!(block.samples, vec![0.5; 4]);
        assert_eq!(block.sample_rate, 16000);
        assert!(state.samples().is_empty());
    }

    #[test]
    fn test_detach_stops_forwarding() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = SharedCaptureState::new();
        state.reset(Some(tx));
        state.detach();
        state.process_samples(&[0.5; 4], 16000);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_permission_errors_are_classified() {
        let err = map_device_error("connect stream", &"Permission denied");
        assert!(matches!(err, AgentError::PermissionDenied(_)));
        let err = map_device_error("connect stream", &"no such node");
        assert!(matches!(err, AgentError::Device(_)));
    }
}
