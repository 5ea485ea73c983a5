//! Live streaming session
//!
//! Owns one chunker, one transport and one scheduler and drives them from a
//! single task. Device threads only forward captured blocks over a channel.

use std::future::Future;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::chunker::{CaptureChunker, FrameSpec, TrailingPolicy};
use super::scheduler::{PlaybackScheduler, PlaybackStats, ScheduledBuffer};
use super::transport::{TransportAdapter, TransportEvent};
use crate::audio::resample::StreamResampler;
use crate::audio::{CaptureSource, CapturedBlock, PlaybackSink};
use crate::config::StreamConfig;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Live,
    Stopping,
    Closed,
}

/// What the session reports while it runs
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Phase(SessionPhase),
    Status(String),
    Transcript { text: String, is_final: bool },
    TurnEnd(Option<String>),
    LlmResponse(String),
    StreamInfo(serde_json::Map<String, serde_json::Value>),
    PlaybackScheduled(ScheduledBuffer),
    PlaybackFinished(PlaybackStats),
    Error(String),
}

pub trait SessionObserver {
    fn on_event(&mut self, event: &SessionEvent);
}

impl<F: FnMut(&SessionEvent)> SessionObserver for F {
    fn on_event(&mut self, event: &SessionEvent) {
        self(event)
    }
}

/// Counters reported when the session ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_oversized: u64,
    pub buffers_scheduled: u64,
    pub transcripts: u64,
    pub llm_replies: u64,
}

pub struct StreamingSession<C: CaptureSource, P: PlaybackSink> {
    capture: C,
    chunker: CaptureChunker,
    transport: TransportAdapter,
    scheduler: PlaybackScheduler<P>,
    capture_rx: Option<mpsc::UnboundedReceiver<CapturedBlock>>,
    inbound: Option<mpsc::UnboundedReceiver<Message>>,
    stream_rate: u32,
    /// Built from the first block whose rate differs from the stream rate
    resampler: Option<StreamResampler>,
    /// Ask the peer for its stream parameters once streaming starts
    want_stream_info: bool,
    phase: SessionPhase,
    observer: Box<dyn SessionObserver>,
    buffers_scheduled: u64,
    transcripts: u64,
    llm_replies: u64,
}

impl<C: CaptureSource, P: PlaybackSink> StreamingSession<C, P> {
    pub fn new(
        capture: C,
        sink: P,
        config: &StreamConfig,
        observer: Box<dyn SessionObserver>,
    ) -> Self {
        let policy = if config.flush_trailing {
            TrailingPolicy::Flush
        } else {
            TrailingPolicy::Discard
        };

        Self {
            capture,
            chunker: CaptureChunker::new(FrameSpec::from_config(config))
                .with_trailing_policy(policy),
            transport: TransportAdapter::new(),
            scheduler: PlaybackScheduler::new(sink, config.playback_rate, config.guard_interval),
            capture_rx: None,
            inbound: None,
            stream_rate: config.sample_rate,
            resampler: None,
            want_stream_info: false,
            phase: SessionPhase::Idle,
            observer,
            buffers_scheduled: 0,
            transcripts: 0,
            llm_replies: 0,
        }
    }

    pub fn with_stream_info(mut self, enabled: bool) -> Self {
        self.want_stream_info = enabled;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            frames_sent: self.transport.frames_sent(),
            frames_dropped: self.transport.frames_dropped(),
            frames_oversized: self.chunker.frames_dropped(),
            buffers_scheduled: self.buffers_scheduled,
            transcripts: self.transcripts,
            llm_replies: self.llm_replies,
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!("Session phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            self.observer.on_event(&SessionEvent::Phase(phase));
        }
    }

    fn notify(&mut self, event: SessionEvent) {
        self.observer.on_event(&event);
    }

    /// Connect, start the microphone and stream until `stop` resolves or
    /// the channel goes away
    pub async fn run<F>(&mut self, url: &Url, stop: F) -> Result<SessionSummary>
    where
        F: Future<Output = ()>,
    {
        self.set_phase(SessionPhase::Connecting);
        let inbound = match self.transport.connect(url).await {
            Ok(inbound) => inbound,
            Err(e) => {
                self.set_phase(SessionPhase::Closed);
                return Err(e);
            }
        };

        self.go_live(inbound)?;
        self.event_loop(stop).await;

        let summary = self.summary();
        info!(
            "Session ended: {} frames sent, {} dropped, {} buffers played",
            summary.frames_sent, summary.frames_dropped, summary.buffers_scheduled
        );
        Ok(summary)
    }

    /// Start capture once the transport is connected
    fn go_live(&mut self, inbound: mpsc::UnboundedReceiver<Message>) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.capture.start_streaming(tx) {
            self.notify(SessionEvent::Error(e.user_message()));
            self.transport.close();
            self.set_phase(SessionPhase::Closed);
            return Err(e);
        }
        self.capture_rx = Some(rx);
        self.inbound = Some(inbound);
        self.set_phase(SessionPhase::Live);
        Ok(())
    }

    async fn event_loop<F>(&mut self, stop: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);

        while self.phase == SessionPhase::Live {
            tokio::select! {
                _ = &mut stop => self.stop(),
                block = recv_or_pending(&mut self.capture_rx) => match block {
                    Some(block) => self.on_captured(block),
                    None => {
                        warn!("Capture stopped delivering audio");
                        self.capture_rx = None;
                    }
                },
                message = recv_or_pending(&mut self.inbound) => match message {
                    Some(message) => self.on_transport_message(message),
                    None => self.on_transport_closed(),
                },
            }
        }
    }

    pub fn on_captured(&mut self, block: CapturedBlock) {
        if block.sample_rate == self.stream_rate {
            self.chunker.on_samples_available(&block.samples);
        } else {
            if self.resampler.as_ref().map(StreamResampler::from_rate) != Some(block.sample_rate) {
                debug!(
                    "Resampling capture from {} Hz to {} Hz",
                    block.sample_rate, self.stream_rate
                );
                match StreamResampler::new(block.sample_rate, self.stream_rate) {
                    Ok(resampler) => self.resampler = Some(resampler),
                    Err(e) => {
                        warn!("Dropping captured block: {}", e);
                        return;
                    }
                }
            }
            let Some(resampler) = self.resampler.as_mut() else {
                return;
            };
            match resampler.process(&block.samples) {
                Ok(samples) => self.chunker.on_samples_available(&samples),
                Err(e) => warn!("Dropping captured block: {}", e),
            }
        }

        for frame in self.chunker.drain_frames() {
            self.transport.send_audio(&frame);
        }
        self.check_transport();
    }

    /// A failed send leaves the transport disconnected; treat it like a close
    fn check_transport(&mut self) {
        if self.phase == SessionPhase::Live && !self.transport.is_connected() {
            warn!("Audio stream writer failed, ending session");
            self.on_transport_closed();
        }
    }

    pub fn on_transport_message(&mut self, message: Message) {
        let Some(event) = self.transport.handle_message(message) else {
            return;
        };

        match event {
            TransportEvent::Audio(audio) => match self.scheduler.schedule(&audio) {
                Ok(Some(buffer)) => {
                    self.buffers_scheduled += 1;
                    self.notify(SessionEvent::PlaybackScheduled(buffer));
                }
                Ok(None) => {}
                Err(e) => warn!("Dropping undecodable audio frame: {}", e),
            },
            TransportEvent::StreamEnd => {
                let stats = self.scheduler.end_stream();
                self.scheduler.reset();
                self.notify(SessionEvent::PlaybackFinished(stats));
            }
            TransportEvent::Welcome(message) => {
                let text = message.unwrap_or_else(|| "Connected".to_string());
                self.notify(SessionEvent::Status(text));
            }
            TransportEvent::StreamStarted => {
                if self.want_stream_info {
                    self.transport.request_stream_info();
                }
                self.notify(SessionEvent::Status("Streaming".to_string()));
                self.check_transport();
            }
            TransportEvent::StreamStopped => {
                self.notify(SessionEvent::Status("Stream stopped".to_string()))
            }
            TransportEvent::StreamInfo(info) => self.notify(SessionEvent::StreamInfo(info)),
            TransportEvent::ServerError(message) => self.notify(SessionEvent::Error(message)),
            TransportEvent::Transcript { text, is_final } => {
                self.transcripts += 1;
                self.notify(SessionEvent::Transcript { text, is_final });
            }
            TransportEvent::TurnEnd(transcript) => {
                self.notify(SessionEvent::TurnEnd(transcript))
            }
            TransportEvent::LlmResponse(text) => {
                self.llm_replies += 1;
                self.notify(SessionEvent::LlmResponse(text));
            }
            TransportEvent::Closed => self.on_transport_closed(),
        }
    }

    /// The channel is gone: release the microphone and stop producing frames
    pub fn on_transport_closed(&mut self) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.transport.mark_disconnected();
        self.capture.stop();
        self.capture_rx = None;
        self.inbound = None;
        self.notify(SessionEvent::Status("Connection closed".to_string()));
        self.set_phase(SessionPhase::Closed);
    }

    /// Local shutdown
    pub fn stop(&mut self) {
        if matches!(self.phase, SessionPhase::Stopping | SessionPhase::Closed) {
            return;
        }
        self.set_phase(SessionPhase::Stopping);

        self.capture.stop();
        self.capture_rx = None;
        debug!("Stopping with {} samples pending", self.chunker.pending_samples());

        if let Some(frame) = self.chunker.finish() {
            self.transport.send_audio(&frame);
        }
        if self.transport.is_connected() {
            self.transport.stop_stream();
        }
        self.transport.close();
        self.inbound = None;

        self.set_phase(SessionPhase::Closed);
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
