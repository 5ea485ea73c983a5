//! Transport adapter over a WebSocket
//!
//! Wraps the duplex channel with an explicit connection state machine.
//! Outbound audio is at-most-once: frames are dropped unless the peer has
//! acknowledged the stream.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::chunker::SampleFrame;
use super::protocol::{ControlMessage, ServerMessage};
use crate::error::{AgentError, Result};

/// Connection state of the channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// `streaming` is set once the peer acknowledged `start`
    Connected { streaming: bool },
}

/// Encoded audio received from the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncomingAudio {
    Base64(String),
    Binary(Vec<u8>),
}

/// Typed inbound events
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Welcome(Option<String>),
    StreamStarted,
    StreamStopped,
    StreamInfo(serde_json::Map<String, serde_json::Value>),
    ServerError(String),
    Audio(IncomingAudio),
    Transcript { text: String, is_final: bool },
    TurnEnd(Option<String>),
    LlmResponse(String),
    StreamEnd,
    Closed,
}

pub struct TransportAdapter {
    state: ConnectionState,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    frames_sent: u64,
    frames_dropped: u64,
}

impl TransportAdapter {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            outgoing: None,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    pub fn is_streaming(&self) -> bool {
        self.state == ConnectionState::Connected { streaming: true }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Open the channel and announce the session
    ///
    /// Returns the receiver of raw inbound messages; it yields `None` once
    /// the channel is gone.
    pub async fn connect(&mut self, url: &Url) -> Result<mpsc::UnboundedReceiver<Message>> {
        info!("Connecting to audio stream at {}", url);
        self.state = ConnectionState::Connecting;

        let (ws_stream, _) = match connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(AgentError::Connection(format!(
                    "Failed to connect to {}: {}",
                    url, e
                )));
            }
        };

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Message>();
        let (mut ws_sink, mut ws_reader) = ws_stream.split();

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_sink.send(message).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sink.close().await;
            debug!("Audio stream writer finished");
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(message) => {
                        let closing = matches!(message, Message::Close(_));
                        if incoming_tx.send(message).is_err() || closing {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Audio stream reader finished");
        });

        self.attach(outgoing_tx);
        info!("Connected to audio stream");
        Ok(incoming_rx)
    }

    /// Adopt an already-open outgoing queue and send the session start
    pub(crate) fn attach(&mut self, outgoing: mpsc::UnboundedSender<Message>) {
        self.outgoing = Some(outgoing);
        self.state = ConnectionState::Connected { streaming: false };
        self.send_control(ControlMessage::Start);
    }

    fn send_raw(&mut self, message: Message) -> bool {
        let Some(tx) = &self.outgoing else {
            return false;
        };
        if tx.send(message).is_err() {
            warn!("Audio stream writer is gone");
            self.mark_disconnected();
            return false;
        }
        true
    }

    pub fn send_control(&mut self, message: ControlMessage) -> bool {
        if !self.is_connected() {
            debug!("Not connected, dropping control message {:?}", message);
            return false;
        }
        debug!("Sending control message {:?}", message);
        self.send_raw(Message::Text(message.to_json()))
    }

    /// Send one audio frame, or drop it if the stream is not live
    pub fn send_audio(&mut self, frame: &SampleFrame) -> bool {
        if !self.is_streaming() {
            self.frames_dropped += 1;
            trace!("Stream not live, dropping {} samples", frame.len());
            return false;
        }
        let sent = self.send_raw(Message::Binary(frame.to_le_bytes()));
        if sent {
            self.frames_sent += 1;
        } else {
            self.frames_dropped += 1;
        }
        sent
    }

    pub fn request_stream_info(&mut self) -> bool {
        self.send_control(ControlMessage::StreamInfo)
    }

    /// Ask the peer to stop the stream
    pub fn stop_stream(&mut self) -> bool {
        let sent = self.send_control(ControlMessage::StopStream);
        if let ConnectionState::Connected { .. } = self.state {
            self.state = ConnectionState::Connected { streaming: false };
        }
        sent
    }

    /// Close the channel
    pub fn close(&mut self) {
        if self.is_connected() {
            self.send_raw(Message::Close(None));
        }
        self.mark_disconnected();
    }

    pub fn mark_disconnected(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!("Audio stream disconnected");
        }
        self.state = ConnectionState::Disconnected;
        self.outgoing = None;
    }

    /// Interpret one inbound message
    ///
    /// Malformed payloads are logged and ignored.
    pub fn handle_message(&mut self, message: Message) -> Option<TransportEvent> {
        match message {
            Message::Text(text) => self.handle_text(&text),
            Message::Binary(data) => {
                trace!("Received binary audio: {} bytes", data.len());
                Some(TransportEvent::Audio(IncomingAudio::Binary(data)))
            }
            Message::Close(frame) => {
                info!("Audio stream closed by server: {:?}", frame);
                self.mark_disconnected();
                Some(TransportEvent::Closed)
            }
            _ => None,
        }
    }

    fn handle_text(&mut self, text: &str) -> Option<TransportEvent> {
        let parsed = match serde_json::from_str::<ServerMessage>(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring malformed message ({}): {:.80}", e, text);
                return None;
            }
        };

        let event = match parsed {
            ServerMessage::AudioWelcome { message } => TransportEvent::Welcome(message),
            ServerMessage::StreamStarted { .. } => {
                if self.is_connected() {
                    self.state = ConnectionState::Connected { streaming: true };
                }
                TransportEvent::StreamStarted
            }
            ServerMessage::StreamStopped { .. } => {
                if self.is_connected() {
                    self.state = ConnectionState::Connected { streaming: false };
                }
                TransportEvent::StreamStopped
            }
            ServerMessage::StreamInfo { info } => TransportEvent::StreamInfo(info),
            ServerMessage::Error { message } => TransportEvent::ServerError(
                message.unwrap_or_else(|| "Unknown server error".to_string()),
            ),
            ServerMessage::AudioChunk { data } => {
                TransportEvent::Audio(IncomingAudio::Base64(data))
            }
            ServerMessage::Transcript { text, is_final } => {
                TransportEvent::Transcript { text, is_final }
            }
            ServerMessage::TurnEnd { transcript } => TransportEvent::TurnEnd(transcript),
            ServerMessage::LlmResponse { text } => TransportEvent::LlmResponse(text),
            ServerMessage::StreamEnd => TransportEvent::StreamEnd,
            ServerMessage::Unknown => {
                debug!("Ignoring unknown message: {:.80}", text);
                return None;
            }
        };
        Some(event)
    }
}

impl Default for TransportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached() -> (TransportAdapter, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut transport = TransportAdapter::new();
        transport.attach(tx);
        (transport, rx)
    }

    fn frame() -> SampleFrame {
        SampleFrame {
            samples: vec![1, 2, 3],
        }
    }

    fn text(json: &str) -> Message {
        Message::Text(json.to_string())
    }

    #[test]
    fn test_attach_sends_start() {
        let (transport, mut rx) = attached();
        assert_eq!(
            transport.state,
            ConnectionState::Connected { streaming: false }
        );
        assert_eq!(rx.try_recv().unwrap(), text(r#"{"type":"start"}"#));
    }

    #[test]
    fn test_audio_dropped_until_stream_started() {
        let (mut transport, mut rx) = attached();
        let _start = rx.try_recv();

        assert!(!transport.send_audio(&frame()));
        assert!(rx.try_recv().is_err());

        assert_eq!(
            transport.handle_message(text(r#"{"type":"stream_started"}"#)),
            Some(TransportEvent::StreamStarted)
        );
        assert!(transport.is_streaming());
        assert!(transport.send_audio(&frame()));
        assert_eq!(
            rx.try_recv().unwrap(),
            Message::Binary(vec![1, 0, 2, 0, 3, 0])
        );
        assert_eq!(transport.frames_sent(), 1);
        assert_eq!(transport.frames_dropped(), 1);
    }

    #[test]
    fn test_disconnected_drops_everything() {
        let mut transport = TransportAdapter::new();
        assert!(!transport.send_audio(&frame()));
        assert!(!transport.request_stream_info());
        assert_eq!(transport.state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_malformed_message_does_not_break_handling() {
        let (mut transport, _rx) = attached();
        assert_eq!(transport.handle_message(text("not json {")), None);
        assert_eq!(transport.handle_message(text(r#"{"no_type":1}"#)), None);
        assert_eq!(
            transport.handle_message(text(r#"{"type":"llm_response","text":"hello"}"#)),
            Some(TransportEvent::LlmResponse("hello".to_string()))
        );
    }

    #[test]
    fn test_stream_stopped_clears_flag() {
        let (mut transport, _rx) = attached();
        transport.handle_message(text(r#"{"type":"stream_started"}"#));
        transport.handle_message(text(r#"{"type":"stream_stopped"}"#));
        assert_eq!(
            transport.state,
            ConnectionState::Connected { streaming: false }
        );
    }

    #[test]
    fn test_remote_close_disconnects() {
        let (mut transport, _rx) = attached();
        assert_eq!(
            transport.handle_message(Message::Close(None)),
            Some(TransportEvent::Closed)
        );
        assert_eq!(transport.state, ConnectionState::Disconnected);
        assert!(!transport.send_audio(&frame()));
    }

    #[test]
    fn test_stop_then_close() {
        let (mut transport, mut rx) = attached();
        let _start = rx.try_recv();
        transport.handle_message(text(r#"{"type":"stream_started"}"#));

        assert!(transport.stop_stream());
        transport.close();

        assert_eq!(rx.try_recv().unwrap(), text(r#"{"type":"stop_stream"}"#));
        assert_eq!(rx.try_recv().unwrap(), Message::Close(None));
        assert_eq!(transport.state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_writer_gone_marks_disconnected() {
        let (mut transport, rx) = attached();
        transport.handle_message(text(r#"{"type":"stream_started"}"#));
        drop(rx);
        assert!(!transport.send_audio(&frame()));
        assert_eq!(transport.state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_inbound_audio_variants() {
        let (mut transport, _rx) = attached();
        assert_eq!(
            transport.handle_message(text(r#"{"type":"audio_chunk","data":"AAE="}"#)),
            Some(TransportEvent::Audio(IncomingAudio::Base64("AAE=".into())))
        );
        assert_eq!(
            transport.handle_message(Message::Binary(vec![0, 1])),
            Some(TransportEvent::Audio(IncomingAudio::Binary(vec![0, 1])))
        );
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let mut transport = TransportAdapter::new();
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let result = transport.connect(&url).await;
        assert!(matches!(result, Err(AgentError::Connection(_))));
        assert_eq!(transport.state, ConnectionState::Disconnected);
    }
}
