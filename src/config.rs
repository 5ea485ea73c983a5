//! Runtime configuration
//!
//! Compiled defaults, overridden by persisted settings and then by CLI flags.

use std::time::Duration;
use url::Url;

use crate::error::{AgentError, Result};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STREAM_PATH: &str = "/ws/audio-stream";
pub const DEFAULT_STYLE: &str = "Inspirational";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

/// Clips shorter than this are rejected before upload
pub const MIN_RECORDING_SECS: f64 = 0.5;

/// Settings for the live streaming pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct StreamConfig {
    /// Rate of the PCM frames sent to the server
    pub sample_rate: u32,
    /// Duration of one outbound frame
    pub chunk_ms: u32,
    /// Emitted frames may not exceed this many target frames
    pub max_frame_multiple: usize,
    /// Rate of the PCM the server sends back
    pub playback_rate: u32,
    /// Lead time before the first buffer of a burst
    pub guard_interval: Duration,
    /// Send the trailing partial frame when the stream stops
    pub flush_trailing: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_ms: 100,
            max_frame_multiple: 8,
            playback_rate: 44100,
            guard_interval: Duration::from_millis(150),
            flush_trailing: false,
        }
    }
}

impl StreamConfig {
    /// Samples per outbound frame
    pub fn frame_len(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize) / 1000
    }
}

/// Client-wide configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub server_url: Url,
    /// Explicit websocket endpoint; derived from `server_url` when absent
    pub stream_url: Option<Url>,
    pub style: String,
    pub voice_id: Option<String>,
    pub model: String,
    pub disable_thinking: bool,
    pub request_timeout: Duration,
    /// Longest clip recorded before stopping automatically
    pub max_recording: Duration,
    pub stream: StreamConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            // constant literal, always parses
            server_url: Url::parse(DEFAULT_SERVER_URL).expect("default server URL is valid"),
            stream_url: None,
            style: DEFAULT_STYLE.to_string(),
            voice_id: None,
            model: DEFAULT_MODEL.to_string(),
            disable_thinking: false,
            request_timeout: Duration::from_secs(60),
            max_recording: Duration::from_secs(120),
            stream: StreamConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Parse a server base URL, accepting a missing scheme
    pub fn parse_server_url(raw: &str) -> Result<Url> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(AgentError::InvalidInput("Server URL is empty".to_string()));
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };
        Ok(Url::parse(&with_scheme)?)
    }

    /// Websocket endpoint for live streaming
    pub fn stream_url(&self) -> Result<Url> {
        if let Some(url) = &self.stream_url {
            return Ok(url.clone());
        }
        let mut url = self.server_url.join(DEFAULT_STREAM_PATH)?;
        let scheme = match self.server_url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| AgentError::InvalidInput(format!("Cannot stream over {}", url)))?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len() {
        let config = StreamConfig::default();
        assert_eq!(config.frame_len(), 1600);

        let config = StreamConfig {
            sample_rate: 48000,
            chunk_ms: 20,
            ..Default::default()
        };
        assert_eq!(config.frame_len(), 960);
    }

    #[test]
    fn test_parse_server_url_adds_scheme() {
        let url = AgentConfig::parse_server_url("localhost:8000/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/");
        assert!(AgentConfig::parse_server_url("  ").is_err());
    }

    #[test]
    fn test_stream_url_follows_server_scheme() {
        let mut config = AgentConfig::default();
        assert_eq!(
            config.stream_url().unwrap().as_str(),
            "ws://127.0.0.1:8000/ws/audio-stream"
        );

        config.server_url = Url::parse("https://agent.example.com").unwrap();
        assert_eq!(
            config.stream_url().unwrap().as_str(),
            "wss://agent.example.com/ws/audio-stream"
        );
    }

    #[test]
    fn test_explicit_stream_url_wins() {
        let config = AgentConfig {
            stream_url: Some(Url::parse("ws://10.0.0.2:9000/live").unwrap()),
            ..Default::default()
        };
        assert_eq!(config.stream_url().unwrap().port(), Some(9000));
    }
}
