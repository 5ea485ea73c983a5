//! HTTP client for the voice agent server

use log::{debug, info};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use url::Url;

use crate::audio::{RecordedClip, WavCodec};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::models::{
    check_reply, AgentResponse, ChatHistoryResponse, ChatMessage, TtsRequest, TtsResponse,
};
use crate::state::SessionId;

pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("voice-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base: config.server_url.clone(),
        })
    }

    /// Build an endpoint under the base URL; segments are percent-encoded
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                AgentError::InvalidInput(format!("{} cannot be used as a server URL", self.base))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// Resolve an `audio_url` that may be relative to the server
    pub fn resolve(&self, audio_url: &str) -> Result<Url> {
        match Url::parse(audio_url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.base.join(audio_url)?),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::HttpStatus(status));
        }
        Ok(response.json().await?)
    }

    fn clip_part(clip: &RecordedClip, file_name: &str) -> Result<Part> {
        let wav = WavCodec::encode(clip)?;
        debug!("Uploading {} ({} bytes)", file_name, wav.len());
        Ok(Part::bytes(wav)
            .file_name(file_name.to_string())
            .mime_str("audio/wav")?)
    }

    /// Synthesize speech for a piece of text
    pub async fn text_to_speech(&self, request: &TtsRequest) -> Result<TtsResponse> {
        info!(
            "Requesting speech for {} characters in style {}",
            request.text.chars().count(),
            request.style
        );
        let response = self
            .client
            .post(self.endpoint(&["api", "tts"])?)
            .json(request)
            .send()
            .await?;
        check_reply(Self::read_json(response).await?, "Failed to generate speech")
    }

    /// Transcribe a clip and have it spoken back in the configured voice
    pub async fn echo(
        &self,
        clip: &RecordedClip,
        style: &str,
        voice_id: Option<&str>,
    ) -> Result<AgentResponse> {
        let mut form = Form::new()
            .part("audio_file", Self::clip_part(clip, "echo_recording.wav")?)
            .text("style", style.to_string());
        if let Some(voice_id) = voice_id {
            form = form.text("voice_id", voice_id.to_string());
        }

        let response = self
            .client
            .post(self.endpoint(&["tts", "echo"])?)
            .multipart(form)
            .send()
            .await?;
        check_reply(Self::read_json(response).await?, "Echo processing failed")
    }

    fn query_form(
        clip: &RecordedClip,
        file_name: &str,
        model: &str,
        disable_thinking: bool,
    ) -> Result<Form> {
        Ok(Form::new()
            .part("audio_file", Self::clip_part(clip, file_name)?)
            .text("model", model.to_string())
            .text("disable_thinking", disable_thinking.to_string()))
    }

    /// One chat turn within a session; the server keeps the history
    pub async fn chat(
        &self,
        session: &SessionId,
        clip: &RecordedClip,
        model: &str,
        disable_thinking: bool,
    ) -> Result<AgentResponse> {
        info!("Sending chat turn for {}", session);
        let form = Self::query_form(clip, "chat_query.wav", model, disable_thinking)?;
        let response = self
            .client
            .post(self.endpoint(&["agent", "chat", session.as_str()])?)
            .multipart(form)
            .send()
            .await?;
        check_reply(Self::read_json(response).await?, "Chat processing failed")
    }

    /// One-shot question without history
    pub async fn llm_query(
        &self,
        clip: &RecordedClip,
        model: &str,
        disable_thinking: bool,
    ) -> Result<AgentResponse> {
        let form = Self::query_form(clip, "llm_query.wav", model, disable_thinking)?;
        let response = self
            .client
            .post(self.endpoint(&["llm", "query"])?)
            .multipart(form)
            .send()
            .await?;
        check_reply(Self::read_json(response).await?, "LLM query failed")
    }

    /// Chat history of a session, oldest first
    pub async fn chat_history(&self, session: &SessionId) -> Result<Vec<ChatMessage>> {
        let response = self
            .client
            .get(self.endpoint(&["agent", "chat", session.as_str(), "history"])?)
            .send()
            .await?;
        let reply: ChatHistoryResponse =
            check_reply(Self::read_json(response).await?, "Failed to load chat history")?;
        debug!(
            "Loaded {} messages for {}",
            reply.chat_history.len(),
            session
        );
        Ok(reply.chat_history)
    }

    pub async fn clear_chat_history(&self, session: &SessionId) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&["agent", "chat", session.as_str(), "history"])?)
            .send()
            .await?;
        let _: ChatHistoryResponse =
            check_reply(Self::read_json(response).await?, "Failed to clear chat history")?;
        info!("Chat history cleared for {}", session);
        Ok(())
    }

    /// Fetch the audio behind an `audio_url`
    pub async fn download_audio(&self, audio_url: &str) -> Result<Vec<u8>> {
        let url = self.resolve(audio_url)?;
        debug!("Downloading audio from {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::HttpStatus(status));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        let config = AgentConfig {
            server_url: AgentConfig::parse_server_url(base).unwrap(),
            ..AgentConfig::default()
        };
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_endpoints() {
        let api = client("http://localhost:8000");
        assert_eq!(
            api.endpoint(&["api", "tts"]).unwrap().as_str(),
            "http://localhost:8000/api/tts"
        );

        let session = SessionId::parse("session-1-abc").unwrap();
        assert_eq!(
            api.endpoint(&["agent", "chat", session.as_str(), "history"])
                .unwrap()
                .as_str(),
            "http://localhost:8000/agent/chat/session-1-abc/history"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_encodes() {
        let api = client("https://example.com/voice/");
        assert_eq!(
            api.endpoint(&["agent", "chat", "a b?"]).unwrap().as_str(),
            "https://example.com/voice/agent/chat/a%20b%3F"
        );
    }

    #[test]
    fn test_resolve_audio_urls() {
        let api = client("http://localhost:8000");
        assert_eq!(
            api.resolve("/static/reply.wav").unwrap().as_str(),
            "http://localhost:8000/static/reply.wav"
        );
        assert_eq!(
            api.resolve("https://cdn.example.com/a.mp3").unwrap().as_str(),
            "https://cdn.example.com/a.mp3"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_http_error() {
        let api = client("http://127.0.0.1:9");
        let result = api.download_audio("/static/none.wav").await;
        assert!(matches!(result, Err(AgentError::Http(_))));
    }
}
