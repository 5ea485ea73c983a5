use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Longest text accepted for synthesis
pub const MAX_TTS_CHARS: usize = 5000;
/// Past this length the user is warned the text is close to the limit
pub const TTS_WARN_CHARS: usize = 4500;

/// Request body for `/api/tts`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TtsRequest {
    pub text: String,
    pub style: String,
}

impl TtsRequest {
    /// Validate and build a request; the text is trimmed
    pub fn new(text: &str, style: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::InvalidInput(
                "Please enter some text to convert to speech".to_string(),
            ));
        }
        let count = text.chars().count();
        if count > MAX_TTS_CHARS {
            return Err(AgentError::InvalidInput(format!(
                "Text is too long ({} characters, maximum {})",
                count, MAX_TTS_CHARS
            )));
        }
        Ok(Self {
            text: text.to_string(),
            style: style.to_string(),
        })
    }

    pub fn is_near_limit(&self) -> bool {
        self.text.chars().count() > TTS_WARN_CHARS
    }
}

/// Reply to `/api/tts`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TtsResponse {
    pub success: bool,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reply to the echo, chat and query endpoints
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub transcribed_text: Option<String>,
    #[serde(default)]
    pub llm_response: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Who said a chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    /// Anything that is not the user is shown as the assistant
    Assistant(String),
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant(_) => "AI",
        }
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Role::User => serializer.serialize_str("user"),
            Role::Assistant(raw) => serializer.serialize_str(raw),
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw == "user" {
            Role::User
        } else {
            Role::Assistant(raw)
        })
    }
}

/// One line of a chat transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Reply to `/agent/chat/{session}/history`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChatHistoryResponse {
    pub success: bool,
    /// Oldest first
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Replies that carry a `success` flag and an error text
pub trait ServerReply {
    fn success(&self) -> bool;
    fn failure_text(&self) -> Option<&str>;
}

macro_rules! server_reply {
    ($($ty:ty),*) => {$(
        impl ServerReply for $ty {
            fn success(&self) -> bool {
                self.success
            }

            fn failure_text(&self) -> Option<&str> {
                self.error.as_deref().or(self.message.as_deref())
            }
        }
    )*};
}

server_reply!(TtsResponse, AgentResponse, ChatHistoryResponse);

/// Turn a `success: false` reply into an error
pub fn check_reply<T: ServerReply>(reply: T, fallback: &str) -> Result<T> {
    if reply.success() {
        Ok(reply)
    } else {
        Err(AgentError::Server(
            reply.failure_text().unwrap_or(fallback).to_string(),
        ))
    }
}
