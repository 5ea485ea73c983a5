//! Wire messages for the live audio channel
//!
//! Control traffic is JSON tagged by `type`; outbound audio travels as raw
//! binary frames, inbound audio as base64 inside `audio_chunk`.

use serde::{Deserialize, Serialize};

/// Client → server control messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Start,
    StopStream,
    StreamInfo,
}

/// Server → client messages
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AudioWelcome {
        #[serde(default)]
        message: Option<String>,
    },
    StreamStarted {
        #[serde(default)]
        message: Option<String>,
    },
    StreamStopped {
        #[serde(default)]
        message: Option<String>,
    },
    StreamInfo {
        #[serde(flatten)]
        info: serde_json::Map<String, serde_json::Value>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    AudioChunk {
        /// Base64-encoded 16-bit PCM, possibly with a WAV header
        data: String,
    },
    Transcript {
        #[serde(alias = "transcript")]
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    TurnEnd {
        #[serde(default, alias = "text")]
        transcript: Option<String>,
    },
    LlmResponse {
        #[serde(alias = "response", alias = "content")]
        text: String,
    },
    #[serde(alias = "audio_end")]
    StreamEnd,
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn to_json(&self) -> String {
        // unit variants with a string tag always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_messages_serialize() {
        assert_eq!(ControlMessage::Start.to_json(), r#"{"type":"start"}"#);
        assert_eq!(
            ControlMessage::StopStream.to_json(),
            r#"{"type":"stop_stream"}"#
        );
        assert_eq!(
            ControlMessage::StreamInfo.to_json(),
            r#"{"type":"stream_info"}"#
        );
    }

    #[test]
    fn test_parse_audio_chunk() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"audio_chunk","data":"AAA="}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::AudioChunk {
                data: "AAA=".to_string()
            }
        );
    }

    #[test]
    fn test_audio_end_aliases_stream_end() {
        let end: ServerMessage = serde_json::from_str(r#"{"type":"audio_end"}"#).unwrap();
        assert_eq!(end, ServerMessage::StreamEnd);
        let end: ServerMessage = serde_json::from_str(r#"{"type":"stream_end"}"#).unwrap();
        assert_eq!(end, ServerMessage::StreamEnd);
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"vad_event","level":3}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn test_stream_info_keeps_fields() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"stream_info","sample_rate":16000}"#).unwrap();
        match msg {
            ServerMessage::StreamInfo { info } => {
                assert_eq!(info.get("sample_rate"), Some(&serde_json::json!(16000)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_llm_response_field_aliases() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"llm_response","response":"hi"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::LlmResponse {
                text: "hi".to_string()
            }
        );
    }
}
