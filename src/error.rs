//! Error type shared by every component of the client
//!
//! Failures are caught at the boundary of the operation that raised them and
//! turned into a status line with [`AgentError::user_message`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error! status: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Server reported an error: {0}")]
    Server(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Recording too short ({duration:.2}s, need at least {minimum:.2}s)")]
    RecordingTooShort { duration: f64, minimum: f64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;

impl AgentError {
    /// Status line shown to the user for this failure.
    ///
    /// Only the displayed copy differs between categories; callers handle
    /// every error the same way.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::PermissionDenied(_) => {
                "Microphone access denied. Allow microphone access and try again.".to_string()
            }
            AgentError::RecordingTooShort { .. } => {
                "Recording too short. Hold the recording a little longer and try again."
                    .to_string()
            }
            AgentError::InvalidInput(msg) => msg.clone(),
            AgentError::Http(e) if e.is_timeout() => TIMEOUT_MESSAGE.to_string(),
            AgentError::HttpStatus(code) => match status_message(code.as_u16()) {
                Some(message) => message.to_string(),
                None => format!("Something went wrong: {}", self),
            },
            _ => classify(&self.to_string()),
        }
    }
}

const TIMEOUT_MESSAGE: &str = "Request timed out. Please try again.";

fn status_message(code: u16) -> Option<&'static str> {
    match code {
        401 => Some("API key error. Please check your configuration."),
        429 => Some("Rate limit exceeded. Please wait a moment and try again."),
        500..=599 => Some("Server error. Please try again later."),
        _ => None,
    }
}

/// Map raw error text to one of the distinguishable user messages.
///
/// Status codes only count as whole words, so ports and addresses such as
/// `127.0.0.1:5000` do not match.
pub fn classify(text: &str) -> String {
    let lower = text.to_lowercase();
    let status = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter_map(|word| match word {
            "401" | "429" | "500" => word.parse::<u16>().ok(),
            _ => None,
        })
        .find_map(status_message);

    let message = if let Some(message) = status {
        message
    } else if lower.contains("timeout") || lower.contains("timed out") {
        TIMEOUT_MESSAGE
    } else if lower.contains("permission") {
        "Microphone access denied. Allow microphone access and try again."
    } else {
        return format!("Something went wrong: {}", text);
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_map_to_distinct_messages() {
        let auth = AgentError::HttpStatus(reqwest::StatusCode::UNAUTHORIZED).user_message();
        let rate = AgentError::HttpStatus(reqwest::StatusCode::TOO_MANY_REQUESTS).user_message();
        let server =
            AgentError::HttpStatus(reqwest::StatusCode::INTERNAL_SERVER_ERROR).user_message();

        assert!(auth.contains("API key"));
        assert!(rate.contains("Rate limit"));
        assert!(server.contains("Server error"));
    }

    #[test]
    fn test_timeout_and_permission_messages() {
        assert!(classify("operation timed out").contains("timed out"));
        assert!(AgentError::PermissionDenied("EACCES".into())
            .user_message()
            .contains("denied"));
    }

    #[test]
    fn test_unclassified_error_keeps_text() {
        let msg = AgentError::Server("voice not found".into()).user_message();
        assert!(msg.contains("voice not found"));
    }

    #[test]
    fn test_too_short_recording_message() {
        let err = AgentError::RecordingTooShort {
            duration: 0.2,
            minimum: 0.5,
        };
        assert!(err.user_message().contains("too short"));
        assert!(err.to_string().contains("0.20s"));
    }

    #[test]
    fn test_ports_are_not_status_codes() {
        let msg = AgentError::Connection("Failed to connect to ws://127.0.0.1:5000/ws".into())
            .user_message();
        assert!(!msg.contains("Server error"), "{}", msg);
        assert!(msg.contains("127.0.0.1:5000"));

        assert!(classify("error 4010 at port 4290").starts_with("Something went wrong"));
    }

    #[test]
    fn test_status_words_in_server_text() {
        assert!(AgentError::Server("upstream returned 500".into())
            .user_message()
            .contains("Server error"));
        assert!(classify("HTTP error: 401 Unauthorized").contains("API key"));
    }

    #[test]
    fn test_other_server_statuses() {
        let msg = AgentError::HttpStatus(reqwest::StatusCode::BAD_GATEWAY).user_message();
        assert!(msg.contains("Server error"));
        let msg = AgentError::HttpStatus(reqwest::StatusCode::NOT_FOUND).user_message();
        assert!(msg.contains("404"));
    }
}
