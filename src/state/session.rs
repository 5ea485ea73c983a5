use std::fmt;

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Identifier the server keys chat history by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// `session-<unix millis>-<9 lowercase alphanumerics>`
    pub fn generate() -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
        Self(format!("session-{}-{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AgentError::InvalidInput("Session id is empty".to_string()));
        }
        if raw.contains('/') {
            return Err(AgentError::InvalidInput(format!(
                "Session id may not contain '/': {}",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pick the session for this run: an explicit id, else the persisted one,
/// else a new one
pub fn resolve_session(cli_arg: Option<&str>, persisted: Option<&str>) -> Result<SessionId> {
    if let Some(raw) = cli_arg {
        return SessionId::parse(raw);
    }
    if let Some(raw) = persisted {
        match SessionId::parse(raw) {
            Ok(session) => return Ok(session),
            Err(e) => warn!("Ignoring stored session id: {}", e),
        }
    }
    Ok(SessionId::generate())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_format() {
        let session = SessionId::generate();
        let parts: Vec<&str> = session.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(SessionId::generate(), session);
    }

    #[test]
    fn test_parse_rejects_bad_ids() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("a/b").is_err());
        assert_eq!(SessionId::parse(" abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_resolution_order() {
        let explicit = resolve_session(Some("cli"), Some("stored")).unwrap();
        assert_eq!(explicit.as_str(), "cli");

        let stored = resolve_session(None, Some("stored")).unwrap();
        assert_eq!(stored.as_str(), "stored");

        let fresh = resolve_session(None, Some("")).unwrap();
        assert!(fresh.as_str().starts_with("session-"));

        assert!(resolve_session(Some("x/y"), None).is_err());
    }
}
