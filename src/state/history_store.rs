//! JSON export of chat histories
//!
//! Stores one file per session at
//! ~/.local/share/voice-agent/history/chat-history-<session>.json

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::Result;
use crate::models::ChatMessage;
use crate::state::SessionId;

pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::with_dir(
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("voice-agent")
                .join("history"),
        )
    }

    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, session: &SessionId) -> PathBuf {
        self.dir.join(format!("chat-history-{}.json", session))
    }

    /// Write the history as pretty JSON, replacing any earlier export
    pub fn export(&self, session: &SessionId, history: &[ChatMessage]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(session);
        fs::write(&path, serde_json::to_string_pretty(history)?)?;
        info!("Exported {} messages to {}", history.len(), path.display());
        Ok(path)
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}
