//! Client settings persistence using dconf
//!
//! Settings are stored in dconf under `/com/voiceagent/client/`. The chat
//! session id lives here too, so a rerun resumes the same conversation.

use log::{error, warn};

use crate::config::AgentConfig;

const DCONF_PATH: &str = "/com/voiceagent/client/";

/// Keys for dconf settings
mod keys {
    pub const SERVER_URL: &str = "server-url";
    pub const SESSION_ID: &str = "session-id";
    pub const STYLE: &str = "style";
    pub const VOICE_ID: &str = "voice-id";
    pub const MODEL: &str = "model";
    pub const DISABLE_THINKING: &str = "disable-thinking";
}

fn key(name: &str) -> String {
    format!("{}{}", DCONF_PATH, name)
}

fn get_string(name: &str) -> Option<String> {
    dconf_rs::get_string(&key(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn set_string(name: &str, value: &str) {
    if let Err(e) = dconf_rs::set_string(&key(name), value) {
        error!("Failed to save {} to dconf: {}", name, e);
    }
}

/// Get the persisted server base URL
pub fn get_server_url() -> Option<String> {
    get_string(keys::SERVER_URL)
}

/// Persist the server base URL
pub fn set_server_url(url: &str) {
    set_string(keys::SERVER_URL, url);
}

/// Get the last used chat session id
pub fn get_session_id() -> Option<String> {
    get_string(keys::SESSION_ID)
}

/// Persist the chat session id
pub fn set_session_id(session_id: &str) {
    set_string(keys::SESSION_ID, session_id);
}

/// Get the TTS style tag
pub fn get_style() -> Option<String> {
    get_string(keys::STYLE)
}

pub fn set_style(style: &str) {
    set_string(keys::STYLE, style);
}

/// Get the target voice identifier
pub fn get_voice_id() -> Option<String> {
    get_string(keys::VOICE_ID)
}

pub fn set_voice_id(voice_id: &str) {
    set_string(keys::VOICE_ID, voice_id);
}

/// Get the LLM model identifier
pub fn get_model() -> Option<String> {
    get_string(keys::MODEL)
}

pub fn set_model(model: &str) {
    set_string(keys::MODEL, model);
}

/// Get the "disable extended reasoning" preference (defaults to false)
pub fn get_disable_thinking() -> bool {
    dconf_rs::get_boolean(&key(keys::DISABLE_THINKING)).unwrap_or(false)
}

/// Persist the "disable extended reasoning" preference
pub fn set_disable_thinking(disable: bool) {
    if let Err(e) = dconf_rs::set_boolean(&key(keys::DISABLE_THINKING), disable) {
        error!("Failed to save disable-thinking setting to dconf: {}", e);
    }
}

/// Overlay persisted settings onto a configuration
pub fn apply_to(config: &mut AgentConfig) {
    if let Some(raw) = get_server_url() {
        match AgentConfig::parse_server_url(&raw) {
            Ok(url) => config.server_url = url,
            Err(e) => warn!("Ignoring persisted server URL {:?}: {}", raw, e),
        }
    }
    if let Some(style) = get_style() {
        config.style = style;
    }
    if let Some(voice_id) = get_voice_id() {
        config.voice_id = Some(voice_id);
    }
    if let Some(model) = get_model() {
        config.model = model;
    }
    config.disable_thinking = get_disable_thinking();
}
