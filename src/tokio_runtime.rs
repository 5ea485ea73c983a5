//! Tokio runtime for the client
//!
//! Everything that touches session state runs on one current-thread
//! runtime. PipeWire keeps its own threads and only talks to it through
//! channels and the shared playback timeline.

use tokio::runtime::{Builder, Runtime};

use crate::error::Result;

/// Build the single-threaded runtime the client runs on
pub fn build() -> Result<Runtime> {
    Ok(Builder::new_current_thread()
        .thread_name("voice-agent")
        .enable_all()
        .build()?)
}
