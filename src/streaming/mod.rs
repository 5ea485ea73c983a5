//! Live duplex audio streaming
//!
//! Microphone blocks are cut into fixed-length PCM frames and sent over a
//! WebSocket; audio coming back is scheduled for gapless playback.

pub mod chunker;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use session::{SessionEvent, SessionObserver, SessionPhase, SessionSummary, StreamingSession};
