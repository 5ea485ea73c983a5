//! Command-line interface for voice-agent
//!
//! Handles argument parsing and logging configuration.

use clap::{Parser, Subcommand};
use log::LevelFilter;

/// voice-agent - Talk to an AI voice agent from the terminal
#[derive(Parser, Debug)]
#[command(name = "voice-agent")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Server base URL for this run (e.g. http://127.0.0.1:8000)
    #[arg(long, global = true)]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Convert text to speech and play it
    Tts {
        text: String,
        #[arg(long)]
        style: Option<String>,
    },

    /// Record yourself and hear it back in an AI voice
    Echo {
        #[arg(long)]
        style: Option<String>,
        #[arg(long)]
        voice_id: Option<String>,
    },

    /// Talk to the agent; the conversation is kept per session
    Chat {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        disable_thinking: bool,
        /// Start recording again after each reply finishes playing
        #[arg(long)]
        continuous: bool,
    },

    /// Ask a single question without history
    Query {
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        disable_thinking: bool,
    },

    /// Show the chat history of a session
    History {
        #[arg(long)]
        session: Option<String>,
        /// Also write the history to a JSON file
        #[arg(long)]
        export: bool,
    },

    /// Delete the chat history of a session
    ClearHistory {
        #[arg(long)]
        session: Option<String>,
    },

    /// Start a fresh chat session
    NewSession,

    /// Stream microphone audio live and play the replies as they arrive
    Stream {
        /// WebSocket endpoint; defaults to <server>/ws/audio-stream
        #[arg(long)]
        ws_url: Option<String>,
        /// Duration of each outbound frame in milliseconds
        #[arg(long)]
        chunk_ms: Option<u32>,
        /// Sample rate of outbound frames
        #[arg(long)]
        sample_rate: Option<u32>,
        /// Sample rate of the audio the server sends back
        #[arg(long)]
        playback_rate: Option<u32>,
        /// Send the last partial frame when stopping
        #[arg(long)]
        flush_trailing: bool,
        /// Ask the server for its stream parameters once streaming starts
        #[arg(long)]
        info: bool,
    },

    /// Check that the microphone can be opened
    MicTest,

    /// Save default settings
    Configure {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        style: Option<String>,
        #[arg(long)]
        voice_id: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        disable_thinking: Option<bool>,
    },
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("voice_agent", args.log_level());

    // Network and audio stacks only at -vvvv
    if args.verbose >= 4 {
        builder.filter_module("tungstenite", args.log_level());
        builder.filter_module("tokio_tungstenite", args.log_level());
        builder.filter_module("reqwest", args.log_level());
        builder.filter_module("hyper", args.log_level());
        builder.filter_module("pipewire", args.log_level());
    }

    builder.format_timestamp_millis().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        let args = Args::parse_from(["voice-agent", "-vv", "mic-test"]);
        assert_eq!(args.log_level(), LevelFilter::Debug);

        let args = Args::parse_from(["voice-agent", "mic-test", "--quiet"]);
        assert_eq!(args.log_level(), LevelFilter::Error);
    }

    #[test]
    fn test_stream_options() {
        let args = Args::parse_from([
            "voice-agent",
            "stream",
            "--chunk-ms",
            "20",
            "--ws-url",
            "ws://localhost:9000/ws",
        ]);
        match args.command {
            Command::Stream {
                chunk_ms, ws_url, ..
            } => {
                assert_eq!(chunk_ms, Some(20));
                assert_eq!(ws_url.as_deref(), Some("ws://localhost:9000/ws"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chat_flags() {
        let args = Args::parse_from([
            "voice-agent",
            "--server",
            "localhost:8000",
            "chat",
            "--continuous",
            "--session",
            "abc",
        ]);
        assert_eq!(args.server.as_deref(), Some("localhost:8000"));
        assert_eq!(
            args.command,
            Command::Chat {
                session: Some("abc".into()),
                model: None,
                disable_thinking: false,
                continuous: true,
            }
        );
    }
}
