//! voice-agent - A terminal client for conversational AI voice agents
//!
//! This is the main entry point for voice-agent.

mod api;
mod app;
mod audio;
mod cli;
mod config;
mod error;
mod models;
mod settings;
mod state;
mod streaming;
mod tokio_runtime;

use anyhow::Context;
use app::VoiceAgent;
use clap::Parser;
use config::AgentConfig;
use log::{error, info};

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    info!("Starting voice-agent");

    // Compiled defaults, then dconf, then flags
    let mut config = AgentConfig::default();
    settings::apply_to(&mut config);
    if let Some(raw) = &args.server {
        config.server_url = AgentConfig::parse_server_url(raw)
            .with_context(|| format!("invalid --server value {:?}", raw))?;
    }
    info!("Server: {}", config.server_url);

    let runtime = tokio_runtime::build().context("failed to start the async runtime")?;
    let result = runtime.block_on(async move {
        let mut agent = VoiceAgent::new(config)?;
        agent.run(args.command).await
    });

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("❌ {}", e.user_message());
        std::process::exit(1);
    }
    Ok(())
}
