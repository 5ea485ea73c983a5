//! Command handlers for voice-agent

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use url::Url;

use crate::api::ApiClient;
use crate::audio::{
    pcm, AudioCapture, AudioPlayer, RecordedClip, SharedCaptureState, WavCodec,
};
use crate::cli::Command;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::models::{AgentResponse, ChatMessage, TtsRequest};
use crate::settings;
use crate::state::{resolve_session, AgentState, HistoryStore, SessionId};
use crate::streaming::{SessionEvent, SessionPhase, StreamingSession};

/// Pause between the end of a reply and the next automatic recording
const AUTO_RECORD_DELAY: Duration = Duration::from_secs(1);

/// How often the input level is logged while recording
const LEVEL_LOG_INTERVAL: Duration = Duration::from_millis(500);

/// What stopped a recording
enum RecordOutcome {
    Clip(RecordedClip),
    Quit,
}

/// The terminal front end
pub struct VoiceAgent {
    config: AgentConfig,
    api: ApiClient,
    input: Lines<BufReader<Stdin>>,
}

impl VoiceAgent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let api = ApiClient::new(&config)?;
        Ok(Self {
            config,
            api,
            input: BufReader::new(tokio::io::stdin()).lines(),
        })
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Tts { text, style } => {
                let style = style.unwrap_or_else(|| self.config.style.clone());
                self.text_to_speech(&text, &style).await
            }
            Command::Echo { style, voice_id } => {
                let style = style.unwrap_or_else(|| self.config.style.clone());
                let voice_id = voice_id.or_else(|| self.config.voice_id.clone());
                self.echo(&style, voice_id.as_deref()).await
            }
            Command::Chat {
                session,
                model,
                disable_thinking,
                continuous,
            } => {
                let session = self.session(session.as_deref())?;
                let model = model.unwrap_or_else(|| self.config.model.clone());
                let disable_thinking = disable_thinking || self.config.disable_thinking;
                self.chat(session, &model, disable_thinking, continuous).await
            }
            Command::Query {
                model,
                disable_thinking,
            } => {
                let model = model.unwrap_or_else(|| self.config.model.clone());
                let disable_thinking = disable_thinking || self.config.disable_thinking;
                self.query(&model, disable_thinking).await
            }
            Command::History { session, export } => {
                let session = self.session(session.as_deref())?;
                self.history(&session, export).await
            }
            Command::ClearHistory { session } => {
                let session = self.session(session.as_deref())?;
                self.api.clear_chat_history(&session).await?;
                println!("🗑️  Chat history cleared for {}", session);
                Ok(())
            }
            Command::NewSession => {
                let session = SessionId::generate();
                settings::set_session_id(session.as_str());
                println!("✨ New session: {}", session);
                Ok(())
            }
            Command::Stream {
                ws_url,
                chunk_ms,
                sample_rate,
                playback_rate,
                flush_trailing,
                info,
            } => {
                let mut stream = self.config.stream.clone();
                if let Some(chunk_ms) = chunk_ms {
                    stream.chunk_ms = chunk_ms;
                }
                if let Some(rate) = sample_rate {
                    stream.sample_rate = rate;
                }
                if let Some(rate) = playback_rate {
                    stream.playback_rate = rate;
                }
                stream.flush_trailing |= flush_trailing;
                if stream.frame_len() == 0 {
                    return Err(AgentError::InvalidInput(
                        "Chunk duration and sample rate must be positive".to_string(),
                    ));
                }
                let url = match ws_url {
                    Some(raw) => Url::parse(&raw)?,
                    None => self.config.stream_url()?,
                };
                self.config.stream = stream;
                self.stream(&url, info).await
            }
            Command::MicTest => self.mic_test(),
            Command::Configure {
                server,
                style,
                voice_id,
                model,
                disable_thinking,
            } => configure(server, style, voice_id, model, disable_thinking),
        }
    }

    /// Resolve the session for this run and remember it for the next one
    fn session(&self, explicit: Option<&str>) -> Result<SessionId> {
        let stored = settings::get_session_id();
        let session = resolve_session(explicit, stored.as_deref())?;
        if stored.as_deref() != Some(session.as_str()) {
            settings::set_session_id(session.as_str());
        }
        info!("Using session {}", session);
        Ok(session)
    }

    /// Record until Enter, `q`, Ctrl-C or the length limit
    async fn record_clip(&mut self) -> Result<RecordOutcome> {
        let mut capture = AudioCapture::new();
        let levels = capture.shared_state();
        capture.start_recording()?;
        println!("🎤 Recording... press Enter to stop (q + Enter to quit)");

        let mut quit = false;
        tokio::select! {
            line = self.input.next_line() => match line? {
                Some(line) => quit = line.trim().eq_ignore_ascii_case("q"),
                None => quit = true,
            },
            _ = tokio::time::sleep(self.config.max_recording) => {
                println!("⏱️  Maximum recording length reached");
            }
            _ = tokio::signal::ctrl_c() => quit = true,
            _ = log_levels(levels) => {}
        }

        let (samples, sample_rate) = capture.stop_recording()?;
        if quit {
            return Ok(RecordOutcome::Quit);
        }
        let clip = RecordedClip::new(samples, sample_rate);
        info!(
            "Recorded {:.2}s at {} Hz",
            clip.duration_seconds(),
            clip.sample_rate
        );
        clip.ensure_long_enough()?;
        Ok(RecordOutcome::Clip(clip))
    }

    /// Download and play a reply; audio the player cannot decode is saved
    async fn play_reply(&self, audio_url: &str) -> Result<()> {
        let bytes = self.api.download_audio(audio_url).await?;
        if !pcm::has_wav_header(&bytes) {
            let path = save_reply(&bytes, audio_url)?;
            println!("💾 Reply audio saved to {}", path.display());
            return Ok(());
        }

        let clip = WavCodec::decode(&bytes)?;
        let mut player = AudioPlayer::new(self.config.stream.playback_rate);
        let duration = player.play_clip(clip.samples, clip.sample_rate)?;
        println!("🔊 Playing reply ({:.1}s)", duration);

        tokio::select! {
            _ = player.wait_until_idle() => {}
            _ = tokio::signal::ctrl_c() => println!("⏹️  Playback stopped"),
        }
        player.stop();
        Ok(())
    }

    async fn text_to_speech(&self, text: &str, style: &str) -> Result<()> {
        let request = TtsRequest::new(text, style)?;
        if request.is_near_limit() {
            warn!("Text is close to the length limit");
        }
        println!("🎵 Generating speech...");
        let response = self.api.text_to_speech(&request).await?;
        if let Some(message) = &response.message {
            println!("✅ {}", message);
        }
        match response.audio_url {
            Some(url) => self.play_reply(&url).await,
            None => Err(AgentError::Server("No audio in response".to_string())),
        }
    }

    async fn echo(&mut self, style: &str, voice_id: Option<&str>) -> Result<()> {
        let RecordOutcome::Clip(clip) = self.record_clip().await? else {
            return Ok(());
        };
        println!("🔄 Processing your voice...");
        let response = self.api.echo(&clip, style, voice_id).await?;
        if let Some(text) = &response.transcribed_text {
            println!("🎤 You said: \"{}\"", text);
        }
        self.finish_reply(&response).await
    }

    async fn query(&mut self, model: &str, disable_thinking: bool) -> Result<()> {
        let RecordOutcome::Clip(clip) = self.record_clip().await? else {
            return Ok(());
        };
        println!("🤔 Thinking...");
        let response = self.api.llm_query(&clip, model, disable_thinking).await?;
        print_exchange(&response);
        self.finish_reply(&response).await
    }

    async fn finish_reply(&self, response: &AgentResponse) -> Result<()> {
        if let Some(message) = &response.message {
            println!("✅ {}", message);
        }
        match &response.audio_url {
            Some(url) => self.play_reply(url).await,
            None => Ok(()),
        }
    }

    async fn chat(
        &mut self,
        session: SessionId,
        model: &str,
        disable_thinking: bool,
        continuous: bool,
    ) -> Result<()> {
        match self.api.chat_history(&session).await {
            Ok(history) if !history.is_empty() => {
                println!("📜 Previous conversation:");
                print_history(&history);
            }
            Ok(_) => println!("💬 Ready to chat in {}", session),
            Err(e) => warn!("Could not load chat history: {}", e),
        }

        let mut state = AgentState::new(session);
        loop {
            state.start_recording()?;
            let clip = match self.record_clip().await {
                Ok(RecordOutcome::Clip(clip)) => clip,
                Ok(RecordOutcome::Quit) => {
                    if state.turns > 0 {
                        println!("👋 {} turn(s) in {}", state.turns, state.session);
                    }
                    return Ok(());
                }
                Err(e @ AgentError::RecordingTooShort { .. }) => {
                    println!("⚠️  {}", e.user_message());
                    state.cancel_recording()?;
                    if continuous {
                        continue;
                    }
                    return Ok(());
                }
                Err(e) => {
                    state.fail(&e);
                    return Err(e);
                }
            };

            state.submit_recording()?;
            println!("🤔 {}", state.phase().status_text());
            let response = match self
                .api
                .chat(&state.session, &clip, model, disable_thinking)
                .await
            {
                Ok(response) => response,
                Err(e) if continuous => {
                    // one failed turn does not end a hands-free conversation
                    state.fail(&e);
                    println!("❌ {}", e.user_message());
                    state.recover()?;
                    tokio::time::sleep(AUTO_RECORD_DELAY).await;
                    continue;
                }
                Err(e) => {
                    state.fail(&e);
                    return Err(e);
                }
            };

            print_exchange(&response);
            state.response_received(response.audio_url.is_some())?;

            if let Some(url) = &response.audio_url {
                if let Err(e) = self.play_reply(url).await {
                    warn!("Reply playback failed: {}", e);
                    println!("⚠️  {}", e.user_message());
                }
                state.playback_finished()?;
            }

            if !continuous || !state.can_auto_record() {
                return Ok(());
            }
            debug!("Auto-recording in {:?}", AUTO_RECORD_DELAY);
            tokio::time::sleep(AUTO_RECORD_DELAY).await;
        }
    }

    async fn history(&self, session: &SessionId, export: bool) -> Result<()> {
        let history = self.api.chat_history(session).await?;
        if history.is_empty() {
            println!("No messages in {}", session);
        } else {
            print_history(&history);
        }
        if export {
            let path = HistoryStore::new().export(session, &history)?;
            println!("💾 Exported to {}", path.display());
        }
        Ok(())
    }

    async fn stream(&mut self, url: &Url, stream_info: bool) -> Result<()> {
        let mut player = AudioPlayer::new(self.config.stream.playback_rate);
        player.start()?;

        let mut session = StreamingSession::new(
            AudioCapture::new(),
            player.shared_state(),
            &self.config.stream,
            Box::new(print_session_event),
        )
        .with_stream_info(stream_info);

        println!("🎙️  Streaming to {} - press Enter or Ctrl-C to stop", url);
        let input = &mut self.input;
        let stop = async move {
            tokio::select! {
                _ = input.next_line() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        };

        let summary = session.run(url, stop).await?;
        println!(
            "📊 Sent {} frames ({} dropped), played {} buffers",
            summary.frames_sent, summary.frames_dropped, summary.buffers_scheduled
        );
        if summary.frames_oversized > 0 {
            warn!("{} oversized frames were discarded", summary.frames_oversized);
        }

        tokio::select! {
            _ = player.wait_until_idle() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        player.stop();
        Ok(())
    }

    fn mic_test(&self) -> Result<()> {
        let mut capture = AudioCapture::new();
        capture.start_recording()?;
        let (_, sample_rate) = capture.stop_recording()?;
        println!("✅ Microphone available ({} Hz)", sample_rate);
        Ok(())
    }
}

fn configure(
    server: Option<String>,
    style: Option<String>,
    voice_id: Option<String>,
    model: Option<String>,
    disable_thinking: Option<bool>,
) -> Result<()> {
    if let Some(raw) = server {
        let url = AgentConfig::parse_server_url(&raw)?;
        settings::set_server_url(url.as_str());
    }
    if let Some(style) = style {
        settings::set_style(&style);
    }
    if let Some(voice_id) = voice_id {
        settings::set_voice_id(&voice_id);
    }
    if let Some(model) = model {
        settings::set_model(&model);
    }
    if let Some(disable) = disable_thinking {
        settings::set_disable_thinking(disable);
    }
    println!("✅ Settings saved");
    Ok(())
}

async fn log_levels(levels: SharedCaptureState) {
    let mut interval = tokio::time::interval(LEVEL_LOG_INTERVAL);
    loop {
        interval.tick().await;
        debug!(
            "Input level {:.2} (peak {:.2}), {:.1}s recorded",
            levels.volume_level(),
            levels.peak_level(),
            levels.duration()
        );
    }
}

/// Keep reply audio the player cannot handle
fn save_reply(bytes: &[u8], audio_url: &str) -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voice-agent")
        .join("replies");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(reply_file_name(audio_url));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

fn reply_file_name(audio_url: &str) -> String {
    let without_query = audio_url.split(['?', '#']).next().unwrap_or_default();
    match without_query.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("reply_{}.mp3", chrono::Utc::now().format("%Y%m%d_%H%M%S")),
    }
}

fn print_exchange(response: &AgentResponse) {
    if let Some(text) = &response.transcribed_text {
        println!("You: {}", text);
    }
    if let Some(text) = &response.llm_response {
        println!("AI: {}", text);
    }
}

fn print_history(history: &[ChatMessage]) {
    for message in history {
        println!("{}: {}", message.role.label(), message.content);
    }
}

fn print_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::Phase(SessionPhase::Live) => println!("🟢 Live"),
        SessionEvent::Phase(SessionPhase::Closed) => println!("🔴 Disconnected"),
        SessionEvent::Phase(phase) => debug!("Session phase {:?}", phase),
        SessionEvent::Status(text) => println!("ℹ️  {}", text),
        SessionEvent::Transcript { text, is_final } => {
            if *is_final {
                println!("You: {}", text);
            } else {
                debug!("Partial transcript: {}", text);
            }
        }
        SessionEvent::TurnEnd(Some(text)) => println!("You: {}", text),
        SessionEvent::TurnEnd(None) => debug!("Turn ended"),
        SessionEvent::LlmResponse(text) => println!("AI: {}", text),
        SessionEvent::StreamInfo(info) => println!("ℹ️  {}", serde_json::Value::Object(info.clone())),
        SessionEvent::PlaybackScheduled(buffer) => debug!(
            "Playing {:.3}s at {:.3}s",
            buffer.duration, buffer.start_time
        ),
        SessionEvent::PlaybackFinished(stats) => info!(
            "Reply stream finished: {} buffers",
            stats.buffers_scheduled
        ),
        SessionEvent::Error(text) => println!("❌ {}", crate::error::classify(text)),
    }
}
