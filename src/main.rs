use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reflect_gateway::api::{ApiServer, ApiState};
use reflect_gateway::db::{self, TurnRepo};
use reflect_gateway::voice::{CaptureSource, ConsoleCapture, ConsolePlayback, PlaybackSink};
use reflect_gateway::{
    Config, FileIdentityStore, HttpReflectionClient, IdentityStore, OpenAiEngine, Phase,
    ReflectionEngine, TurnController,
};

/// Reflect - talk about your day, hear it reflected back
#[derive(Parser)]
#[command(name = "reflect", version, about)]
struct Cli {
    /// Port for the reflection server (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reflection server
    Serve,
    /// Run a turn-taking session against the reflection server
    Session {
        /// Use the microphone and speakers instead of the console
        #[cfg(feature = "audio")]
        #[arg(long)]
        mic: bool,
    },
    /// Print stored turns
    History {
        /// User ID (defaults to this device's identity)
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Test the playback sink
    Speak {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the playback output.")]
        text: String,

        /// Synthesize and play through the speakers
        #[cfg(feature = "audio")]
        #[arg(long)]
        speaker: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,reflect_gateway=info",
        1 => "info,reflect_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Serve => serve(config).await,
        #[cfg(feature = "audio")]
        Command::Session { mic } => session(config, mic).await,
        #[cfg(not(feature = "audio"))]
        Command::Session {} => session(config, false).await,
        Command::History { user } => history(&config, user),
        #[cfg(feature = "audio")]
        Command::Speak { text, speaker } => speak(&config, &text, speaker).await,
        #[cfg(not(feature = "audio"))]
        Command::Speak { text } => speak(&config, &text, false).await,
    }
}

/// Run the reflection server until interrupted
async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::init(&config.server.database)?;

    let engine: Option<Arc<dyn ReflectionEngine>> = match OpenAiEngine::new(&config.llm) {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            tracing::warn!(error = %e, "reflection engine unavailable; /api/reflect will fail");
            None
        }
    };

    tracing::info!(
        port = config.server.port,
        model = %config.llm.model,
        database = %config.server.database.display(),
        "starting reflection server"
    );

    let server = ApiServer::new(
        ApiState::new(pool, engine),
        config.server.port,
        config.server.static_dir.clone(),
    );
    server.run(shutdown_signal()).await?;

    tracing::info!("reflection server stopped");
    Ok(())
}

/// Run one conversation session until interrupted
async fn session(config: Config, use_audio: bool) -> anyhow::Result<()> {
    let capture = build_capture(&config, use_audio)?;
    let playback = build_playback(&config, use_audio)?;
    let reflection = Arc::new(HttpReflectionClient::new(&config.session.endpoint)?);
    let identity = Arc::new(FileIdentityStore::new(&config.session.identity_file));

    let (controller, handle) =
        TurnController::new(capture, playback, reflection, identity, config.turn.clone());
    let task = tokio::spawn(controller.run());

    tracing::info!(endpoint = %config.session.endpoint, "session started, speak when ready");

    let mut state = handle.state();
    let mut last_phase = Phase::Idle;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                if snapshot.phase != last_phase {
                    tracing::debug!(from = %last_phase, to = %snapshot.phase, "phase changed");
                    last_phase = snapshot.phase;
                }
                if snapshot.phase == Phase::Recording {
                    tracing::trace!(transcript = snapshot.transcript().unwrap_or_default(), "hearing");
                }
            }
        }
    }

    handle.shutdown();
    task.await?;
    tracing::info!("session ended");
    Ok(())
}

/// Print a user's stored turns, oldest first
fn history(config: &Config, user: Option<String>) -> anyhow::Result<()> {
    let user = user
        .or_else(|| FileIdentityStore::new(&config.session.identity_file).get())
        .ok_or_else(|| anyhow::anyhow!("no identity stored yet; pass --user"))?;

    let pool = db::init(&config.server.database)?;
    let turns = TurnRepo::new(pool).list_for_user(&user)?;

    if turns.is_empty() {
        println!("No turns recorded for {user}");
        return Ok(());
    }

    for turn in turns {
        println!(
            "{}  [{}]  {}\n    → {}",
            turn.created_at.format("%Y-%m-%d %H:%M"),
            turn.tone,
            turn.input_text,
            turn.response
        );
    }

    Ok(())
}

/// Speak a line through the playback sink
async fn speak(config: &Config, text: &str, use_audio: bool) -> anyhow::Result<()> {
    let playback = build_playback(config, use_audio)?;
    playback.speak(text).await?;
    Ok(())
}

#[cfg_attr(not(feature = "audio"), allow(clippy::unnecessary_wraps))]
fn build_capture(config: &Config, use_audio: bool) -> anyhow::Result<Box<dyn CaptureSource>> {
    #[cfg(feature = "audio")]
    if use_audio {
        let stt = reflect_gateway::voice::SpeechToText::new(
            config.llm.api_key.clone(),
            &config.llm.base_url,
            config.voice.stt_model.clone(),
        )?;
        return Ok(Box::new(
            reflect_gateway::voice::MicCapture::new(stt).with_utterance_gap(config.turn.silence),
        ));
    }

    #[cfg(not(feature = "audio"))]
    let _ = (config, use_audio);

    Ok(Box::new(ConsoleCapture::stdin()))
}

#[cfg_attr(not(feature = "audio"), allow(clippy::unnecessary_wraps))]
fn build_playback(config: &Config, use_audio: bool) -> anyhow::Result<Arc<dyn PlaybackSink>> {
    #[cfg(feature = "audio")]
    if use_audio {
        let tts = reflect_gateway::voice::TextToSpeech::new(
            config.llm.api_key.clone(),
            &config.llm.base_url,
            &config.voice,
        )?;
        return Ok(Arc::new(reflect_gateway::voice::SpeakerPlayback::new(tts)));
    }

    #[cfg(not(feature = "audio"))]
    let _ = (config, use_audio);

    Ok(Arc::new(ConsolePlayback::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
