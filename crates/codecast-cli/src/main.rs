//! # codecast-cli
//!
//! Binary entry point for codecast.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading and validation
//! - `codecast serve`: the per-session execution server
//! - `codecast record`: drive a recording from a scripted step file
//! - `codecast replay`: print a recorded session in timeline order

mod script;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codecast_adapters::{Interpreter, Sandbox, serve};
use codecast_core::{
    CodecastConfig, DeviceStatus, FileStore, GeneratorDevice, Phase, PlayerConfig, RetryingStore,
    SessionHandle, SessionOptions, SessionPlayer,
};
use codecast_proto::{SessionId, Snapshot, TimedEvent};
use script::Step;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Output format for the replay command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable timeline
    #[default]
    Table,
    /// One JSON event per line
    Json,
}

/// Codecast - record, replay, and run coding sessions
#[derive(Parser, Debug)]
#[command(name = "codecast", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "codecast.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the execution server
    Serve(ServeArgs),

    /// Record a session from a script of editor steps
    Record(RecordArgs),

    /// Replay a recorded session
    Replay(ReplayArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Override the listen address from config
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Session id to record into
    #[arg(long)]
    session: String,

    /// JSONL file of steps (rename, record, edit, cursor, select, wait, stop)
    #[arg(long)]
    script: PathBuf,

    /// Write the exported WAV clip here
    #[arg(long)]
    clip: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// Session id to replay
    #[arg(long)]
    session: String,

    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0, conflicts_with = "instant")]
    speed: f32,

    /// Print every event without waiting
    #[arg(long)]
    instant: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides the verbosity flag
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config)?;
    match cli.command {
        Commands::Serve(args) => serve_command(config, args).await,
        Commands::Record(args) => record_command(config, args).await,
        Commands::Replay(args) => replay_command(config, args).await,
    }
}

fn load_config(path: &Path) -> Result<CodecastConfig> {
    let config = CodecastConfig::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        eprintln!("{warning}");
    }
    Ok(config)
}

async fn open_store(config: &CodecastConfig) -> Result<Arc<RetryingStore<FileStore>>> {
    let store = FileStore::open(&config.store.path)
        .await
        .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;
    if store.malformed() > 0 {
        warn!(skipped = store.malformed(), "Store journal contained malformed lines");
    }
    Ok(Arc::new(RetryingStore::new(store, config.store.retry)))
}

async fn serve_command(config: CodecastConfig, args: ServeArgs) -> Result<()> {
    let interpreter = Interpreter::from_config(&config.interpreter);
    if !interpreter.is_available() {
        warn!(command = %interpreter.command, "Interpreter not found on PATH; compiles will fail");
    }

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    let sandbox = Arc::new(Sandbox::from_config(&config));
    info!(root = %sandbox.workspace().root().display(), "Session workspaces ready");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });

    serve(listener, sandbox, shutdown)
        .await
        .context("Execution server failed")
}

async fn record_command(config: CodecastConfig, args: RecordArgs) -> Result<()> {
    let id = SessionId::parse(args.session).context("Invalid session id")?;
    let steps = script::load(&args.script)?;
    let store = open_store(&config).await?;

    let device = GeneratorDevice::new(
        config.audio.device,
        config.audio.sample_rate,
        config.audio.channels,
    );
    let handle = SessionHandle::open(
        store,
        id.clone(),
        Some(Box::new(device)),
        SessionOptions::new(config.recorder.owner.clone()),
    )
    .await
    .with_context(|| format!("Failed to open session {id}"))?;

    match handle.ready().await? {
        DeviceStatus::Failed(reason) => warn!(%reason, "Audio device unavailable; recording disabled"),
        status => debug!(?status, "Audio device settled"),
    }

    let result = run_script(&handle, steps, args.clip.as_deref()).await;
    handle.shutdown().await;
    result
}

async fn run_script(handle: &SessionHandle, steps: Vec<Step>, clip_path: Option<&Path>) -> Result<()> {
    for (index, step) in steps.into_iter().enumerate() {
        debug!(step = index + 1, ?step, "Script step");
        match step {
            Step::Rename { name } => handle.rename(name).await?,
            Step::Record => handle.record().await.context("Failed to start recording")?,
            Step::Edit { code, history } => handle.edit(Snapshot::new(code, history)).await?,
            step @ (Step::Cursor { .. } | Step::Select { .. }) => {
                if let Some(selection) = step.selection() {
                    handle.cursor(selection).await?;
                }
            }
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
            Step::Stop => finish_recording(handle, clip_path).await?,
        }
    }

    if handle.state().phase == Phase::Recording {
        info!("Script ended while recording; stopping");
        finish_recording(handle, clip_path).await?;
    }
    Ok(())
}

async fn finish_recording(handle: &SessionHandle, clip_path: Option<&Path>) -> Result<()> {
    let outcome = handle.stop().await.context("Failed to stop recording")?;
    let clip = outcome.clip.wait().await.context("Audio export failed")?;
    info!(
        session = %handle.id(),
        done_ms = outcome.done_ms,
        samples = clip.samples,
        duration_ms = clip.duration_ms,
        "Recording stopped"
    );

    if let Some(path) = clip_path {
        let bytes = clip.decode_bytes().context("Exported clip is not valid base64")?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("Failed to write clip to {}", path.display()))?;
        info!(path = %path.display(), "Clip written");
    }
    Ok(())
}

async fn replay_command(config: CodecastConfig, args: ReplayArgs) -> Result<()> {
    let id = SessionId::parse(args.session).context("Invalid session id")?;
    let store = open_store(&config).await?;

    let player_config = if args.instant {
        PlayerConfig::instant()
    } else {
        PlayerConfig::default().with_speed(args.speed)
    };
    let player = SessionPlayer::load(store.as_ref(), &id)
        .await
        .with_context(|| format!("Failed to load session {id}"))?
        .with_config(player_config);

    if player.skipped() > 0 {
        warn!(skipped = player.skipped(), "Some stored events could not be decoded");
    }

    let meta = player.meta();
    if args.format == OutputFormat::Table {
        println!(
            "Session {} \"{}\" by {} ({} events, {})",
            id,
            meta.name.as_deref().unwrap_or("untitled"),
            meta.owner.as_deref().unwrap_or("unknown"),
            player.events().len(),
            meta.done.map_or_else(|| "not finished".to_string(), |ms| format!("{ms}ms")),
        );
    }

    let format = args.format;
    let mut failed = None;
    player
        .play(|event| {
            if failed.is_some() {
                return;
            }
            match format {
                OutputFormat::Table => println!("{}", format_event(event)),
                OutputFormat::Json => match serde_json::to_string(event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => failed = Some(e),
                },
            }
        })
        .await;
    if let Some(e) = failed {
        return Err(e).context("Failed to encode event");
    }
    Ok(())
}

fn format_event(event: &TimedEvent) -> String {
    match event {
        TimedEvent::Code { offset_ms, snapshot } => {
            let lines = snapshot.code.lines().count();
            let first = snapshot.code.lines().next().unwrap_or("");
            format!("{offset_ms:>8}ms  code    {lines} line(s)  {first}")
        }
        TimedEvent::Selection { offset_ms, selection } => format!(
            "{offset_ms:>8}ms  select  {}:{} -> {}:{}",
            selection.anchor.line, selection.anchor.ch, selection.head.line, selection.head.ch
        ),
    }
}
