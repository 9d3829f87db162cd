//! Fable daemon — wake-word voice interaction for small boards.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use fable_core::audio::AudioDevice;
use fable_core::config::{FableConfig, WakeBackendKind};
use fable_core::error::ConfigError;
use fable_core::monitor::ResourceMonitor;
use fable_core::orchestrator::Orchestrator;
use fable_core::services::{
    ElevenLabsProvider, GeminiProvider, LlmProvider, SttProvider, ToneTtsProvider, TtsProvider,
    WhisperHttpProvider,
};
use fable_core::wake::{
    ButtonBackend, NeuralBackend, PorcupineBackend, TestInjectionBackend, WakeBackend,
};

/// Fable: hands-free spoken interaction daemon
#[derive(Parser, Debug)]
#[command(name = "fable", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration and exit
    ConfigShow,
    /// Validate configuration and wake backend assets, then exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "fable", "fable")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "fable.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let config = fable_core::load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    match cli.command {
        Some(Commands::ConfigShow) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Check) => {
            return check(&config).await;
        }
        None => {}
    }

    run_daemon(config).await
}

/// Validate configuration and report which wake backend would start.
async fn check(config: &FableConfig) -> anyhow::Result<()> {
    println!("Configuration valid.");
    println!("  wake backend: {:?}", config.wake.backend);
    println!("  threshold:    {}", config.wake.threshold);
    println!(
        "  test channel: {}",
        if config.test_channel.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let (tx, _rx) = mpsc::channel(8);
    let mut backend = build_wake_backend(config)?;
    match backend.start(tx).await {
        Ok(()) => {
            println!("  backend '{}' started ok", backend.name());
            backend.stop().await;
        }
        Err(e) => {
            println!("  backend check failed: {e}");
        }
    }
    Ok(())
}

async fn run_daemon(config: FableConfig) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "fable starting");

    let device = build_audio_device(&config)?;
    let stt = build_stt(&config)?;
    let llm = build_llm(&config)?;
    let tts = build_tts(&config);

    let cancel = CancellationToken::new();
    let (wake_tx, wake_rx) = mpsc::channel(16);

    // Primary wake backend, with button fallback when it cannot start
    let mut backend = build_wake_backend(&config)?;
    if let Err(e) = backend.start(wake_tx.clone()).await {
        warn!(backend = backend.name(), error = %e, "wake backend unavailable");
        match fallback_button(&config) {
            Some(mut button) => {
                info!("falling back to button wake");
                button
                    .start(wake_tx.clone())
                    .await
                    .map_err(|e| anyhow::anyhow!("Button fallback failed: {}", e))?;
                backend = Box::new(button);
            }
            None => {
                return Err(anyhow::anyhow!("No usable wake backend: {}", e));
            }
        }
    }

    // Test injection channel is strictly opt-in
    let mut injection = if config.test_channel.enabled {
        warn!(
            socket = %config.test_channel.socket_path.display(),
            "test injection channel enabled"
        );
        let mut chan = TestInjectionBackend::new(config.test_channel.socket_path.clone());
        chan.start(wake_tx.clone()).await?;
        Some(chan)
    } else {
        None
    };
    drop(wake_tx);

    let mut orchestrator = Orchestrator::new(config.clone(), device, stt, llm, tts);

    let cleanup = orchestrator.cleanup_handle();
    let monitor = ResourceMonitor::spawn(config.monitor.clone(), cancel.clone(), move || {
        let _ = cleanup.try_send(());
    });
    let mut health = monitor.health();

    // Signal handling lives here, not in the library: the only effect
    // of SIGINT/SIGTERM is cancelling the token.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
        signal_cancel.cancel();
    });

    let degraded_watch = tokio::spawn(async move {
        while health.changed().await.is_ok() {
            error!("resource monitor reports degraded health");
        }
    });

    orchestrator.run(wake_rx, cancel.clone()).await;

    // Graceful shutdown: stop producers, give the monitor a bounded
    // window to exit
    info!("shutting down");
    backend.stop().await;
    if let Some(chan) = injection.as_mut() {
        chan.stop().await;
    }
    cancel.cancel();
    if tokio::time::timeout(config.session.shutdown_grace(), monitor.join())
        .await
        .is_err()
    {
        warn!("monitor did not stop within the grace period");
    }
    degraded_watch.abort();

    info!("fable stopped");
    Ok(())
}

fn build_wake_backend(config: &FableConfig) -> anyhow::Result<Box<dyn WakeBackend>> {
    let label = config.wake.label.clone();
    Ok(match config.wake.backend {
        WakeBackendKind::Neural => {
            let model = config
                .wake
                .model_path
                .clone()
                .ok_or_else(|| anyhow::anyhow!("wake.model_path required for neural backend"))?;
            Box::new(NeuralBackend::new(model, label))
        }
        WakeBackendKind::Porcupine => {
            let keyword = config
                .wake
                .model_path
                .clone()
                .ok_or_else(|| anyhow::anyhow!("wake.model_path required for porcupine backend"))?;
            Box::new(PorcupineBackend::new(
                keyword,
                config.wake.access_key.clone(),
                label,
            ))
        }
        WakeBackendKind::Button => {
            let gpio = config
                .wake
                .button_gpio
                .ok_or_else(|| anyhow::anyhow!("wake.button_gpio required for button backend"))?;
            Box::new(ButtonBackend::new(gpio, label))
        }
    })
}

fn fallback_button(config: &FableConfig) -> Option<ButtonBackend> {
    if !config.wake.button_fallback || config.wake.backend == WakeBackendKind::Button {
        return None;
    }
    let gpio = config.wake.button_gpio?;
    Some(ButtonBackend::new(gpio, config.wake.label.clone()))
}

#[cfg(feature = "device")]
fn build_audio_device(config: &FableConfig) -> anyhow::Result<Arc<dyn AudioDevice>> {
    Ok(Arc::new(fable_core::audio::CpalDevice::new(
        config.audio.input_device.clone(),
        config.audio.output_device.clone(),
        config.audio.sample_rate,
        config.audio.channels,
    )))
}

#[cfg(not(feature = "device"))]
fn build_audio_device(_config: &FableConfig) -> anyhow::Result<Arc<dyn AudioDevice>> {
    Err(anyhow::anyhow!(
        "this build has no audio support; rebuild with --features device"
    ))
}

fn build_stt(config: &FableConfig) -> anyhow::Result<Arc<dyn SttProvider>> {
    let api_key = require_env("OPENAI_API_KEY")?;
    Ok(Arc::new(WhisperHttpProvider::new(
        api_key,
        config.stt.base_url.clone(),
    )))
}

fn build_llm(config: &FableConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let api_key = require_env("GEMINI_API_KEY")?;
    Ok(Arc::new(GeminiProvider::new(
        api_key,
        config.llm.model.clone(),
        config.llm.base_url.clone(),
    )))
}

/// Synthesis degrades rather than fails: without a key the daemon still
/// answers with tone rendering.
fn build_tts(config: &FableConfig) -> Arc<dyn TtsProvider> {
    match std::env::var("ELEVENLABS_API_KEY") {
        Ok(api_key) if !api_key.is_empty() => {
            Arc::new(ElevenLabsProvider::new(api_key, config.tts.base_url.clone()))
        }
        _ => {
            warn!("ELEVENLABS_API_KEY not set, using offline tone synthesis");
            Arc::new(ToneTtsProvider::default())
        }
    }
}

fn require_env(var: &str) -> anyhow::Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::EnvVarMissing {
            var: var.to_string(),
        }
        .into()),
    }
}
