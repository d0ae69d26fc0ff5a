use anyhow::{Context, Result};
use clap::Parser;
use sentry_stream_engine::config::{EngineConfig, ModelName, PatrolMode, StreamConfig};
use sentry_stream_engine::registry::StreamRegistry;
use sentry_stream_engine::stream_engine::Collaborators;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Multi-stream video safety-monitoring engine.
#[derive(Parser, Debug)]
#[command(name = "sentry-stream-engine", version, about)]
struct Cli {
    /// RTSP URL for a single ad-hoc stream. Omit to run with whatever
    /// streams the configured `ConfigStore` already has marked active.
    #[arg(long)]
    rtsp: Option<String>,

    /// Which rule set to evaluate the ad-hoc stream against.
    #[arg(long, value_enum, default_value = "ppe")]
    model: CliModelName,

    /// Identifier for the ad-hoc stream.
    #[arg(long, default_value = "adhoc")]
    stream_id: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliModelName {
    Ppe,
    Ladder,
    Scaffolding,
    CuttingWelding,
    Fire,
    HeavyEquipment,
}

impl From<CliModelName> for ModelName {
    fn from(value: CliModelName) -> Self {
        match value {
            CliModelName::Ppe => ModelName::Ppe,
            CliModelName::Ladder => ModelName::Ladder,
            CliModelName::Scaffolding => ModelName::Scaffolding,
            CliModelName::CuttingWelding => ModelName::CuttingWelding,
            CliModelName::Fire => ModelName::Fire,
            CliModelName::HeavyEquipment => ModelName::HeavyEquipment,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sentry_stream_engine=info")),
        )
        .init();

    gstreamer::init().context("failed to initialize GStreamer")?;

    let cli = Cli::parse();
    let engine_cfg = EngineConfig::from_env();
    let collaborators = Arc::new(Collaborators::standalone(engine_cfg));
    let registry = Arc::new(StreamRegistry::new(Arc::clone(&collaborators)));

    if let Some(rtsp) = cli.rtsp {
        let config = StreamConfig {
            stream_id: cli.stream_id,
            rtsp_link: rtsp,
            model_name: cli.model.into(),
            location: String::new(),
            description: "ad-hoc stream from CLI flags".to_string(),
            is_active: true,
            ptz: None,
            ptz_autotrack: false,
            intrusion_detection: false,
            saving_video: true,
            safe_area: None,
            patrol_area: None,
            patrol_pattern: vec![],
            patrol_home_position: None,
            patrol_enabled: false,
            patrol_mode: PatrolMode::Off,
            enable_focus_during_patrol: false,
        };
        collaborators.config_store.save(&config)?;
    }

    registry.start_active_streams().context("failed to start active streams")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        shutdown_signal.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl+C handler")?;

    info!("sentry-stream-engine running, {} stream(s) active", registry.stream_ids().len());
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down");
    registry.shutdown_all();
    Ok(())
}
