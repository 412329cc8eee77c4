use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use roomctl::api;
use roomctl::areas;
use roomctl::beacon::BeaconMapping;
use roomctl::beacon::BeaconScanner;
use roomctl::config::Config;
use roomctl::console;
use roomctl::dispatch;
use roomctl::engine::AppContext;
use roomctl::engine::Engine;
use roomctl::engine::EngineHandle;
use roomctl::engine::Snapshot;
use roomctl::engine::Trigger;
use roomctl::feedback::Feedback;
use roomctl::format_diagnostics;
use roomctl::hub::Hub;
use roomctl::hub::HubClient;
use roomctl::hub::HubPool;
use roomctl::locator::RoomLocator;
use roomctl::lock::InstanceLock;
use roomctl::logging;
use roomctl::voice::CommandTranscriber;
use roomctl::voice::VoiceAssistant;
use roomctl::window::WindowTimers;
use tokio::sync::watch;

/// Control the Home Assistant devices of the room you are in.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file. Repeat to layer several, earlier files win.
    #[arg(long = "config", short = 'c', default_value = "roomctl.toml")]
    config: Vec<PathBuf>,

    /// Beacon mapping file, overriding `scan.mapping_file`.
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// List the areas of the active hub and exit.
    #[arg(long, short = 'l', conflicts_with = "agent")]
    list_areas: bool,

    /// Run in the background, driven through the control API.
    #[arg(long, short = 'a')]
    agent: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Same as --list-areas.
    Areas,

    /// Same as --agent.
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Foreground,
    Agent,
    ListAreas,
}

impl Cli {
    fn mode(&self) -> Mode {
        match self.command {
            Some(Command::Areas) => Mode::ListAreas,
            Some(Command::Agent) => Mode::Agent,
            None if self.list_areas => Mode::ListAreas,
            None if self.agent => Mode::Agent,
            None => Mode::Foreground,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mode = cli.mode();

    let (config, warnings) = Config::from_files(&cli.config)?;
    logging::init(&config.logging);
    if !warnings.is_empty() {
        eprint!("{}", format_diagnostics(&warnings));
    }

    tracing::info!("roomctl {} starting ({:?})", env!("CARGO_PKG_VERSION"), mode);
    tracing::info!("Loaded config from: {:?}", cli.config);

    let mapping_path = cli
        .mapping
        .clone()
        .unwrap_or_else(|| config.scan.mapping_file.clone());
    let mapping = Arc::new(load_mapping(&mapping_path));
    let hubs = Arc::new(hub_pool(&config)?);

    if mode == Mode::ListAreas {
        return list_areas(&hubs, &mapping).await;
    }

    let _lock = InstanceLock::acquire_default()?;

    let feedback = Feedback::new(config.feedback.sounds);
    let locator = RoomLocator::new(scanner()?, mapping, config.scan.min_rssi);
    let voice = if config.voice.enabled {
        let transcriber = CommandTranscriber::new(config.voice.transcriber.clone())?;
        tracing::info!("Voice control enabled ({})", config.voice.language);
        Some(Arc::new(VoiceAssistant::new(
            config.voice.clone(),
            locator.clone(),
            Arc::new(transcriber),
            feedback,
        )))
    } else {
        None
    };

    // The foreground console stays up until the user quits
    let timers = WindowTimers {
        auto_hide: match mode {
            Mode::Agent => Some(config.display.auto_hide),
            _ => None,
        },
        interaction_hide: config.display.interaction_hide,
        cleanup: config.display.cleanup,
    };

    let (engine, handle) = Engine::new(AppContext {
        display: config.display.clone(),
        filters: config.filters.clone(),
        scan: config.scan.clone(),
        timers,
        hubs,
        locator,
        voice,
        feedback,
        settle: dispatch::SETTLE_DELAY,
    });
    let engine_task = tokio::spawn(engine.run());

    match mode {
        Mode::Agent => run_agent(&config, handle).await?,
        _ => run_foreground(&config, handle).await?,
    }

    engine_task.await.context("Engine task failed")?;
    tracing::info!("roomctl shutdown complete");
    Ok(())
}

fn load_mapping(path: &Path) -> BeaconMapping {
    BeaconMapping::from_file(path).unwrap_or_else(|e| {
        tracing::warn!("No beacon mapping loaded: {}", e);
        BeaconMapping::default()
    })
}

fn hub_pool(config: &Config) -> anyhow::Result<HubPool> {
    let mut hubs: Vec<Arc<dyn Hub>> = Vec::with_capacity(config.hub.instances.len());
    for instance in &config.hub.instances {
        match HubClient::new(&instance.url, &instance.token) {
            Ok(client) => hubs.push(Arc::new(client)),
            Err(e) => tracing::warn!("[{}] Skipping instance {}: {}", instance.url, instance.name, e),
        }
    }

    if hubs.is_empty() {
        anyhow::bail!("No usable Home Assistant instance configured");
    }
    Ok(HubPool::new(hubs))
}

#[cfg(feature = "ble")]
fn scanner() -> anyhow::Result<Arc<dyn BeaconScanner>> {
    Ok(Arc::new(roomctl::beacon::BtleplugScanner::new()))
}

#[cfg(not(feature = "ble"))]
fn scanner() -> anyhow::Result<Arc<dyn BeaconScanner>> {
    anyhow::bail!("roomctl was built without BLE support (feature \"ble\")")
}

async fn list_areas(hubs: &HubPool, mapping: &BeaconMapping) -> anyhow::Result<()> {
    let link = hubs
        .detect_available()
        .await
        .context("No Home Assistant instance available")?;

    let report = areas::report(link.hub.as_ref(), mapping)
        .await
        .with_context(|| format!("Failed to list areas on {}", link.hub.url()))?;
    print!("{}", report);
    Ok(())
}

async fn run_foreground(config: &Config, handle: EngineHandle) -> anyhow::Result<()> {
    handle.send(Trigger::Show).await;

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let result = tokio::select! {
        result = console::run(handle.clone(), input, tokio::io::stdout(), config.voice.enabled) => {
            result.context("Console I/O failed")
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
            Ok(())
        }
    };

    handle.send(Trigger::Quit).await;
    result
}

async fn run_agent(config: &Config, handle: EngineHandle) -> anyhow::Result<()> {
    let hotkeys = api::Hotkeys {
        show: config.agent.show_hotkey.clone(),
        quit: config.agent.quit_hotkey.clone(),
        voice: config
            .voice
            .enabled
            .then(|| config.voice.hotkey.clone()),
    };
    let state = api::AppState::new(handle.clone(), hotkeys);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let listen = config.agent.listen.clone();
    let port = config.agent.port;
    let mut server =
        tokio::spawn(async move { api::serve(&listen, port, state, shutdown_rx).await });

    tracing::info!("Agent ready, press Ctrl+C to exit");

    let mut finished = None;
    tokio::select! {
        result = &mut server => finished = Some(result),
        () = engine_stopped(handle.subscribe()) => tracing::info!("Quit requested"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        },
    }

    handle.send(Trigger::Quit).await;
    let _ = shutdown_tx.send(());

    let result = match finished {
        Some(result) => result,
        None => server.await,
    };
    result
        .context("Control API task failed")?
        .context("Control API failed")
}

/// Resolves once the engine has dropped its snapshot sender.
async fn engine_stopped(mut snapshots: watch::Receiver<Snapshot>) {
    while snapshots.changed().await.is_ok() {}
}
