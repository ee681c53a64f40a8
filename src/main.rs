//! Switchboard CLI entry point.
//!
//! Provides `start` and `check` subcommands for running the routing core
//! daemon or validating the configuration without connecting anywhere.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use switchboard::bus::{EventBus, EventFilter, OverflowPolicy};
use switchboard::config::SwitchboardConfig;
use switchboard::logging;
use switchboard::registry::AdapterRegistry;
use switchboard::router::MessageRouter;
use switchboard::transport::http::HttpTransportFactory;

/// Switchboard — routing and adapter core for enterprise chat platforms.
#[derive(Parser)]
#[command(name = "switchboard", version, about)]
struct Cli {
    /// Path to the configuration file (default: `$SWITCHBOARD_CONFIG` or
    /// `./config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the routing core daemon.
    Start,
    /// Load and validate the configuration, then exit.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional .env for credential overrides; absence is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Start => handle_start(cli.config.as_deref()).await,
        Command::Check => handle_check(cli.config.as_deref()),
    }
}

/// Load and validate the configuration, reporting what would run.
fn handle_check(config_path: Option<&Path>) -> anyhow::Result<()> {
    logging::init_cli();

    let config =
        SwitchboardConfig::load(config_path).context("failed to load configuration")?;
    config.validate()?;

    let enabled = config.platforms.enabled_platforms();
    if enabled.is_empty() {
        println!("configuration ok; no platforms enabled");
    } else {
        let names: Vec<&str> = enabled.iter().map(|p| p.as_str()).collect();
        println!("configuration ok; enabled platforms: {}", names.join(", "));
    }
    Ok(())
}

/// Run the routing core until interrupted.
async fn handle_start(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config =
        SwitchboardConfig::load(config_path).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let _logging_guard =
        logging::init_production(&config.service.logs_dir, &config.service.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");

    let bus = Arc::new(EventBus::new(
        config.bus.subscriber_capacity,
        config.bus.overflow,
    ));
    let router = Arc::new(MessageRouter::new(Arc::clone(&bus)));
    let registry = Arc::new(AdapterRegistry::new(
        Arc::clone(&router),
        Box::new(HttpTransportFactory),
    ));

    let logger = spawn_event_logger(&bus);

    let summary = registry.apply(&config).await;
    if summary.started.is_empty() && summary.failed.is_empty() {
        warn!("no platforms enabled; the core will idle until a reload enables one");
    }

    // Hot reload: watch the config file's directory and re-apply on change.
    let config_file = SwitchboardConfig::resolve_path(config_path);
    let (reload_tx, reload_rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = match config_watcher(&config_file, reload_tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "config watcher unavailable, hot reload disabled");
            None
        }
    };
    let reload_task = tokio::spawn(reload_loop(
        reload_rx,
        config,
        config_path.map(Path::to_path_buf),
        Arc::clone(&registry),
    ));

    info!("switchboard ready");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received shutdown signal, stopping");

    reload_task.abort();
    registry.shutdown().await;
    logger.abort();
    info!("switchboard shut down cleanly");
    Ok(())
}

/// Logs every inbound message; doubles as a liveness signal in the logs.
fn spawn_event_logger(bus: &Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut sub = bus.subscribe_with("logger", EventFilter::any(), 1024, OverflowPolicy::DropOldest);
    tokio::spawn(async move {
        while let Some(message) = sub.recv().await {
            info!(
                platform = %message.platform,
                conversation = %message.conversation_id,
                sender = %message.sender_id,
                kind = message.content.kind_name(),
                preview = %message.text_preview(80),
                "inbound message"
            );
        }
    })
}

/// Watch the config file's parent directory for changes.
///
/// The watcher delivers events on its own thread; matching ones are
/// forwarded into the async reload loop through an unbounded channel.
fn config_watcher(
    config_file: &Path,
    tx: tokio::sync::mpsc::UnboundedSender<()>,
) -> anyhow::Result<RecommendedWatcher> {
    let file_name = config_file.file_name().map(std::ffi::OsStr::to_os_string);
    let mut watcher =
        notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            if let Ok(evt) = event {
                let touched = evt
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(std::ffi::OsStr::to_os_string) == file_name);
                if touched {
                    let _ = tx.send(());
                }
            }
        })?;

    let dir = match config_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if dir.is_dir() {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
    }
    Ok(watcher)
}

/// Re-apply configuration whenever the watcher reports a change.
///
/// Invalid or unparseable files are skipped with a warning; the last good
/// configuration stays in force. An unchanged file is ignored entirely.
async fn reload_loop(
    mut events: tokio::sync::mpsc::UnboundedReceiver<()>,
    mut current: SwitchboardConfig,
    config_path: Option<PathBuf>,
    registry: Arc<AdapterRegistry>,
) {
    while events.recv().await.is_some() {
        // Editors fire several filesystem events per save; coalesce them.
        tokio::time::sleep(Duration::from_millis(200)).await;
        while events.try_recv().is_ok() {}

        let loaded = match SwitchboardConfig::load(config_path.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config reload failed, keeping previous configuration");
                continue;
            }
        };
        if let Err(e) = loaded.validate() {
            warn!(error = %e, "reloaded config invalid, keeping previous configuration");
            continue;
        }
        if loaded == current {
            debug!("config file touched but unchanged");
            continue;
        }

        info!("configuration changed, re-applying");
        registry.apply(&loaded).await;
        current = loaded;
    }
}
