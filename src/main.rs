//! hearthd - the hearth timer service daemon.
//!
//! Usage:
//!   hearthd run [--config hearth.yaml]     Run the service
//!   hearthd prune --older-than-hours 168   Delete old finished/canceled timers

use clap::{Parser, Subcommand};
use hearth::api::{self, ApiConfig};
use hearth::config::{ServiceConfig, StorageConfig};
use hearth::notify::{Dispatcher, HttpPushTransport, InMemoryDeviceRegistry, PushNotifier};
use hearth::wire::{PublishError, TopicScheme, WirePublisher, WireStatePublisher};
use hearth::{
    Broadcaster, EventBus, EventHandler, InMemoryStorage, RealtimeForwarder, Storage, TimerEngine,
    TimerEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// hearthd - smart timer service
#[derive(Parser)]
#[command(name = "hearthd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the timer service
    Run {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Delete finished/canceled timers older than a cutoff
    Prune {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Age threshold in hours; terminal timers last touched earlier
        /// than this are deleted
        #[arg(long, default_value = "168")]
        older_than_hours: i64,
    },
}

/// Event handler that logs every timer transition.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &TimerEvent) {
        let timer = event.timer();
        match event {
            TimerEvent::Finished { late, .. } if *late => {
                warn!("Timer '{}' finished late ({})", timer.label, timer.id);
            }
            _ => {
                info!(
                    "Timer '{}' {} ({}, state: {})",
                    timer.label,
                    event.kind(),
                    timer.id,
                    timer.state
                );
            }
        }
    }
}

/// Wire publisher used when no broker is configured: publications land
/// in the log instead of on a bus.
struct LogWirePublisher;

#[async_trait::async_trait]
impl WirePublisher for LogWirePublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError> {
        info!(topic = %topic, payload = %payload, "wire publish");
        Ok(())
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let config = ServiceConfig::load(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(ServiceConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = load_config(config)?;
            match &config.storage {
                StorageConfig::Memory => {
                    warn!("Using in-memory storage; timers will not survive a restart");
                    run_service(Arc::new(InMemoryStorage::new()), config).await?;
                }
                #[cfg(feature = "sqlite")]
                StorageConfig::Sqlite { path } => {
                    let path = path.clone();
                    let storage = hearth::SqliteStorage::new(&path).await?;
                    run_service(Arc::new(storage), config).await?;
                }
                #[cfg(not(feature = "sqlite"))]
                StorageConfig::Sqlite { .. } => {
                    return Err("built without the 'sqlite' feature".into());
                }
            }
        }
        Commands::Prune {
            config,
            older_than_hours,
        } => {
            let config = load_config(config)?;
            prune(config, older_than_hours).await?;
        }
    }

    Ok(())
}

/// Wire everything together and run until Ctrl+C.
async fn run_service<S: Storage + 'static>(
    storage: Arc<S>,
    config: ServiceConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let broadcaster = Arc::new(Broadcaster::default());
    let topics = TopicScheme::new(config.wire.topic_prefix.clone());

    let registry = Arc::new(InMemoryDeviceRegistry::new());
    let transport = Arc::new(HttpPushTransport::new(Duration::from_secs(
        config.push.timeout_seconds,
    ))?);
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        transport,
        config.push.ttl_seconds,
    ));

    // Subscribers run in registration order per event.
    let bus = Arc::new(EventBus::new());
    bus.register(Arc::new(LoggingHandler)).await;
    bus.register(Arc::new(RealtimeForwarder::new(broadcaster.clone())))
        .await;
    bus.register(Arc::new(WireStatePublisher::new(
        Arc::new(LogWirePublisher),
        topics,
    )))
    .await;
    bus.register(Arc::new(PushNotifier::new(storage.clone(), dispatcher)))
        .await;

    let engine = TimerEngine::new(storage, bus);

    let summary = engine.recover_on_startup().await?;
    info!(
        "Recovered {} timer(s): {} rescheduled, {} finished late",
        summary.loaded, summary.rescheduled, summary.finished_late
    );
    engine.start();

    let api_config = ApiConfig::new(config.server.host.clone(), config.server.port);
    let state = api::create_api_state(engine, broadcaster);
    let server = api::start_server(api_config, state).await?;

    info!("Press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
        _ = server => {
            warn!("API server stopped");
        }
    }

    Ok(())
}

/// One-shot maintenance: delete old terminal timers and exit.
async fn prune(
    config: ServiceConfig,
    older_than_hours: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(older_than_hours);

    let pruned = match &config.storage {
        StorageConfig::Memory => {
            return Err("nothing to prune: storage is in-memory".into());
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let storage = hearth::SqliteStorage::new(path).await?;
            let pruned = storage.prune_before(cutoff).await?;
            storage.close().await;
            pruned
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            return Err("built without the 'sqlite' feature".into());
        }
    };

    info!(
        "Pruned {} terminal timer(s) last touched before {}",
        pruned, cutoff
    );
    Ok(())
}
