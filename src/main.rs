use botsync::agent::{spawn_agent, BotSyncAgent, Schedule};
use botsync::authority::{AccountDirectory, ConfigAuthority, HttpConfigAuthority};
use botsync::cli::{self, Cli, Commands};
use botsync::config::{AppConfig, LoggingConfig};
use botsync::domain::AccountId;
use botsync::error::{Result, SyncError};
use botsync::notify::{AlertDispatcher, LineNotifier};
use botsync::server::{LivenessMonitor, VersionPublisher};
use botsync::services::{HealthServer, HealthState};
use botsync::store::{EphemeralStore, RedisStore};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?;
    if let Err(errors) = config.validate() {
        return Err(SyncError::Validation(errors.join("; ")));
    }

    match &cli.command {
        Commands::Agent {
            accounts,
            health_port,
        } => {
            let _guard = init_logging(&config.logging);
            run_agents(&config, accounts, health_port.or(config.health_port)).await?;
        }
        Commands::Monitor => {
            let _guard = init_logging(&config.logging);
            run_monitor(&config).await?;
        }
        Commands::Inspect { account } => {
            init_logging_simple();
            let store = connect_store(&config).await?;
            cli::inspect(store.as_ref(), &AccountId::from(account.as_str())).await?;
        }
        Commands::Bump { account, strategy } => {
            init_logging_simple();
            let store = connect_store(&config).await?;
            let monitor = Arc::new(LivenessMonitor::new(
                store.clone(),
                config.ttl.clone(),
                config.monitor.max_drawdown_pct,
            ));
            let publisher = VersionPublisher::new(store, monitor, config.ttl.clone());
            cli::bump(&publisher, &AccountId::from(account.as_str()), *strategy).await?;
        }
    }

    Ok(())
}

async fn connect_store(config: &AppConfig) -> Result<Arc<dyn EphemeralStore>> {
    let store = RedisStore::connect(&config.store.url, config.store.op_timeout()).await?;
    Ok(Arc::new(store))
}

fn build_dispatcher(config: &AppConfig) -> Result<AlertDispatcher> {
    let mut dispatcher = AlertDispatcher::new(Duration::from_secs(config.notify.rate_limit_secs));
    if let Some(line) = LineNotifier::from_config(&config.notify)? {
        dispatcher = dispatcher.with_notifier(Arc::new(line));
    }
    Ok(dispatcher)
}

async fn run_agents(config: &AppConfig, accounts: &[String], health_port: Option<u16>) -> Result<()> {
    let store = connect_store(config).await?;
    let authority: Arc<dyn ConfigAuthority> =
        Arc::new(HttpConfigAuthority::from_config(&config.authority)?);
    let alerts = Arc::new(build_dispatcher(config)?);
    let schedule = Schedule::from(&config.agent);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agents = Vec::with_capacity(accounts.len());
    let mut handles = Vec::with_capacity(accounts.len());
    for account in accounts {
        let agent = Arc::new(BotSyncAgent::new(
            AccountId::from(account.as_str()),
            store.clone(),
            authority.clone(),
            alerts.clone(),
            &config.agent,
            &config.ttl,
        ));
        handles.push(spawn_agent(agent.clone(), schedule, shutdown_rx.clone()));
        agents.push(agent);
    }
    info!("Started {} agent(s)", agents.len());

    let health = health_port.map(|port| {
        let server = HealthServer::new(Arc::new(HealthState::new(agents.clone())), port);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let stop = async move {
                let _ = shutdown.changed().await;
            };
            if let Err(e) = server.run(stop).await {
                error!("Health server failed: {}", e);
            }
        })
    });

    shutdown_signal().await;
    info!("Shutdown signal received, stopping agents");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Agent task panicked: {}", e);
        }
    }
    if let Some(health) = health {
        let _ = health.await;
    }

    info!("All agents stopped");
    Ok(())
}

async fn run_monitor(config: &AppConfig) -> Result<()> {
    let store = connect_store(config).await?;
    let directory: Arc<dyn AccountDirectory> =
        Arc::new(HttpConfigAuthority::from_config(&config.authority)?);
    let monitor = LivenessMonitor::new(store, config.ttl.clone(), config.monitor.max_drawdown_pct);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping monitor");
        let _ = shutdown_tx.send(true);
    });

    monitor
        .run(
            directory,
            Duration::from_secs(config.monitor.sweep_interval_secs),
            shutdown_rx,
        )
        .await;
    Ok(())
}

/// Console logging plus optional daily-rolling file output.
///
/// The returned guard flushes the file writer on drop, so it must live as
/// long as the process logs.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let level = if config.level.trim().is_empty() {
        "info"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // rolling::daily panics if it can't create the first file, so preflight the directory
    let (file_layer, guard) = match config.dir.as_deref() {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "botsync.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not create log directory {} ({}), file logging disabled",
                    dir, e
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let (json_layer, text_layer) = if config.json {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            ),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    guard
}

fn init_logging_simple() {
    // Operator commands only surface problems
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
