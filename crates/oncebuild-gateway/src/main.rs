use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use oncebuild_core::config::{DefaultsConfig, OncebuildConfig};
use oncebuild_core::time::ScheduleDefaults;
use oncebuild_scheduler::{BuildTrigger, LogTrigger, Registry, SweepWorker, TokioDispatcher};
use tracing::{info, warn};

mod app;
mod http;
mod trigger;

#[derive(Parser)]
#[command(name = "oncebuild-gateway", version, about = "Run-once scheduled builds")]
struct Cli {
    /// Path to oncebuild.toml
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "oncebuild_gateway=info,oncebuild_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > ONCEBUILD_CONFIG env > ~/.oncebuild/oncebuild.toml
    let config_path = cli.config.or_else(|| std::env::var("ONCEBUILD_CONFIG").ok());
    let config = OncebuildConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        OncebuildConfig::default()
    });

    let defaults = ScheduleDefaults::from_config(&config.defaults).or_else(|e| {
        warn!("Invalid [defaults] section ({}), using built-in defaults", e);
        ScheduleDefaults::from_config(&DefaultsConfig::default())
    })?;

    let store = oncebuild_scheduler::open_store(&config.storage)?;
    let registry = Arc::new(Registry::new(store));
    info!(pending = registry.len(), "registry ready");

    let trigger: Arc<dyn BuildTrigger> = match trigger::HttpTrigger::from_config(&config.executor)? {
        Some(t) => {
            info!(base_url = ?config.executor.base_url, "builds will be sent to the executor");
            Arc::new(t)
        }
        None => {
            warn!("No executor configured; fired builds will only be logged");
            Arc::new(LogTrigger)
        }
    };
    let dispatcher = Arc::new(TokioDispatcher::new(Arc::clone(&registry), trigger));
    let worker = SweepWorker::new(Arc::clone(&registry), dispatcher, &config.scheduler);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, registry, defaults));
    let router = app::build_router(state);

    // spawn the sweep loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    info!("oncebuild gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    // signal the sweep worker to stop
    let _ = shutdown_tx.send(true);
    let _ = worker_task.await;
    info!("oncebuild gateway stopped");
    Ok(())
}
