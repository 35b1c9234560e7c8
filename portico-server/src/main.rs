use clap::Parser;
use portico_admin::AdminServer;
use portico_core::PorticoConfig;
use portico_observability::{LogSink, RetentionSweeper};
use portico_proxy::pipeline::proxy_router;
use portico_proxy::DataPlane;
use portico_store::{ConfigStore, SqliteStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "portico", version, about = "Portico — host-routing reverse proxy")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// SQLite database file (overrides the configured path)
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Portico starting");

    // ── Config ──
    let mut config = PorticoConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.database {
        config.database.path = db;
    }

    // ── Store ──
    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(
        SqliteStore::connect(&config.database.path, config.database.max_connections).await?,
    );
    let store_dyn: Arc<dyn ConfigStore> = store.clone();

    // ── Shutdown signal shared by every background loop ──
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Log sink ──
    let (sink, sink_task) =
        LogSink::start(store_dyn.clone(), config.sink.clone(), shutdown_rx.clone());

    // ── Data plane ──
    let data_plane = Arc::new(DataPlane::new(store_dyn.clone(), sink, &config));
    data_plane.warm_up().await;
    let background_tasks = data_plane.spawn_background_tasks(shutdown_rx.clone());

    // ── Retention sweeper ──
    let retention_task = tokio::spawn(RetentionSweeper::run(
        store_dyn.clone(),
        shutdown_rx.clone(),
    ));

    // ── Admin listener ──
    let admin = AdminServer::new(config.admin.clone(), Arc::clone(&data_plane));
    let admin_shutdown = shutdown_rx.clone();
    let admin_task = tokio::spawn(async move {
        if let Err(e) = admin.start(admin_shutdown).await {
            error!(error = %e, "Admin listener failed");
        }
    });

    // ── Proxy listener ──
    let proxy_addr = config.proxy.http_addr;
    let app = proxy_router(Arc::clone(&data_plane));
    let listener = tokio::net::TcpListener::bind(proxy_addr).await?;
    info!(addr = %proxy_addr, "Proxy listener started");

    let mut proxy_shutdown = shutdown_rx.clone();
    let proxy_task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = proxy_shutdown.changed().await;
        })
        .await;
        if let Err(e) = result {
            error!(error = %e, "Proxy listener failed");
        }
    });

    info!(
        proxy_addr = %config.proxy.http_addr,
        admin_addr = %config.admin.addr,
        "Portico is ready — serving traffic"
    );

    // ── Wait for SIGINT/SIGTERM ──
    wait_for_signal().await;
    info!("Shutdown signal received, stopping");

    // Stop accepting, signal every loop, flush the sink, close the store.
    let _ = shutdown_tx.send(true);
    let _ = proxy_task.await;
    let _ = admin_task.await;
    for task in background_tasks {
        let _ = task.await;
    }
    let _ = retention_task.await;
    let _ = sink_task.await;
    store.close().await;

    info!("Portico stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
