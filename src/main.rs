use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshmap::api;
use meshmap::atlas::Atlas;
use meshmap::cli;
use meshmap::heartbeat::Heartbeat;
use meshmap::import;
use meshmap::notify::LogNotifier;
use meshmap::settings::Settings;
use meshmap::store::{MemoryStore, NodeStore, NodeTables};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args and env vars
    let args = cli::Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_filter().into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    let settings = load_settings(&args, &args.conf)?;
    if settings.database.read_only {
        warn!("Database is read only");
    }

    let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
    if let Some(path) = &args.import {
        import::import_file(store.as_ref(), path)
            .await
            .with_context(|| format!("Import of {} failed", path.display()))?;
    }
    info!(
        "Nodes: {} ({} local)",
        store.count_nodes(NodeTables::LocalAndCached).await?,
        store.count_nodes(NodeTables::Local).await?
    );

    let listen = settings.web.addr.clone();
    let heartbeat_rate = settings.heartbeat_rate();
    let atlas = Arc::new(Atlas::new(settings, store, Arc::new(LogNotifier)));
    let heartbeat = Heartbeat::start(atlas.clone(), heartbeat_rate);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signals = tokio::spawn(listen_signals(
        args.clone(),
        atlas.clone(),
        heartbeat,
        shutdown_tx,
    ));

    // Build Axum Router
    let app = api::api(atlas);

    // Start server
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Could not bind to {}", listen))?;
    info!("Starting meshmap on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
    .await?;

    signals.await?;
    info!("meshmap over and out");
    Ok(())
}

fn load_settings(args: &cli::Cli, path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::read_config(path)?;
    args.apply(&mut settings);
    Ok(settings)
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// SIGUSR1 forces a heartbeat, SIGUSR2 reloads the configuration and
/// restarts the heartbeat, SIGINT and SIGTERM shut down.
async fn listen_signals(
    args: cli::Cli,
    atlas: Arc<Atlas>,
    mut heartbeat: Heartbeat,
    shutdown_tx: watch::Sender<bool>,
) {
    let streams = (
        signal(SignalKind::user_defined1()),
        signal(SignalKind::user_defined2()),
        signal(SignalKind::terminate()),
    );
    let (mut usr1, mut usr2, mut term) = match streams {
        (Ok(usr1), Ok(usr2), Ok(term)) => (usr1, usr2, term),
        _ => {
            error!("Could not install signal handlers; waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            heartbeat.stop().await;
            let _ = shutdown_tx.send(true);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = usr1.recv() => {
                if let Err(e) = heartbeat.force().await {
                    error!("Could not force heartbeat: {}", e);
                }
            }
            _ = usr2.recv() => {
                info!("Reloading config");
                match load_settings(&args, &args.conf) {
                    Ok(settings) => {
                        let rate = settings.heartbeat_rate();
                        atlas.replace_settings(settings);
                        heartbeat = heartbeat.restart(atlas.clone(), rate).await;
                    }
                    Err(e) => error!("Could not read conf; using old one: {}", e),
                }
            }
            _ = term.recv() => {
                info!("Caught SIGTERM");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Caught interrupt");
                break;
            }
        }
    }

    heartbeat.stop().await;
    let _ = shutdown_tx.send(true);
}
