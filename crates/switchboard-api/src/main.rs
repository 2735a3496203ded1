//! Switchboard entry point.
//!
//! Binary name: `switchboard`
//!
//! Parses CLI arguments, loads configuration, initializes tracing and the
//! services, then either serves WebSocket and REST traffic or runs a
//! one-shot command.

mod cli;
mod http;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use cli::{Cli, Commands};
use state::AppState;
use switchboard_infra::config::load_config;
use switchboard_infra::store::AnyStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    switchboard_observe::init_tracing_with_filter(cli.otel, cli::verbosity_filter(cli.verbose))
        .map_err(|e| anyhow::anyhow!(e))?;

    let config = load_config(&cli.config).await;

    let result = match cli.command {
        Commands::Serve { port, host } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            serve(AppState::init(config).await?).await
        }
        Commands::Providers { json } => {
            let gateway = switchboard_infra::llm::build_gateway(&config.ai)?;
            cli::provider::provider_status(&gateway, &config.ai, json).await
        }
    };

    switchboard_observe::shutdown_tracing();
    result
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let cancel = CancellationToken::new();
    let tasks = spawn_background_loops(&state, &cancel);

    tracing::info!(
        addr = %addr,
        store = state.store.backend(),
        providers = ?state.gateway.provider_names(),
        "Switchboard listening"
    );

    // A socket only closes once the registry drops its outbound channel.
    let stopping = {
        let cancel = cancel.clone();
        let state = state.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutting down");
            cancel.cancel();
            state.orchestrator.shutdown().await;
            state.registry.shutdown();
        }
    };

    let router = http::router::build_router(state.clone());
    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(stopping)
    .await;

    cancel.cancel();
    tasks.close();
    tasks.wait().await;
    state.store.close().await;

    served?;
    Ok(())
}

/// Heartbeat, idle sweep, session cleanup and store TTL purge.
fn spawn_background_loops(state: &AppState, cancel: &CancellationToken) -> TaskTracker {
    let tasks = TaskTracker::new();
    let ws = &state.config.websocket;
    let cleanup_every = Duration::from_secs(state.config.session.cleanup_interval_secs.max(1));

    tasks.spawn(Arc::clone(&state.registry).run_heartbeat_loop(
        Duration::from_secs(ws.heartbeat_interval_secs.max(1)),
        cancel.clone(),
    ));
    tasks.spawn(Arc::clone(&state.registry).run_idle_sweep_loop(
        Duration::from_secs(ws.sweep_interval_secs.max(1)),
        Duration::from_secs(ws.connection_timeout_secs),
        cancel.clone(),
    ));
    tasks.spawn(Arc::clone(&state.sessions).run_cleanup_loop(cleanup_every, cancel.clone()));
    tasks.spawn(run_purge_loop(
        Arc::clone(&state.store),
        cleanup_every,
        cancel.clone(),
    ));
    tasks
}

async fn run_purge_loop(store: Arc<AnyStore>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired store keys"),
                Err(err) => tracing::warn!(error = %err, "Store purge failed"),
            },
        }
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
