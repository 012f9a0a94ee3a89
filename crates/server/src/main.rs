mod api;
mod bootstrap;
mod dispatch_worker;
mod health;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use triage_core::config::{AppConfig, LoadOptions};

use crate::api::{AppState, Stores};

fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use triage_core::config::LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let (state, dispatch_worker) = AppState::new(
        &app.config,
        Stores::sql(app.db_pool.clone()),
        app.queue.clone(),
        Some(app.db_pool.clone()),
    );

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "triage-server listening"
    );
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("http server terminated unexpectedly")?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "triage-server draining auto-dispatch backlog"
    );
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, dispatch_worker).await.is_err() {
        warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "auto-dispatch backlog not drained before shutdown"
        );
    }
    app.db_pool.close().await;

    info!(event_name = "system.server.stopped", correlation_id = "shutdown", "triage-server stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(event_name = "system.signal.unavailable", error = %error, "ctrl-c handler not installed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                warn!(event_name = "system.signal.unavailable", error = %error, "SIGTERM handler not installed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
