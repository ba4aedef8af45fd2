mod error;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use tandem_core::clock::SystemClock;
use tandem_core::config::TandemConfig;
use tandem_core::history::HistoryLogger;
use tandem_core::service::SessionService;
use tandem_core::storage::{self, Storage};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub service: SessionService<Storage>,
    pub config: TandemConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_web=info,tandem_core=info".into()),
        )
        .init();

    let cwd = std::env::current_dir().ok();
    let config = TandemConfig::load(cwd.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("failed to load config, using defaults: {e}");
        TandemConfig::default_config()
    });

    let storage = storage::create_backend(&config).context("failed to open session store")?;
    tracing::info!(backend = storage.backend_name(), "session store ready");

    let service = SessionService::new(
        Arc::new(storage),
        Arc::new(SystemClock),
        Arc::new(HistoryLogger::from_config(&config.history)),
        &config.sessions,
    );

    let state = Arc::new(AppState {
        service,
        config: config.clone(),
    });

    let cancel = CancellationToken::new();
    let sweeper = if config.sweeper.enabled {
        Some(state.service.sweeper().clone().spawn(
            std::time::Duration::from_secs(config.sweeper.interval_secs),
            cancel.clone(),
        ))
    } else {
        tracing::info!("sweeper disabled; sessions reconcile lazily on read");
        None
    };

    let app = routes::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.web.host, config.web.port);
    tracing::info!("tandem-web listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to install Ctrl+C handler: {e}");
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = sweeper {
        handle.await.context("sweeper task panicked")?;
    }
    tracing::info!("server shutdown complete");
    Ok(())
}
