use std::sync::Arc;
use std::time::Duration;

use delivery_board::api;
use delivery_board::config::{Config, LogFormat};
use delivery_board::error::AppError;
use delivery_board::lifecycle::pricing::PricingDefaults;
use delivery_board::refresh::run_refresher;
use delivery_board::state::AppState;
use delivery_board::store::backend::HttpBackend;
use delivery_board::store::memory::MemoryStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let backend = HttpBackend::new(
        config.api_base_url.clone(),
        Duration::from_secs(config.backend_timeout_secs),
    )?;
    let store = MemoryStore::new(config.event_buffer_size);
    let pricing = PricingDefaults {
        fee_rate: config.delivery_fee_rate,
        fallback_fee: config.fallback_delivery_fee,
    };

    let shared_state = Arc::new(AppState::new(
        Arc::new(store),
        Arc::new(backend),
        pricing,
    ));

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_refresher(
        shared_state.clone(),
        Duration::from_secs(config.refresh_interval_secs),
    ));

    tracing::info!(
        api_base_url = %config.api_base_url,
        ws_url = %config.ws_url,
        "request backend configured"
    );

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
