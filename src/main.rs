use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seat_hold::{
    app,
    config::{Config, LogFormat},
    services::ExpirySweeper,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&config.app.rust_log));
    match config.app.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!("Starting Seat Hold API ({})", config.app.environment);

    let app_state = AppState::new(config.clone()).await?;

    // --- Start background tasks ---

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = if config.features.enable_sweeper {
        let mut sweeper = ExpirySweeper::new(
            app_state.holds.clone(),
            Duration::from_secs(config.holds.sweep_interval_seconds),
        );
        if let Some(limiter) = &app_state.rate_limiter {
            sweeper = sweeper.with_rate_limits(limiter.store());
        }
        Some(sweeper.spawn(shutdown_rx))
    } else {
        info!("Expiry sweeper disabled, holds expire lazily only");
        None
    };

    // --- Start the web server ---

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(app_state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweeper {
        handle.await?;
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
