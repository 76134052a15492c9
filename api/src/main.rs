mod config;
mod error;
mod handlers;
mod monitor;
mod state;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // .env es opcional
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("api=debug,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let state = AppState::from_config(&config).await?;

    // router HTTP
    let app = handlers::build_router(state.clone(), config.max_body_bytes);

    // visibilidad de la cola, dead letters y ciclo de vida de blobs
    let monitor_state = state.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        monitor::run_monitor(monitor_state, sweep_interval).await;
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "api escuchando en {} (visibility_timeout={:?}, max_receive_count={})",
        listener.local_addr()?,
        config.visibility_timeout,
        config.max_receive_count
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("api detenida");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("no se pudo escuchar ctrl-c: {:?}", e);
        std::future::pending::<()>().await;
    }
}
