use server::{router, AppState, ServerConfig};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let state = AppState::from_config(&config)?;
    let app = router(state);

    let addr: SocketAddr = config.bind_addr().parse()?;
    info!(
        ai_backend = ?config.ai.backend,
        data_dir = ?config.data_dir,
        "Starting server on http://{addr}"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
