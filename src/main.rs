use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lessonsync::clock::SystemClock;
use lessonsync::config::ServerConfig;
use lessonsync::routes::router;
use lessonsync::services::SweepScheduler;
use lessonsync::state::AppState;
use lessonsync::sync::SyncHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lessonsync=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::new_from_env()?;
    let hub = Arc::new(SyncHub::new(config.clone(), Arc::new(SystemClock)));

    let scheduler = SweepScheduler::new(hub.clone(), config.sweep_interval);
    tokio::spawn(scheduler.start());

    let app = router(AppState { hub });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("sync server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
}
