use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod capture;
mod clock;
mod config;
mod events;
mod presenter;
mod session;
mod system;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("attendod starting");

    let config = config::Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        db = %config.db_path.display(),
        embeddings = %config.embeddings_path.display(),
        tolerance = config.match_tolerance,
        "configuration loaded"
    );

    let (events, rx) = events::EventSink::channel();
    let presenter = tokio::spawn(presenter::run_presenter(rx));

    let mut service = session::AttendanceService::new(
        session::DeviceBackend::new(config.clone()),
        config,
        Arc::new(clock::SystemClock),
        events,
    );
    service.start().await.context("failed to start attendance session")?;

    tracing::info!("attendod ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("attendod shutting down");

    service.stop().await;
    drop(service);
    let stats = presenter.await?;
    tracing::info!(
        frames = stats.frames,
        detections = stats.detections,
        statuses = stats.statuses,
        "session summary"
    );

    Ok(())
}
