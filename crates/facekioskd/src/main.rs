use anyhow::{Context, Result};
use facekiosk_client::BackendClient;
use facekiosk_hw::{Camera, SidecarProvider};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod session;

use dbus_interface::{KioskService, BUS_NAME, OBJECT_PATH};
use session::{SessionController, SessionSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facekioskd starting");

    let config = config::Config::load().context("failed to load configuration")?;

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format,
        "camera opened"
    );

    let provider = SidecarProvider::spawn(&config.landmark_command)
        .context("failed to start landmark sidecar")?;

    let engine = engine::spawn_engine(Box::new(camera), Box::new(provider), config.warmup_frames);

    let backend = BackendClient::new(&config.api_url)?
        .with_training(config.trigger_training)
        .with_endpoint(config.upload_endpoint);
    tracing::info!(
        url = backend.base_url(),
        trigger_training = config.trigger_training,
        endpoint = ?config.upload_endpoint,
        mode = ?config.capture.mode,
        "backend configured"
    );

    let logo = config
        .watermark_logo
        .as_deref()
        .map(|path| {
            std::fs::read(path)
                .with_context(|| format!("failed to read watermark logo {}", path.display()))
        })
        .transpose()?;

    let sessions = Arc::new(SessionController::new(
        engine,
        Arc::new(backend.clone()),
        config.capture.clone(),
        SessionSettings {
            tick: config.tick_interval(),
            jpeg_quality: config.jpeg_quality,
        },
    ));

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, KioskService::new(Arc::clone(&sessions), backend, logo))?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "facekioskd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facekioskd shutting down");
    sessions.stop().await;

    Ok(())
}
