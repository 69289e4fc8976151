use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use server::config::{ProtocolVariant, ServerConfig};
use server::{build_router, AppState};
use tts_core::{PiperModel, SynthesisGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting TTS streaming server...");

    let config = ServerConfig::from_env()?;
    config
        .validate()
        .context("FATAL ERROR: startup configuration is invalid")?;
    if let Some(path) = &config.reference_voice_path {
        info!("Using reference voice: {}", path.display());
    }

    info!(
        config = %config.model_config_path.display(),
        device = %config.device,
        "Loading TTS model..."
    );
    let model_path = config.model_config_path.clone();
    let device = config.device;
    let model = tokio::task::spawn_blocking(move || PiperModel::load(model_path, device))
        .await
        .context("model loading task failed")??;

    let gateway = SynthesisGateway::new(Arc::new(model), config.synthesis_concurrency);
    if config.protocol == ProtocolVariant::Clone && !gateway.supports_cloning() {
        warn!("Cloning protocol enabled but the loaded model cannot clone voices; uploads will be ignored");
    }
    info!(
        "Server configuration loaded: port={}, protocol={:?}, keepalive={}s, sample_rate={}, concurrency={}",
        config.port,
        config.protocol,
        config.keepalive_interval_secs,
        gateway.sample_rate(),
        gateway.concurrency()
    );

    let state = AppState::new(gateway, config.session_settings());
    let app = build_router(state, config.cors_allowed_origins.as_deref());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on ws://{addr}/tts-stream");
    axum::serve(listener, app).await?;
    Ok(())
}
