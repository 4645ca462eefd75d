use anyhow::{Context, Result};
use nfce_reader::processing::{FrameSource, ImageSequenceSource};
use nfce_reader::{server::run_reader, state::AppState};
use shared::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!("⚙️ Configuration loaded: {:?}", config);

    let app_state = Arc::new(AppState::new(config.clone())?);
    app_state.store.ensure_initialized()?;

    let source: Option<Box<dyn FrameSource>> = match &config.camera.frame_dir {
        Some(dir) => {
            info!("📷 Frame source: {}", dir.display());
            let frames = ImageSequenceSource::from_dir(dir, config.camera.loop_frames)?;
            Some(Box::new(frames) as Box<dyn FrameSource>)
        }
        None => {
            info!("📷 No frame source configured, HTTP control surface only");
            None
        }
    };

    let listener = if config.app.http_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
        Some(tokio::net::TcpListener::bind(addr).await?)
    } else {
        None
    };

    let outcome = run_reader(app_state, source, listener, shutdown_signal()).await;

    // Jobs still in flight are abandoned with the runtime.
    info!("👋 Shutdown complete");
    outcome
}
