use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::create_app_router;
use crate::processing::FrameSource;
use crate::state::AppState;

/// Runs the scan loop (when a frame source is given) next to the HTTP server
/// (when a listener is given) until `shutdown` resolves.
///
/// A frame-source failure is fatal: the server is stopped and the error is
/// returned. A source that simply runs out of frames leaves the server up.
pub async fn run_reader<F>(
    state: Arc<AppState>,
    source: Option<Box<dyn FrameSource>>,
    listener: Option<TcpListener>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    // Carries `true` when the loop ended with an error.
    let (loop_tx, loop_rx) = oneshot::channel::<bool>();

    let scan_loop = source.map(|mut source| {
        let mut pipeline = state.build_pipeline();
        let interval = Duration::from_millis(state.config.camera.frame_interval_ms);
        let stop = stop.clone();

        info!("📷 Starting scan loop");
        tokio::task::spawn_blocking(move || {
            let result = pipeline.run(&mut *source, &stop, interval);
            let _ = loop_tx.send(result.is_err());
            result
        })
    });

    match listener {
        Some(listener) => {
            info!("🚀 listening on {}", listener.local_addr()?);
            let app = create_app_router(state.clone());
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        _ = shutdown => {},
                        _ = scan_loop_failed(loop_rx) => {},
                    }
                })
                .await?;
        }
        None if scan_loop.is_some() => {
            tokio::select! {
                _ = shutdown => {},
                _ = loop_rx => {},
            }
        }
        None => warn!("Nothing to run: HTTP disabled and no frame source configured"),
    }

    stop.store(true, Ordering::Release);

    let Some(handle) = scan_loop else {
        return Ok(());
    };
    match handle.await {
        Ok(Ok(frames)) => {
            info!("🏁 Scan loop finished after {} frame(s)", frames);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("❌ Scan loop failed: {:#}", e);
            Err(e)
        }
        Err(e) => {
            error!("❌ Scan loop panicked: {}", e);
            Err(anyhow!("scan loop panicked: {}", e))
        }
    }
}

/// Resolves only if the scan loop ends with an error.
async fn scan_loop_failed(loop_rx: oneshot::Receiver<bool>) {
    match loop_rx.await {
        Ok(true) => warn!("🛑 Scan loop failed, stopping HTTP server"),
        _ => std::future::pending::<()>().await,
    }
}
