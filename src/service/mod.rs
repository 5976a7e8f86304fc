pub mod error;
pub mod live;
pub mod protocol;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use live::{LiveFeed, LiveWorker};
pub use state::AppState;

use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Full application router with request tracing.
pub fn app(state: AppState) -> Router {
    routes::router(state).layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C or SIGTERM. The camera thread is started here when
/// enabled and stopped before returning.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind_addr.clone();

    let live = if state.config.server.enable_camera {
        let camera = state.config.camera.clone();
        let worker = LiveWorker {
            pipeline: Arc::clone(&state.pipeline),
            store: Arc::clone(&state.store),
            gallery: Arc::clone(&state.gallery),
            recognition: state.config.recognition.clone(),
        };
        match tokio::task::spawn_blocking(move || LiveFeed::spawn_camera(camera, worker)).await? {
            Ok(feed) => Some(feed),
            Err(e) => {
                tracing::error!("Camera unavailable, /video_feed will return 503: {}", e);
                None
            }
        }
    } else {
        tracing::info!("Camera disabled, /video_feed will return 503");
        None
    };

    let state = match &live {
        Some(feed) => state.with_live_feed(feed.subscribe()),
        None => state,
    };
    let camera_flag = live.as_ref().map(LiveFeed::shutdown_flag);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Attendance server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(camera_flag))
        .await?;

    if let Some(feed) = live {
        tokio::task::spawn_blocking(move || feed.stop()).await?;
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM. Stopping the camera thread right away ends
/// open MJPEG streams so graceful shutdown can complete.
async fn shutdown_signal(camera_flag: Option<Arc<AtomicBool>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
    if let Some(flag) = camera_flag {
        flag.store(true, Ordering::SeqCst);
    }
}
