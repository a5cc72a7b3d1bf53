//! # HTTP Server
//!
//! Axum router over a shared [`Booth`], static file serving for the three image
//! folders, the periodic housekeeping task and graceful shutdown.

pub mod routes;

use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::{
    net::TcpListener,
    signal::ctrl_c,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info};

use crate::{
    booth::{Booth, CAPTURE_IMAGES_PREFIX, FINAL_IMAGES_PREFIX, LAYOUT_IMAGES_PREFIX},
    config::BoothConfig,
    error::{BoothError, BoothResult},
};

/// Every route the booth answers, plus static serving.
pub fn router(booth: Arc<Booth>, config: &BoothConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(routes::health))
        .route("/visitors", post(routes::register_visitor).get(routes::list_visitors))
        .route("/save-user", post(routes::register_visitor))
        .route("/users", get(routes::list_visitors))
        .route("/visitors/{visitor_id}/layout", post(routes::choose_layout))
        .route("/visitors/{visitor_id}/session", get(routes::session))
        .route("/layouts", get(routes::layouts))
        .route("/captures/latest", get(routes::latest_capture))
        .route("/capture/{visitor_id}", get(routes::latest_capture_for))
        .route("/captures/discard", post(routes::discard_capture))
        .route("/retake", post(routes::discard_capture))
        .route("/remove-bg", post(routes::remove_background))
        .route("/compose", post(routes::compose))
        .route("/save-final-image", post(routes::save_final_image))
        .route("/send-email", post(routes::send_email))
        .route("/generate-qr", post(routes::generate_qr))
        .nest_service(FINAL_IMAGES_PREFIX, ServeDir::new(&config.final_dir))
        .nest_service(CAPTURE_IMAGES_PREFIX, ServeDir::new(&config.capture_dir))
        .nest_service(LAYOUT_IMAGES_PREFIX, ServeDir::new(&config.template_dir))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(booth)
}

/// Sweep expired gate entries and idle sessions every `every`.
pub fn spawn_housekeeping(booth: Arc<Booth>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = booth.housekeeping();
            if report.gate_entries_swept + report.sessions_swept > 0 {
                info!(
                    gate_entries = report.gate_entries_swept,
                    sessions = report.sessions_swept,
                    "Housekeeping swept expired state"
                );
            } else {
                debug!("Housekeeping found nothing to sweep");
            }
        }
    })
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, booth: Arc<Booth>, config: &BoothConfig, shutdown: F) -> BoothResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(booth.clone(), config);
    let housekeeping = spawn_housekeeping(booth, config.sweep_interval);

    if let Ok(address) = listener.local_addr() {
        info!("Server running on {address}");
    }
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BoothError::io("serve http", e));

    housekeeping.abort();
    info!("Server shut down");
    served
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        } else {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
