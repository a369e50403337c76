//! HTTP surface: the annotated video feed, the label socket and a status endpoint.
//!
//! The server runs on the calling thread inside its own actix `System` and
//! owns Ctrl-C handling so that sinks are closed before the workers drain.

use std::sync::Arc;

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, http::header, web};
use anyhow::{Context, Result};

use crate::{
    config::AppConfig,
    pipeline::{PipelineHub, StopReason},
    sinks::{push, stream},
};

const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

pub struct AppState {
    pub hub: Arc<PipelineHub>,
    pub jpeg_quality: u8,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/video_feed_with_prediction", web::get().to(video_feed))
        .route("/ws", web::get().to(label_socket))
        .route("/status", web::get().to(status));
}

async fn video_feed(state: web::Data<AppState>) -> HttpResponse {
    let events = state.hub.subscribe_stream();
    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header((
            "Content-Type",
            format!("multipart/x-mixed-replace; boundary={}", stream::BOUNDARY),
        ))
        .streaming(stream::mjpeg_stream(events, state.jpeg_quality))
}

async fn label_socket(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, messages) = actix_ws::handle(&req, body)?;
    let labels = state.hub.subscribe_labels();
    actix_web::rt::spawn(push::run_session(session, messages, labels));
    Ok(response)
}

async fn status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.hub.status())
}

/// Serves until Ctrl-C. On shutdown the hub is stopped first so open streams
/// and sockets end cleanly, then the server drains its workers.
pub fn run(config: &AppConfig, hub: Arc<PipelineHub>) -> Result<()> {
    let state = web::Data::new(AppState {
        hub: hub.clone(),
        jpeg_quality: config.jpeg_quality,
    });
    let (host, port) = config.bind_addr();

    actix_web::rt::System::new().block_on(async move {
        let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
            .disable_signals()
            .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
            .bind((host.as_str(), port))
            .with_context(|| format!("failed to bind {host}:{port}"))?
            .run();
        log::info!("serving on http://{host}:{port} (/video_feed_with_prediction, /ws, /status)");

        let handle = server.handle();
        actix_web::rt::spawn(async move {
            if let Err(err) = actix_web::rt::signal::ctrl_c().await {
                log::error!("failed to listen for Ctrl-C: {err}");
                return;
            }
            log::info!("shutdown requested");
            hub.stop(StopReason::Shutdown);
            handle.stop(true).await;
        });

        server.await.context("http server failed")
    })
}
