use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use log::{error, info};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;

/// Gathers `registry` into the prometheus text format
pub fn encode_text(registry: &Registry) -> Result<String> {
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buf)
        .context("Failed to encode metrics")?;

    String::from_utf8(buf).context("Metrics are not valid utf8")
}

async fn metrics(State(registry): State<Registry>) -> Response {
    // gathering runs the scrape, which reads conntrack and resolves names
    let encoded = tokio::task::spawn_blocking(move || encode_text(&registry)).await;

    match encoded {
        Ok(Ok(body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!("Failed to encode metrics: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
        }
        Err(e) => {
            error!("Metrics scrape task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serves `registry` on `addr` until the task is dropped
pub async fn serve(registry: Registry, addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics))
        .route(
            "/",
            get(|| async { "ctrack conntrack exporter\n\nGET /metrics - Prometheus metrics endpoint\n" }),
        )
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?;

    info!("Serving metrics on http://{}/metrics", addr);

    axum::serve(listener, app)
        .await
        .context("Metrics server error")
}
