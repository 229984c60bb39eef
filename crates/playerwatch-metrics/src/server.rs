//! HTTP scrape endpoint.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/players` | Player table as JSON |
//! | GET | `/healthz` | Liveness probe |

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::sink::MetricsSink;

/// One row of the `/players` response
#[derive(Debug, Serialize)]
pub struct PlayerView {
    pub user: String,
    pub online: bool,
    pub since: DateTime<Utc>,
    pub events: u64,
}

/// Build the scrape router.
pub fn build_router(sink: MetricsSink) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/players", get(list_players))
        .route("/healthz", get(healthz))
        .with_state(sink)
}

/// Serve the router until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    sink: MetricsSink,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Metrics endpoint listening");
    }

    axum::serve(listener, build_router(sink))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// GET /metrics
async fn prometheus_metrics(State(sink): State<MetricsSink>) -> impl IntoResponse {
    match sink.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

/// GET /players
async fn list_players(State(sink): State<MetricsSink>) -> Json<Vec<PlayerView>> {
    let players = sink
        .players()
        .into_iter()
        .map(|(user, state)| PlayerView {
            user,
            online: state.online,
            since: state.since,
            events: state.events,
        })
        .collect();
    Json(players)
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}
