use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{Json, Router, extract::State, routing::get};
use log::info;
use serde_json::{Value, json};

use crate::collector::supervisor::{HealthView, SupervisorShared};
use crate::metrics::METRICS;

/// HTTP status surface: a passive reader of the counters and
/// client states. Serves
///
///   GET /health   per-venue connectivity + throughput
///   GET /metrics  flat counter dump
///
/// Nothing here writes; the hot path is untouched by requests.
#[derive(Clone)]
struct AppState {
    supervisor: Arc<SupervisorShared>,
}

pub async fn serve(port: u16, supervisor: Arc<SupervisorShared>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(AppState { supervisor });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("status endpoint on :{port}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthView> {
    Json(state.supervisor.health())
}

async fn metrics(State(_): State<AppState>) -> Json<Value> {
    let mut venues = serde_json::Map::new();
    for (venue, m) in METRICS.venues() {
        venues.insert(
            venue.name().to_string(),
            json!({
                "messages_in": m.messages_in.load(Ordering::Relaxed),
                "messages_out": m.messages_out.load(Ordering::Relaxed),
                "parse_errors": m.parse_errors.load(Ordering::Relaxed),
                "transport_errors": m.transport_errors.load(Ordering::Relaxed),
                "reconnects": m.reconnects.load(Ordering::Relaxed),
                "subscriptions_sent": m.subscriptions_sent.load(Ordering::Relaxed),
            }),
        );
    }

    Json(json!({
        "venues": venues,
        "publication_failures": METRICS.publication_failures.load(Ordering::Relaxed),
        "encoding_errors": METRICS.encoding_errors.load(Ordering::Relaxed),
        "publication_fatal": METRICS.publication_fatal.load(Ordering::Relaxed),
        "ws_connections_active": METRICS.ws_connections_active.load(Ordering::Relaxed),
    }))
}
