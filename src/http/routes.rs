//! HTTP router: health endpoint and the WebSocket upgrade path

use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::app::AppState;
use crate::ws::handler::ws_handler;

pub fn build_router(app: AppState) -> Router {
    let cors = cors_layer(&app.config.client_origin);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

fn cors_layer(client_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if client_origin == "*" {
        return layer.allow_origin(Any);
    }
    match client_origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(err) => {
            warn!(%err, client_origin, "Invalid CLIENT_ORIGIN, allowing any origin");
            layer.allow_origin(Any)
        }
    }
}

async fn health(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": app.uptime().as_secs(),
        "sessions": app.sessions.session_count(),
        "players": app.sessions.player_count(),
        "tick_rate": app.tick_rate.get(),
    }))
}
