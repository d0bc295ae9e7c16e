use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, performance, stats};
use super::metrics::prometheus_metrics;
use super::rooms::{list_rooms, room_participants};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Operational surfaces for the external metrics backend
        .route("/performance", get(performance))
        .route("/metrics", get(prometheus_metrics))
        // Room introspection
        .nest(
            "/api/v1",
            Router::new()
                .route("/rooms", get(list_rooms))
                .route("/rooms/{room_id}", get(room_participants)),
        )
}
