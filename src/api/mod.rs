//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod rooms;
mod routes;

pub use health::{health, performance, stats};
pub use metrics::prometheus_metrics;
pub use rooms::{list_rooms, room_participants};
pub use routes::api_routes;
