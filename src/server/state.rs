use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtVerifier;
use crate::bus::create_fanout_bus;
use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::perf::PerformanceMonitor;
use crate::ratelimit::RateLimiter;
use crate::rooms::RoomRegistry;
use crate::websocket::EventRouter;

/// All shared components, constructed once at startup and passed by
/// reference into the handlers. No module-level singletons.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_verifier: Arc<JwtVerifier>,
    pub connections: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub monitor: Arc<PerformanceMonitor>,
    pub router: Arc<EventRouter>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let jwt_verifier = Arc::new(JwtVerifier::new(&settings.jwt));
        let connections = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomRegistry::new());
        let rate_limiter = Arc::new(RateLimiter::new(settings.ratelimit.clone()));
        let monitor = Arc::new(PerformanceMonitor::new(&settings.performance));
        let bus = create_fanout_bus(&settings.bus);

        let router = Arc::new(EventRouter::new(
            connections.clone(),
            rooms.clone(),
            rate_limiter.clone(),
            jwt_verifier.clone(),
            monitor.clone(),
            bus,
            settings.websocket.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            jwt_verifier,
            connections,
            rooms,
            rate_limiter,
            monitor,
            router,
            start_time: Instant::now(),
        }
    }
}
