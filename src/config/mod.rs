mod settings;

pub use settings::{
    BusConfig, JwtConfig, PerformanceConfig, RateLimitConfig, ServerConfig, Settings,
    WebSocketConfig,
};
