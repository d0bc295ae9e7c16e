mod registry;
mod types;

pub use registry::ConnectionRegistry;
pub use types::{ConnectionHandle, ConnectionStats};
