//! Fan-out bus seam for multi-instance deployments.
//!
//! A distributed backend would republish room relays to sibling hub
//! instances; without one, broadcast guarantees hold within a single
//! process only. Only the local no-op backend ships in-tree.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BusConfig;

/// A relay envelope as published across instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub room_id: String,
    pub sender_user_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus publish failed: {0}")]
    Publish(String),
}

/// Cross-instance fan-out hook, called after local room delivery.
#[async_trait]
pub trait FanoutBus: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn publish(&self, envelope: RelayEnvelope) -> Result<(), BusError>;
}

/// Local-only bus (single-instance deployment)
pub struct LocalBus;

#[async_trait]
impl FanoutBus for LocalBus {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn publish(&self, _envelope: RelayEnvelope) -> Result<(), BusError> {
        // No-op: relays stay within this process
        Ok(())
    }
}

/// Create a fan-out bus based on configuration
pub fn create_fanout_bus(config: &BusConfig) -> Arc<dyn FanoutBus> {
    if config.enabled {
        tracing::warn!(
            backend = %config.backend,
            "Fan-out bus enabled but no distributed backend is built in, using local mode"
        );
    } else {
        tracing::info!("Fan-out bus disabled, relays stay in-process");
    }
    Arc::new(LocalBus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_bus_is_noop() {
        let bus = create_fanout_bus(&BusConfig::default());
        assert!(!bus.is_enabled());

        let envelope = RelayEnvelope {
            room_id: "song-42".to_string(),
            sender_user_id: "alice".to_string(),
            kind: "broadcast_message".to_string(),
            payload: serde_json::json!({"message": "hi"}),
            timestamp: 0,
        };
        assert!(bus.publish(envelope).await.is_ok());
    }
}
