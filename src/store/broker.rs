//! Event brokers
//!
//! A broker forwards every persisted event to an external consumer. The
//! tracker store publishes each newly appended event exactly once, before
//! the tracker itself is written.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

/// Publishes serialized events to an external system.
#[async_trait]
pub trait EventBroker: Send + Sync {
    async fn publish(&self, body: Value) -> Result<()>;
}

/// Broker that keeps published events in memory. Used in tests and as the
/// default when no external broker is configured.
#[derive(Debug, Default)]
pub struct InMemoryEventBroker {
    published: Arc<RwLock<Vec<Value>>>,
}

impl InMemoryEventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<Value> {
        self.published.read().await.clone()
    }
}

#[async_trait]
impl EventBroker for InMemoryEventBroker {
    async fn publish(&self, body: Value) -> Result<()> {
        self.published.write().await.push(body);
        Ok(())
    }
}
