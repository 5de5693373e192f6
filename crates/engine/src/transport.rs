//! Transport seams used by the protocol roles
//!
//! Sending is best-effort: a message may be lost, delayed or reordered, and
//! the protocol layer retries where it matters. Delivery goes through a
//! [`MessageHandler`]; a handler that returns `false` has not accepted the
//! message and the transport redelivers it later.

use crate::{Message, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Outbound half of a node's connection to the network
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the node called `destination`
    async fn send(&self, destination: &str, message: Message) -> Result<()>;
}

/// Inbound half: invoked once per arriving message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returns whether the message was accepted
    async fn deliver(&self, message: Message) -> bool;
}

/// Redelivery policy shared by the transports
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between delivery attempts of a rejected message
    pub redelivery_interval: Duration,

    /// Attempts after the first one before a message is dropped
    pub max_redeliveries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redelivery_interval: Duration::from_millis(50),
            max_redeliveries: 100,
        }
    }
}

impl EngineConfig {
    pub fn with_redelivery_interval(mut self, interval: Duration) -> Self {
        self.redelivery_interval = interval;
        self
    }

    pub fn with_max_redeliveries(mut self, max: u32) -> Self {
        self.max_redeliveries = max;
        self
    }
}

/// Deliver a message, retrying while the handler rejects it
///
/// Returns whether the message was eventually accepted.
pub async fn deliver_with_retry(
    handler: &Arc<dyn MessageHandler>,
    message: Message,
    config: &EngineConfig,
) -> bool {
    for attempt in 0..=config.max_redeliveries {
        if handler.deliver(message.clone()).await {
            return true;
        }
        tracing::debug!("Message rejected by handler (attempt {})", attempt + 1);
        tokio::time::sleep(config.redelivery_interval).await;
    }

    tracing::warn!(
        "Dropping message after {} delivery attempts",
        config.max_redeliveries + 1
    );
    false
}
