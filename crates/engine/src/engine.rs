//! In-memory mock network
//!
//! Simulates a set of nodes exchanging point-to-point messages inside one
//! process. Each node registers a handler under its identifier. A node can
//! be taken offline, in which case messages addressed to it are lost, the
//! way they would be for a crashed process.

use crate::{EngineConfig, Message, MessageHandler};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Mock engine that simulates the network between nodes
pub struct MockEngine {
    /// Redelivery policy for rejected messages
    config: EngineConfig,

    /// Registered handlers by node ID
    handlers: DashMap<String, Arc<dyn MessageHandler>>,

    /// Nodes that currently lose every message sent to them
    offline: Mutex<HashSet<String>>,

    /// Messages lost because the destination was offline, unknown, or kept rejecting
    dropped: AtomicU64,
}

impl MockEngine {
    /// Create a new mock engine
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            handlers: DashMap::new(),
            offline: Mutex::new(HashSet::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register (or replace) the handler for a node
    ///
    /// Replacing a handler is how tests restart a node with fresh state.
    pub fn register_handler(&self, node_id: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(node_id.to_string(), handler);
    }

    /// Register a node whose messages are collected into a channel
    pub fn register_inbox(&self, node_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register_handler(node_id, Arc::new(InboxHandler { tx }));
        rx
    }

    /// Take a node offline or bring it back
    pub fn set_online(&self, node_id: &str, online: bool) {
        let mut offline = self.offline.lock();
        if online {
            offline.remove(node_id);
        } else {
            offline.insert(node_id.to_string());
        }
    }

    pub fn is_online(&self, node_id: &str) -> bool {
        !self.offline.lock().contains(node_id)
    }

    /// Number of messages that never reached a handler
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send a message to a node in the background
    pub fn publish(self: &Arc<Self>, destination: &str, message: Message) {
        let engine = self.clone();
        let destination = destination.to_string();
        tokio::spawn(async move {
            engine.deliver(destination, message).await;
        });
    }

    async fn deliver(&self, destination: String, message: Message) {
        for attempt in 0..=self.config.max_redeliveries {
            if !self.is_online(&destination) {
                tracing::debug!("Node {} is offline, message lost", destination);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }

            // Clone the handler out so the map guard is not held across the await
            let handler = self.handlers.get(&destination).map(|h| h.value().clone());
            let Some(handler) = handler else {
                tracing::debug!("No handler registered for {}, message lost", destination);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            };

            if handler.deliver(message.clone()).await {
                return;
            }

            tracing::debug!(
                "Node {} rejected message (attempt {}), redelivering",
                destination,
                attempt + 1
            );
            tokio::time::sleep(self.config.redelivery_interval).await;
        }

        tracing::warn!("Giving up on message for {}", destination);
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler that accepts everything into a channel
struct InboxHandler {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl MessageHandler for InboxHandler {
    async fn deliver(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}
