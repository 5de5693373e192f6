//! Mock client that implements the transport for one node

use crate::{MockEngine, Message, Result, Transport};
use async_trait::async_trait;
use std::sync::Arc;

/// Mock client for sending messages through the mock engine
#[derive(Clone)]
pub struct MockClient {
    /// Node ID
    node_id: String,

    /// Reference to the mock engine
    engine: Arc<MockEngine>,
}

impl MockClient {
    /// Create a new mock client
    pub fn new(node_id: String, engine: Arc<MockEngine>) -> Self {
        Self { node_id, engine }
    }

    /// Get the node ID of this client
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[async_trait]
impl Transport for MockClient {
    async fn send(&self, destination: &str, message: Message) -> Result<()> {
        self.engine.publish(destination, message);
        Ok(())
    }
}
