//! Configuration for the coordinator

use std::time::Duration;

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Identifier participants address their replies to
    pub node_id: String,

    /// How long the vote phase waits for unanimous `yes`
    pub vote_timeout: Duration,

    /// How long each decision round waits for acknowledgements before resending
    pub ack_timeout: Duration,

    /// How many finished transactions are remembered for discarding late replies
    pub finished_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: "Server".to_string(),
            vote_timeout: Duration::from_secs(3),
            ack_timeout: Duration::from_secs(3),
            finished_capacity: 10_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_vote_timeout(mut self, timeout: Duration) -> Self {
        self.vote_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_finished_capacity(mut self, capacity: usize) -> Self {
        self.finished_capacity = capacity;
        self
    }
}
