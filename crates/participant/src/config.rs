//! Configuration for a participant

/// Participant settings
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    /// Identifier the coordinator addresses this participant by
    pub node_id: String,
}

impl ParticipantConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}
