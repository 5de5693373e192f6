//! Coordinator log records

use proven_common::{Decision, SourceMap, TransactionId};
use proven_wal::Wal;
use serde::{Deserialize, Serialize};

/// One step of a transaction's progress, written before it takes effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorRecord {
    /// Vote requests are about to be sent
    Start {
        transaction: TransactionId,
        sources: SourceMap,
    },

    /// The outcome is fixed
    Decision {
        transaction: TransactionId,
        decision: Decision,
    },

    /// Every participant acknowledged the decision
    Finish { transaction: TransactionId },
}

impl CoordinatorRecord {
    pub fn transaction(&self) -> &TransactionId {
        match self {
            Self::Start { transaction, .. }
            | Self::Decision { transaction, .. }
            | Self::Finish { transaction } => transaction,
        }
    }
}

/// The coordinator's write-ahead log
pub type CoordinatorLog = Wal<CoordinatorRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use proven_common::partition_sources;

    #[test]
    fn test_record_layout() {
        let start = CoordinatorRecord::Start {
            transaction: TransactionId::new("collage1"),
            sources: partition_sources(&["P:a.jpg"]).unwrap(),
        };
        assert_eq!(
            serde_json::to_string(&start).unwrap(),
            r#"{"type":"start","transaction":"collage1","sources":{"P":["a.jpg"]}}"#
        );

        let decision = CoordinatorRecord::Decision {
            transaction: TransactionId::new("collage1"),
            decision: Decision::Commit,
        };
        assert_eq!(
            serde_json::to_string(&decision).unwrap(),
            r#"{"type":"decision","transaction":"collage1","decision":"commit"}"#
        );
        assert_eq!(decision.transaction().as_str(), "collage1");
    }
}
