//! Participant log records

use proven_common::{Decision, TransactionId};
use proven_wal::Wal;
use serde::{Deserialize, Serialize};

/// Status change of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParticipantRecord {
    /// Pledged to a transaction, written before voting `yes`
    Voted {
        resource: String,
        transaction: TransactionId,
    },

    /// Decision applied
    Resolved {
        resource: String,
        transaction: TransactionId,
        decision: Decision,
    },
}

/// The participant's write-ahead log
pub type ParticipantLog = Wal<ParticipantRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let voted = ParticipantRecord::Voted {
            resource: "a.jpg".to_string(),
            transaction: TransactionId::new("collage1"),
        };
        assert_eq!(
            serde_json::to_string(&voted).unwrap(),
            r#"{"type":"voted","resource":"a.jpg","transaction":"collage1"}"#
        );

        let line = r#"{"type":"resolved","resource":"a.jpg","transaction":"collage1","decision":"abort"}"#;
        assert_eq!(
            serde_json::from_str::<ParticipantRecord>(line).unwrap(),
            ParticipantRecord::Resolved {
                resource: "a.jpg".to_string(),
                transaction: TransactionId::new("collage1"),
                decision: Decision::Abort,
            }
        );
    }
}
