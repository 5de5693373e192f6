//! Rebuilding the dirty set from the participant log

use crate::log::ParticipantRecord;
use crate::reservation::DirtySet;
use proven_common::TransactionId;
use std::collections::HashMap;

/// Replay participant records into the set of still-pledged resources
///
/// Only the latest record of each resource counts: a `Voted` with no later
/// `Resolved` is pending, anything resolved stays resolved. Nothing is sent;
/// the coordinator keeps resending its decision until it is acknowledged.
pub fn recover_dirty_set(records: impl IntoIterator<Item = ParticipantRecord>) -> DirtySet {
    let mut latest: HashMap<String, Option<TransactionId>> = HashMap::new();

    for record in records {
        match record {
            ParticipantRecord::Voted {
                resource,
                transaction,
            } => {
                latest.insert(resource, Some(transaction));
            }
            ParticipantRecord::Resolved { resource, .. } => {
                latest.insert(resource, None);
            }
        }
    }

    let mut dirty = DirtySet::new();
    for (resource, owner) in latest {
        if let Some(transaction) = owner {
            tracing::info!("Resource {} still pledged to {}", resource, transaction);
            dirty.reserve(&transaction, &resource);
        }
    }
    dirty
}

#[cfg(test)]
mod tests {
    use super::*;
    use proven_common::Decision;

    fn voted(resource: &str, txn: &str) -> ParticipantRecord {
        ParticipantRecord::Voted {
            resource: resource.to_string(),
            transaction: TransactionId::new(txn),
        }
    }

    fn resolved(resource: &str, txn: &str, decision: Decision) -> ParticipantRecord {
        ParticipantRecord::Resolved {
            resource: resource.to_string(),
            transaction: TransactionId::new(txn),
            decision,
        }
    }

    #[test]
    fn test_latest_status_per_resource() {
        let dirty = recover_dirty_set(vec![
            voted("a.jpg", "c1"),
            voted("b.jpg", "c1"),
            resolved("a.jpg", "c1", Decision::Abort),
            voted("a.jpg", "c2"),
            resolved("b.jpg", "c1", Decision::Abort),
            voted("c.jpg", "c3"),
            resolved("c.jpg", "c3", Decision::Commit),
        ]);

        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty.owner("a.jpg"), Some(&TransactionId::new("c2")));
        assert!(!dirty.is_dirty("b.jpg"));
        assert!(!dirty.is_dirty("c.jpg"));
    }

    #[test]
    fn test_empty_log() {
        assert!(recover_dirty_set(Vec::new()).is_empty());
    }
}
