//! Reconstruction of unfinished transactions from the coordinator log

use crate::log::CoordinatorRecord;
use proven_common::{Decision, SourceMap, TransactionId};
use std::collections::HashMap;

/// A transaction the log shows as started but not finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub transaction: TransactionId,
    pub sources: SourceMap,
    /// Logged decision, if the coordinator got that far
    pub decision: Option<Decision>,
    /// A later `Start` reused the name before this one finished
    pub superseded: bool,
}

/// Replay coordinator records into the transactions that still need work
///
/// Transactions are returned in the order their `Start` was logged.
///
/// If a name is started again before its `Finish`, both starts stay pending.
/// Later `Decision` records belong to the newest start, and a `Finish` ends
/// every start of the name. The superseded start keeps only the resources
/// the newest start does not also claim, so resending its outcome cannot
/// touch the newer pledges.
///
/// Records that do not fit (a decision or finish for a transaction with no
/// `Start`) are skipped so they cannot block recovery of the others.
pub fn pending_transactions(
    records: impl IntoIterator<Item = CoordinatorRecord>,
) -> Vec<PendingTransaction> {
    let mut pending: HashMap<TransactionId, Vec<(u64, PendingTransaction)>> = HashMap::new();
    let mut seq = 0u64;

    for record in records {
        let transaction = record.transaction().clone();
        match record {
            CoordinatorRecord::Start { sources, .. } => {
                seq += 1;
                let starts = pending.entry(transaction.clone()).or_default();
                if let Some((_, earlier)) = starts.last_mut() {
                    tracing::warn!(
                        "Transaction {} started again before finishing, keeping both starts",
                        transaction
                    );
                    earlier.superseded = true;
                }
                starts.push((
                    seq,
                    PendingTransaction {
                        transaction,
                        sources,
                        decision: None,
                        superseded: false,
                    },
                ));
            }
            CoordinatorRecord::Decision { decision, .. } => {
                match pending.get_mut(&transaction).and_then(|starts| starts.last_mut()) {
                    Some((_, latest)) => latest.decision = Some(decision),
                    None => tracing::warn!(
                        "Skipping decision for unknown transaction {}",
                        transaction
                    ),
                }
            }
            CoordinatorRecord::Finish { .. } => {
                if pending.remove(&transaction).is_none() {
                    tracing::debug!("Finish for unknown transaction {}", transaction);
                }
            }
        }
    }

    let mut flattened = Vec::new();
    for mut starts in pending.into_values() {
        let later: Vec<SourceMap> = starts.iter().map(|(_, p)| p.sources.clone()).collect();
        for (index, (_, start)) in starts.iter_mut().enumerate() {
            for newer in &later[index + 1..] {
                exclude_sources(&mut start.sources, newer);
            }
        }
        flattened.extend(starts);
    }

    flattened.sort_by_key(|(seq, _)| *seq);
    flattened.into_iter().map(|(_, entry)| entry).collect()
}

/// Drop every resource of `sources` that `newer` names for the same participant
fn exclude_sources(sources: &mut SourceMap, newer: &SourceMap) {
    for (participant, resources) in sources.iter_mut() {
        if let Some(taken) = newer.get(participant) {
            resources.retain(|resource| !taken.contains(resource));
        }
    }
    sources.retain(|_, resources| !resources.is_empty());
}
