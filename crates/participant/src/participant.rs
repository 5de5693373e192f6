//! The participant state machine
//!
//! Votes and decisions for every transaction take turns: a vote holds the
//! turn from asking the approver until its pledge is logged, and a decision
//! holds it while it is applied. A decision that arrives while approval is
//! still pending therefore sees the pledge it has to resolve. The dirty set
//! sits behind its own short lock so queries never wait on an approver.
//! Replies are sent after the turn is released.

use crate::approval::Approver;
use crate::config::ParticipantConfig;
use crate::error::Result;
use crate::log::{ParticipantLog, ParticipantRecord};
use crate::recovery::recover_dirty_set;
use crate::reservation::DirtySet;
use crate::store::ResourceStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use proven_common::{Decision, TransactionId};
use proven_engine::{Message, MessageHandler, Transport};
use proven_protocol::{CommitMessage, MessageKind};
use std::sync::Arc;

/// A participant node
pub struct Participant {
    config: ParticipantConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ResourceStore>,
    approver: Arc<dyn Approver>,
    log: ParticipantLog,

    /// Held by one vote or decision at a time
    turn: tokio::sync::Mutex<()>,

    /// Pledged resources
    dirty: Mutex<DirtySet>,
}

impl Participant {
    pub fn new(
        config: ParticipantConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ResourceStore>,
        approver: Arc<dyn Approver>,
        log: ParticipantLog,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            approver,
            log,
            turn: tokio::sync::Mutex::new(()),
            dirty: Mutex::new(DirtySet::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Rebuild the dirty set from the log
    ///
    /// Must run before the participant starts receiving messages. Returns
    /// how many resources are still pledged.
    pub fn recover(&self) -> Result<usize> {
        let replay = self.log.replay()?;
        if replay.skipped > 0 {
            tracing::warn!(
                "Participant {} skipped {} unreadable log records",
                self.config.node_id,
                replay.skipped
            );
        }

        let dirty = recover_dirty_set(replay.records);
        let pending = dirty.len();
        *self.dirty.lock() = dirty;

        tracing::info!(
            "Participant {} recovered with {} pledged resources",
            self.config.node_id,
            pending
        );
        Ok(pending)
    }

    pub fn is_dirty(&self, resource: &str) -> bool {
        self.dirty.lock().is_dirty(resource)
    }

    /// Resources pledged to a transaction
    pub fn pledged_to(&self, transaction: &TransactionId) -> Vec<String> {
        self.dirty.lock().resources_of(transaction)
    }

    /// Answer a vote request, returning the vote that was sent
    pub async fn on_vote(&self, request: CommitMessage) -> MessageKind {
        let CommitMessage {
            sender,
            transaction_id,
            sources,
            artifact,
            ..
        } = request;

        let turn = self.turn.lock().await;
        let approver = self.approver.clone();
        let asked = sources.clone();
        let approved = tokio::task::spawn_blocking(move || approver.approve(&artifact, &asked))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Approval for {} failed: {}", transaction_id, e);
                false
            });

        let vote = if approved {
            self.pledge(&transaction_id, &sources)
        } else {
            tracing::info!("Transaction {} declined by approver", transaction_id);
            MessageKind::No
        };
        drop(turn);

        self.reply(&sender, vote, transaction_id).await;
        vote
    }

    /// Check, mark and log every resource under the dirty-set lock
    fn pledge(&self, transaction: &TransactionId, sources: &[String]) -> MessageKind {
        let mut dirty = self.dirty.lock();

        for resource in sources {
            if let Some(owner) = dirty.owner(resource) {
                tracing::info!(
                    "Voting no on {}: {} is pledged to {}",
                    transaction,
                    resource,
                    owner
                );
                return MessageKind::No;
            }
            if !self.store.exists(resource) {
                tracing::info!("Voting no on {}: no resource {}", transaction, resource);
                return MessageKind::No;
            }
        }

        for resource in sources {
            dirty.reserve(transaction, resource);
            let record = ParticipantRecord::Voted {
                resource: resource.clone(),
                transaction: transaction.clone(),
            };
            // Already-marked resources are released by the abort this "no" leads to
            if let Err(e) = self.log.append(&record) {
                tracing::error!("Voting no on {}: cannot log pledge: {}", transaction, e);
                return MessageKind::No;
            }
        }

        tracing::info!("Voting yes on {} for {:?}", transaction, sources);
        MessageKind::Yes
    }

    /// Apply a decision and acknowledge it
    ///
    /// Resources not pledged to this transaction (already resolved, or never
    /// pledged) are left alone. The acknowledgement is only withheld if
    /// applying the decision fails locally, so the coordinator resends it.
    pub async fn on_decision(&self, decision: Decision, request: CommitMessage) -> Result<()> {
        let CommitMessage {
            sender,
            transaction_id,
            sources,
            ..
        } = request;

        {
            let _turn = self.turn.lock().await;
            self.resolve(&transaction_id, decision, &sources)?;
        }
        self.reply(&sender, MessageKind::Ack, transaction_id).await;
        Ok(())
    }

    fn resolve(
        &self,
        transaction: &TransactionId,
        decision: Decision,
        sources: &[String],
    ) -> Result<()> {
        let mut dirty = self.dirty.lock();

        for resource in sources {
            if dirty.owner(resource) != Some(transaction) {
                tracing::debug!(
                    "Resource {} not pledged to {}, nothing to {}",
                    resource,
                    transaction,
                    decision
                );
                continue;
            }

            if decision.is_commit() {
                self.store.delete(resource)?;
            }
            dirty.release(transaction, resource);
            self.log.append(&ParticipantRecord::Resolved {
                resource: resource.clone(),
                transaction: transaction.clone(),
                decision,
            })?;
            tracing::info!("Resource {} resolved: {} ({})", resource, decision, transaction);
        }

        Ok(())
    }

    async fn reply(&self, destination: &str, kind: MessageKind, transaction: TransactionId) {
        let message = CommitMessage::reply(kind, self.config.node_id.clone(), transaction);
        if let Err(e) = self
            .transport
            .send(destination, message.into_message())
            .await
        {
            tracing::warn!("Reply to {} failed: {}", destination, e);
        }
    }
}

#[async_trait]
impl MessageHandler for Participant {
    async fn deliver(&self, message: Message) -> bool {
        let request = match CommitMessage::from_message(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejecting malformed message: {}", e);
                return false;
            }
        };

        match request.kind {
            MessageKind::Vote => {
                self.on_vote(request).await;
                true
            }
            kind => match kind.decision() {
                Some(decision) => {
                    let transaction = request.transaction_id.clone();
                    if let Err(e) = self.on_decision(decision, request).await {
                        tracing::error!("Cannot apply {} to {}: {}", decision, transaction, e);
                    }
                    true
                }
                None => {
                    tracing::warn!(
                        "Rejecting {} from {}: participants only take votes and decisions",
                        kind.as_str(),
                        request.sender
                    );
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApproveAll;
    use crate::store::MemoryStore;
    use proven_engine::{MockClient, MockEngine};
    use proven_wal::{MemoryLogStorage, Wal};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        participant: Arc<Participant>,
        store: MemoryStore,
        disk: MemoryLogStorage,
        coordinator: UnboundedReceiver<Message>,
    }

    fn harness(approver: Arc<dyn Approver>, disk: MemoryLogStorage) -> Harness {
        let engine = Arc::new(MockEngine::new());
        let coordinator = engine.register_inbox("Server");
        let store = MemoryStore::new()
            .with_resource("a.jpg", b"a".to_vec())
            .with_resource("b.jpg", b"b".to_vec());

        let participant = Arc::new(Participant::new(
            ParticipantConfig::new("P"),
            Arc::new(MockClient::new("P".to_string(), engine)),
            Arc::new(store.clone()),
            approver,
            Wal::open(disk.clone()).unwrap(),
        ));

        Harness {
            participant,
            store,
            disk,
            coordinator,
        }
    }

    fn vote(txn: &str, sources: &[&str]) -> Message {
        CommitMessage::vote(
            "Server",
            TransactionId::new(txn),
            sources.iter().map(|s| s.to_string()).collect(),
            b"collage".to_vec(),
        )
        .into_message()
    }

    fn decision(txn: &str, decision: Decision, sources: &[&str]) -> Message {
        CommitMessage::decision(
            "Server",
            TransactionId::new(txn),
            decision,
            sources.iter().map(|s| s.to_string()).collect(),
        )
        .into_message()
    }

    async fn next_reply(h: &mut Harness) -> CommitMessage {
        CommitMessage::from_message(h.coordinator.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_vote_yes_pledges_and_logs() {
        let mut h = harness(Arc::new(ApproveAll), MemoryLogStorage::new());

        assert!(h.participant.deliver(vote("c1", &["a.jpg", "b.jpg"])).await);

        let reply = next_reply(&mut h).await;
        assert_eq!(reply.kind, MessageKind::Yes);
        assert_eq!(reply.sender, "P");
        assert_eq!(reply.transaction_id.as_str(), "c1");
        assert_eq!(
            h.participant.pledged_to(&TransactionId::new("c1")),
            vec!["a.jpg", "b.jpg"]
        );
        assert_eq!(h.disk.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_dirty_resource_votes_no() {
        let mut h = harness(Arc::new(ApproveAll), MemoryLogStorage::new());

        h.participant.deliver(vote("c1", &["a.jpg"])).await;
        assert_eq!(next_reply(&mut h).await.kind, MessageKind::Yes);

        h.participant.deliver(vote("c2", &["b.jpg", "a.jpg"])).await;
        assert_eq!(next_reply(&mut h).await.kind, MessageKind::No);

        // The refused transaction pledged nothing
        assert!(h.participant.pledged_to(&TransactionId::new("c2")).is_empty());
        assert!(!h.participant.is_dirty("b.jpg"));
        assert_eq!(h.disk.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_resource_votes_no() {
        let mut h = harness(Arc::new(ApproveAll), MemoryLogStorage::new());

        h.participant.deliver(vote("c1", &["a.jpg", "zzz.jpg"])).await;
        assert_eq!(next_reply(&mut h).await.kind, MessageKind::No);
        assert!(!h.participant.is_dirty("a.jpg"));
    }

    #[tokio::test]
    async fn test_declined_vote_writes_nothing() {
        let decline = |_: &[u8], _: &[String]| false;
        let mut h = harness(Arc::new(decline), MemoryLogStorage::new());

        h.participant.deliver(vote("c1", &["a.jpg"])).await;
        assert_eq!(next_reply(&mut h).await.kind, MessageKind::No);
        assert!(h.disk.lines().is_empty());
        assert!(!h.participant.is_dirty("a.jpg"));
    }

    #[tokio::test]
    async fn test_commit_is_idempotent() {
        let mut h = harness(Arc::new(ApproveAll), MemoryLogStorage::new());
        h.participant.deliver(vote("c1", &["a.jpg"])).await;
        next_reply(&mut h).await;

        for _ in 0..2 {
            assert!(
                h.participant
                    .deliver(decision("c1", Decision::Commit, &["a.jpg"]))
                    .await
            );
            assert_eq!(next_reply(&mut h).await.kind, MessageKind::Ack);
        }

        assert_eq!(h.store.names(), vec!["b.jpg"]);
        assert!(!h.participant.is_dirty("a.jpg"));
        // One Voted, one Resolved
        assert_eq!(h.disk.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_abort_releases_without_deleting() {
        let mut h = harness(Arc::new(ApproveAll), MemoryLogStorage::new());
        h.participant.deliver(vote("c1", &["a.jpg"])).await;
        next_reply(&mut h).await;

        h.participant
            .deliver(decision("c1", Decision::Abort, &["a.jpg"]))
            .await;
        assert_eq!(next_reply(&mut h).await.kind, MessageKind::Ack);

        assert_eq!(h.store.names(), vec!["a.jpg", "b.jpg"]);
        assert!(!h.participant.is_dirty("a.jpg"));
    }

    #[tokio::test]
    async fn test_decision_for_other_transaction_leaves_pledge() {
        let mut h = harness(Arc::new(ApproveAll), MemoryLogStorage::new());
        h.participant.deliver(vote("c1", &["a.jpg"])).await;
        next_reply(&mut h).await;

        // c2 was refused a.jpg; its abort must not release c1's pledge
        h.participant
            .deliver(decision("c2", Decision::Commit, &["a.jpg"]))
            .await;
        let ack = next_reply(&mut h).await;
        assert_eq!(
            (ack.kind, ack.transaction_id.as_str()),
            (MessageKind::Ack, "c2")
        );

        assert_eq!(
            h.participant.pledged_to(&TransactionId::new("c1")),
            vec!["a.jpg"]
        );
        assert_eq!(h.store.names(), vec!["a.jpg", "b.jpg"]);
    }

    #[tokio::test]
    async fn test_abort_waits_for_pending_approval() {
        let slow = |_: &[u8], _: &[String]| {
            std::thread::sleep(std::time::Duration::from_millis(300));
            true
        };
        let mut h = harness(Arc::new(slow), MemoryLogStorage::new());

        let voter = h.participant.clone();
        let vote_task = tokio::spawn(async move { voter.deliver(vote("c1", &["a.jpg"])).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // The coordinator gave up waiting and aborted while the approver was still deciding
        assert!(
            h.participant
                .deliver(decision("c1", Decision::Abort, &["a.jpg"]))
                .await
        );
        assert!(vote_task.await.unwrap());

        let mut kinds = vec![next_reply(&mut h).await.kind, next_reply(&mut h).await.kind];
        kinds.sort_by_key(|kind| kind.as_str());
        assert_eq!(kinds, vec![MessageKind::Ack, MessageKind::Yes]);

        assert!(!h.participant.is_dirty("a.jpg"));
        assert_eq!(h.store.names(), vec!["a.jpg", "b.jpg"]);
        // Voted then Resolved, so a restart finds nothing pledged
        assert_eq!(h.disk.lines().len(), 2);
        let restarted = harness(Arc::new(ApproveAll), h.disk.clone());
        assert_eq!(restarted.participant.recover().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recovery_restores_pledges() {
        let disk = MemoryLogStorage::new();
        {
            let mut h = harness(Arc::new(ApproveAll), disk.clone());
            h.participant.deliver(vote("c1", &["a.jpg"])).await;
            next_reply(&mut h).await;
        }

        // Restart with fresh in-memory state over the same log
        let mut h = harness(Arc::new(ApproveAll), disk);
        assert!(!h.participant.is_dirty("a.jpg"));
        assert_eq!(h.participant.recover().unwrap(), 1);
        assert!(h.participant.is_dirty("a.jpg"));

        h.participant.deliver(vote("c2", &["a.jpg"])).await;
        assert_eq!(next_reply(&mut h).await.kind, MessageKind::No);

        h.participant
            .deliver(decision("c1", Decision::Commit, &["a.jpg"]))
            .await;
        assert_eq!(next_reply(&mut h).await.kind, MessageKind::Ack);
        assert_eq!(h.store.names(), vec!["b.jpg"]);
    }

    #[tokio::test]
    async fn test_malformed_and_unexpected_messages_rejected() {
        let h = harness(Arc::new(ApproveAll), MemoryLogStorage::new());

        let garbage = Message::with_body(Vec::new()).with_header("kind", "vote");
        assert!(!h.participant.deliver(garbage).await);

        let stray = CommitMessage::reply(MessageKind::Yes, "Q", TransactionId::new("c1"));
        assert!(!h.participant.deliver(stray.into_message()).await);
    }
}
