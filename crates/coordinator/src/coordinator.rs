//! The coordinator node
//!
//! Owns the services every transaction shares (transport, log, artifact
//! sink, reply router) and starts one task per collage.

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::log::CoordinatorLog;
use crate::recovery::pending_transactions;
use crate::router::MessageRouter;
use crate::sink::ArtifactSink;
use crate::transaction::{Entry, Services, Transaction, TransactionHandle};
use async_trait::async_trait;
use proven_common::{Decision, SourceMap, TransactionId, partition_sources};
use proven_engine::{Message, MessageHandler, Transport};
use proven_protocol::BuildRequest;
use std::collections::HashMap;
use std::sync::Arc;

/// Coordinator of collage transactions
pub struct Coordinator {
    services: Services,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        log: CoordinatorLog,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        let router = MessageRouter::with_finished_capacity(config.finished_capacity);
        Self {
            services: Services {
                config: Arc::new(config),
                transport,
                log: Arc::new(log),
                sink,
                router: Arc::new(router),
            },
        }
    }

    pub fn node_id(&self) -> &str {
        &self.services.config.node_id
    }

    /// Router that participant replies must be delivered to
    pub fn router(&self) -> Arc<MessageRouter> {
        self.services.router.clone()
    }

    /// Start committing a collage built from `participant:resource` sources
    ///
    /// Fails without side effects if a source is malformed or a transaction
    /// with the same name is still in flight.
    pub fn start_commit<S: AsRef<str>>(
        &self,
        collage: TransactionId,
        image: Vec<u8>,
        sources: &[S],
    ) -> Result<TransactionHandle> {
        let sources = partition_sources(sources)?;
        let inbox = self.services.router.register(&collage)?;

        let transaction = Transaction::new(collage, sources, inbox, self.services.clone());
        Ok(transaction.spawn(Entry::New { artifact: image }))
    }

    /// Start committing the collage described by a `build` message
    pub fn start_request(&self, message: Message) -> Result<TransactionHandle> {
        let request = BuildRequest::from_message(message)?;
        self.start_commit(request.collage, request.image, &request.sources)
    }

    /// Resume every transaction the log shows as unfinished
    ///
    /// Runs before new work is accepted, and may run again later to take
    /// over transactions that stopped on a local error. Transactions still
    /// in flight are left alone.
    pub fn recover(&self) -> Result<Vec<TransactionHandle>> {
        let replay = self.services.log.replay()?;
        if replay.skipped > 0 {
            tracing::warn!("Skipped {} unreadable coordinator log records", replay.skipped);
        }

        // Superseded starts are delivered by the task of the newest start
        let mut earlier: HashMap<TransactionId, Vec<(SourceMap, Decision)>> = HashMap::new();
        let mut handles = Vec::new();
        for pending in pending_transactions(replay.records) {
            if pending.superseded {
                earlier.entry(pending.transaction).or_default().push((
                    pending.sources,
                    pending.decision.unwrap_or(Decision::Abort),
                ));
                continue;
            }
            if self.services.router.is_registered(pending.transaction.as_str()) {
                tracing::debug!("Transaction {} still in flight", pending.transaction);
                continue;
            }

            let inbox = self.services.router.resume(&pending.transaction)?;
            let entry = match pending.decision {
                None => Entry::RecoveredStart,
                Some(decision) => Entry::RecoveredDecision(decision),
            };

            let superseded = earlier.remove(&pending.transaction).unwrap_or_default();
            let transaction = Transaction::new(
                pending.transaction,
                pending.sources,
                inbox,
                self.services.clone(),
            );
            handles.push(transaction.spawn_after(superseded, entry));
        }

        tracing::info!("Recovered {} unfinished transactions", handles.len());
        Ok(handles)
    }
}

#[async_trait]
impl MessageHandler for Coordinator {
    /// Build requests start a transaction; everything else is a reply
    async fn deliver(&self, message: Message) -> bool {
        if !BuildRequest::matches(&message) {
            return self.services.router.deliver(message).await;
        }

        match self.start_request(message) {
            Ok(_) => true,
            Err(CoordinatorError::InvalidRequest(e)) => {
                tracing::warn!("Rejecting malformed build request: {}", e);
                false
            }
            // Retrying a request that cannot start will not help, so accept it either way
            Err(e) => {
                tracing::error!("Cannot start transaction: {}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use proven_engine::{MockClient, MockEngine};
    use proven_protocol::{CommitMessage, MessageKind};
    use proven_wal::{MemoryLogStorage, Wal};
    use std::time::Duration;

    fn coordinator(engine: &Arc<MockEngine>) -> (Arc<Coordinator>, MemoryLogStorage, MemorySink) {
        let disk = MemoryLogStorage::new();
        let sink = MemorySink::new();
        let config = CoordinatorConfig::default()
            .with_vote_timeout(Duration::from_millis(300))
            .with_ack_timeout(Duration::from_millis(100));

        let coordinator = Arc::new(Coordinator::new(
            config,
            Arc::new(MockClient::new("Server".to_string(), engine.clone())),
            Wal::open(disk.clone()).unwrap(),
            Arc::new(sink.clone()),
        ));
        engine.register_handler("Server", coordinator.clone());
        (coordinator, disk, sink)
    }

    #[tokio::test]
    async fn test_empty_source_list_commits() {
        let engine = Arc::new(MockEngine::new());
        let (coordinator, disk, sink) = coordinator(&engine);

        let handle = coordinator
            .start_commit::<&str>(TransactionId::new("blank"), b"img".to_vec(), &[])
            .unwrap();
        let outcome = handle.outcome().await.unwrap();

        assert_eq!(outcome.decision, Decision::Commit);
        assert_eq!(sink.get("blank"), Some(b"img".to_vec()));
        assert_eq!(disk.lines().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_sources_rejected_before_logging() {
        let engine = Arc::new(MockEngine::new());
        let (coordinator, disk, _) = coordinator(&engine);

        let result = coordinator.start_commit(TransactionId::new("c"), Vec::new(), &["nocolon"]);
        assert!(matches!(result, Err(CoordinatorError::InvalidSource(_))));
        assert!(disk.lines().is_empty());
        assert!(!coordinator.router().is_registered("c"));
    }

    #[tokio::test]
    async fn test_duplicate_transaction_rejected() {
        let engine = Arc::new(MockEngine::new());
        let (coordinator, _, _) = coordinator(&engine);
        let _inbox = engine.register_inbox("P");

        let _first = coordinator
            .start_commit(TransactionId::new("c"), Vec::new(), &["P:a.jpg"])
            .unwrap();
        let second = coordinator.start_commit(TransactionId::new("c"), Vec::new(), &["P:b.jpg"]);
        assert!(matches!(
            second,
            Err(CoordinatorError::DuplicateTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_votes_and_acks_from_scripted_participant() {
        let engine = Arc::new(MockEngine::new());
        let (coordinator, disk, sink) = coordinator(&engine);
        let mut inbox = engine.register_inbox("P");

        let handle = coordinator
            .start_commit(TransactionId::new("c"), b"img".to_vec(), &["P:a.jpg"])
            .unwrap();
        let client = MockClient::new("P".to_string(), engine.clone());

        let vote = CommitMessage::from_message(inbox.recv().await.unwrap()).unwrap();
        assert_eq!(vote.kind, MessageKind::Vote);
        assert_eq!(vote.sources, vec!["a.jpg"]);
        assert_eq!(vote.artifact, b"img");

        // A stray ack during voting is held for the decision phase
        let ack = CommitMessage::reply(MessageKind::Ack, "P", TransactionId::new("c"));
        client.send("Server", ack.clone().into_message()).await.unwrap();
        let yes = CommitMessage::reply(MessageKind::Yes, "P", TransactionId::new("c"));
        client.send("Server", yes.clone().into_message()).await.unwrap();
        client.send("Server", yes.into_message()).await.unwrap();

        let outcome = handle.outcome().await.unwrap();
        assert_eq!(outcome.decision, Decision::Commit);
        assert!(sink.get("c").is_some());

        let commit = CommitMessage::from_message(inbox.recv().await.unwrap()).unwrap();
        assert_eq!(commit.kind, MessageKind::Commit);
        assert_eq!(commit.sources, vec!["a.jpg"]);
        assert!(commit.artifact.is_empty());
        assert_eq!(disk.lines().len(), 3);
    }

    #[tokio::test]
    async fn test_build_request_starts_transaction() {
        let engine = Arc::new(MockEngine::new());
        let (coordinator, _, _) = coordinator(&engine);
        let mut inbox = engine.register_inbox("P");

        let request = BuildRequest {
            collage: TransactionId::new("c"),
            image: b"img".to_vec(),
            sources: vec!["P:a.jpg".to_string()],
        };
        assert!(coordinator.deliver(request.into_message()).await);

        let vote = CommitMessage::from_message(inbox.recv().await.unwrap()).unwrap();
        assert_eq!(vote.transaction_id.as_str(), "c");
        assert!(coordinator.router().is_registered("c"));
    }

    #[tokio::test]
    async fn test_malformed_build_request_rejected() {
        let engine = Arc::new(MockEngine::new());
        let (coordinator, disk, _) = coordinator(&engine);

        let missing_sources = Message::with_body(b"img".to_vec())
            .with_header("kind", "build")
            .with_header("txn_id", "c");
        assert!(matches!(
            coordinator.start_request(missing_sources.clone()),
            Err(CoordinatorError::InvalidRequest(_))
        ));
        assert!(!coordinator.deliver(missing_sources).await);
        assert!(disk.lines().is_empty());
        assert!(!coordinator.router().is_registered("c"));
    }
}
