//! Routing of participant replies to their transaction
//!
//! Every in-flight transaction owns an inbox. The router maps transaction
//! IDs to inboxes so replies arriving on the shared inbound path reach only
//! the task that is waiting for them.
//!
//! A name stays taken from registration until its `Finish` is logged. A
//! transaction that stops on a local error keeps its name until a recovery
//! pass takes it over, so no new transaction can start under a name the log
//! still shows as unfinished.

use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use lru::LruCache;
use parking_lot::Mutex;
use proven_common::TransactionId;
use proven_engine::{Message, MessageHandler};
use proven_protocol::CommitMessage;
use std::num::NonZeroUsize;
use tokio::sync::mpsc;

/// Receiving end of a transaction's replies, in arrival order
pub type Inbox = mpsc::UnboundedReceiver<CommitMessage>;

const DEFAULT_FINISHED_CAPACITY: usize = 10_000;

/// What happened to a routed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued for an in-flight transaction
    Delivered,
    /// Reply for a transaction that already finished; nobody needs it
    Discarded,
    /// No such transaction (yet); the transport should try again later
    Unknown,
    /// Not a reply the coordinator understands
    Malformed,
}

/// Maps transaction IDs to the inbox of the task running them
pub struct MessageRouter {
    /// Inboxes of in-flight transactions
    inboxes: DashMap<TransactionId, mpsc::UnboundedSender<CommitMessage>>,

    /// Transactions that stopped on a local error, waiting for recovery
    stalled: DashSet<TransactionId>,

    /// Most recently finished transactions
    ///
    /// Late replies for anything evicted look unknown and are eventually
    /// dropped by the transport.
    finished: Mutex<LruCache<TransactionId, ()>>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::with_finished_capacity(DEFAULT_FINISHED_CAPACITY)
    }

    /// Router remembering up to `capacity` finished transactions
    pub fn with_finished_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inboxes: DashMap::new(),
            stalled: DashSet::new(),
            finished: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Create the inbox for a new transaction
    ///
    /// Must happen before the first message for the transaction is sent, so
    /// no early reply is lost. Fails if the name is in flight or waiting for
    /// recovery.
    pub fn register(&self, transaction: &TransactionId) -> Result<Inbox> {
        self.insert(transaction, false)
    }

    /// Create the inbox for a transaction taken over by recovery
    ///
    /// Unlike [`register`](Self::register) this claims a stalled name.
    pub fn resume(&self, transaction: &TransactionId) -> Result<Inbox> {
        self.insert(transaction, true)
    }

    fn insert(&self, transaction: &TransactionId, claim_stalled: bool) -> Result<Inbox> {
        match self.inboxes.entry(transaction.clone()) {
            Entry::Occupied(_) => Err(CoordinatorError::DuplicateTransaction(transaction.clone())),
            Entry::Vacant(entry) => {
                if claim_stalled {
                    self.stalled.remove(transaction);
                } else if self.stalled.contains(transaction) {
                    return Err(CoordinatorError::DuplicateTransaction(transaction.clone()));
                }
                let (tx, rx) = mpsc::unbounded_channel();
                entry.insert(tx);
                self.finished.lock().pop(transaction);
                Ok(rx)
            }
        }
    }

    /// Whether a transaction is in flight
    pub fn is_registered(&self, transaction: &str) -> bool {
        self.inboxes.contains_key(transaction)
    }

    /// Whether a transaction stopped on an error and waits for recovery
    pub fn is_stalled(&self, transaction: &str) -> bool {
        self.stalled.contains(transaction)
    }

    /// Queue a raw message for its transaction
    pub fn route(&self, message: Message) -> RouteOutcome {
        let reply = match CommitMessage::from_message(message) {
            Ok(reply) if reply.kind.is_reply() => reply,
            Ok(other) => {
                tracing::warn!(
                    "Rejecting {} message from {}: not a reply",
                    other.kind.as_str(),
                    other.sender
                );
                return RouteOutcome::Malformed;
            }
            Err(e) => {
                tracing::warn!("Rejecting malformed message: {}", e);
                return RouteOutcome::Malformed;
            }
        };

        let transaction = reply.transaction_id.clone();
        if let Some(inbox) = self.inboxes.get(&transaction)
            && inbox.send(reply).is_ok()
        {
            return RouteOutcome::Delivered;
        }

        if self.finished.lock().contains(&transaction) {
            tracing::debug!("Discarding late reply for finished transaction {}", transaction);
            RouteOutcome::Discarded
        } else {
            tracing::debug!("No inbox for transaction {}", transaction);
            RouteOutcome::Unknown
        }
    }

    /// Retire a transaction whose `Finish` is durable
    pub fn finish(&self, transaction: &TransactionId) {
        self.inboxes.remove(transaction);
        self.finished.lock().put(transaction.clone(), ());
    }

    /// Park a transaction that stopped without finishing
    ///
    /// Its replies become unroutable and its name stays taken until
    /// [`resume`](Self::resume) hands it to recovery.
    pub fn stall(&self, transaction: &TransactionId) {
        self.stalled.insert(transaction.clone());
        self.inboxes.remove(transaction);
    }
}

#[async_trait]
impl MessageHandler for MessageRouter {
    async fn deliver(&self, message: Message) -> bool {
        matches!(
            self.route(message),
            RouteOutcome::Delivered | RouteOutcome::Discarded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proven_protocol::MessageKind;

    fn reply(kind: MessageKind, sender: &str, txn: &str) -> Message {
        CommitMessage::reply(kind, sender, TransactionId::new(txn)).into_message()
    }

    #[tokio::test]
    async fn test_replies_reach_only_their_transaction() {
        let router = MessageRouter::new();
        let mut inbox1 = router.register(&TransactionId::new("c1")).unwrap();
        let mut inbox2 = router.register(&TransactionId::new("c2")).unwrap();

        assert_eq!(
            router.route(reply(MessageKind::Yes, "a", "c2")),
            RouteOutcome::Delivered
        );
        assert_eq!(
            router.route(reply(MessageKind::No, "b", "c1")),
            RouteOutcome::Delivered
        );

        let got = inbox1.recv().await.unwrap();
        assert_eq!((got.kind, got.sender.as_str()), (MessageKind::No, "b"));
        let got = inbox2.recv().await.unwrap();
        assert_eq!((got.kind, got.sender.as_str()), (MessageKind::Yes, "a"));
        assert!(inbox1.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let router = MessageRouter::new();
        let txn = TransactionId::new("c1");
        let _inbox = router.register(&txn).unwrap();

        assert!(matches!(
            router.register(&txn),
            Err(CoordinatorError::DuplicateTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_finished_transactions() {
        let router = MessageRouter::new();
        let txn = TransactionId::new("c1");

        // Not registered yet: the transport has to retry
        assert!(!router.deliver(reply(MessageKind::Ack, "a", "c1")).await);

        let _inbox = router.register(&txn).unwrap();
        router.finish(&txn);
        assert!(!router.is_registered("c1"));

        assert_eq!(
            router.route(reply(MessageKind::Ack, "a", "c1")),
            RouteOutcome::Discarded
        );
        assert!(router.deliver(reply(MessageKind::Ack, "a", "c1")).await);

        // A new transaction may reuse the name once the old one is done
        let mut inbox = router.register(&txn).unwrap();
        assert!(router.deliver(reply(MessageKind::Yes, "a", "c1")).await);
        assert_eq!(inbox.recv().await.unwrap().kind, MessageKind::Yes);
    }

    #[test]
    fn test_stalled_transaction_keeps_its_name() {
        let router = MessageRouter::new();
        let txn = TransactionId::new("c1");
        let _inbox = router.register(&txn).unwrap();
        router.stall(&txn);

        assert!(router.is_stalled("c1"));
        assert!(!router.is_registered("c1"));
        assert_eq!(
            router.route(reply(MessageKind::Ack, "a", "c1")),
            RouteOutcome::Unknown
        );
        assert!(matches!(
            router.register(&txn),
            Err(CoordinatorError::DuplicateTransaction(_))
        ));

        // Recovery takes it over; only then is the name free again after Finish
        let _inbox = router.resume(&txn).unwrap();
        assert!(!router.is_stalled("c1"));
        assert!(router.resume(&txn).is_err());
        router.finish(&txn);
        assert!(router.register(&txn).is_ok());
    }

    #[test]
    fn test_finished_set_is_bounded() {
        let router = MessageRouter::with_finished_capacity(2);
        for name in ["c1", "c2", "c3"] {
            let txn = TransactionId::new(name);
            let _inbox = router.register(&txn).unwrap();
            router.finish(&txn);
        }

        // The oldest finished transaction was forgotten
        assert_eq!(
            router.route(reply(MessageKind::Ack, "a", "c1")),
            RouteOutcome::Unknown
        );
        for name in ["c2", "c3"] {
            assert_eq!(
                router.route(reply(MessageKind::Ack, "a", name)),
                RouteOutcome::Discarded
            );
        }
    }

    #[test]
    fn test_malformed_and_non_reply_messages() {
        let router = MessageRouter::new();
        let _inbox = router.register(&TransactionId::new("c1")).unwrap();

        let garbage = Message::with_body(vec![1, 2]).with_header("kind", "yes");
        assert_eq!(router.route(garbage), RouteOutcome::Malformed);

        let vote = CommitMessage::vote("a", TransactionId::new("c1"), Vec::new(), Vec::new());
        assert_eq!(router.route(vote.into_message()), RouteOutcome::Malformed);
    }
}
