//! One collage transaction, from `Start` to `Finish`
//!
//! A transaction runs as its own task and only ever reads its own inbox.
//! Every externally visible step is preceded by the log record that lets a
//! restarted coordinator pick it up again.

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::log::{CoordinatorLog, CoordinatorRecord};
use crate::router::{Inbox, MessageRouter};
use crate::sink::ArtifactSink;
use parking_lot::Mutex;
use proven_common::{Decision, ParticipantId, SourceMap, TransactionId};
use proven_engine::Transport;
use proven_protocol::{CommitMessage, MessageKind};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

/// Progress of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for votes
    Voting,
    /// Logging the decision and producing the collage
    Deciding,
    /// Delivering the decision until every participant acknowledges
    Completing,
    /// `Finish` is logged
    Done,
}

/// Final result of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub transaction: TransactionId,
    pub decision: Decision,
}

/// Handle to a running transaction
pub struct TransactionHandle {
    transaction: TransactionId,
    phase: Arc<Mutex<Phase>>,
    task: JoinHandle<Result<Outcome>>,
}

impl TransactionHandle {
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction
    }

    /// Current phase of the transaction
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Wait until `Finish` is logged
    ///
    /// Aborting is a normal outcome; an error means the transaction stopped
    /// on a local failure and is left for the next recovery pass.
    pub async fn outcome(self) -> Result<Outcome> {
        self.task
            .await
            .map_err(|e| CoordinatorError::TaskFailed(e.to_string()))?
    }
}

/// Shared services a transaction runs against
#[derive(Clone)]
pub(crate) struct Services {
    pub config: Arc<CoordinatorConfig>,
    pub transport: Arc<dyn Transport>,
    pub log: Arc<CoordinatorLog>,
    pub sink: Arc<dyn ArtifactSink>,
    pub router: Arc<MessageRouter>,
}

/// Where a transaction task starts
pub(crate) enum Entry {
    /// Fresh build request
    New { artifact: Vec<u8> },
    /// `Start` logged but no decision: abort it
    RecoveredStart,
    /// Decision logged but no `Finish`: deliver it again
    RecoveredDecision(Decision),
}

/// State of one transaction, owned by its task
pub(crate) struct Transaction {
    id: TransactionId,
    sources: SourceMap,
    inbox: Inbox,
    phase: Arc<Mutex<Phase>>,

    /// Replies seen while voting that were not votes
    held: Vec<CommitMessage>,

    services: Services,
}

impl Transaction {
    pub fn new(id: TransactionId, sources: SourceMap, inbox: Inbox, services: Services) -> Self {
        Self {
            id,
            sources,
            inbox,
            phase: Arc::new(Mutex::new(Phase::Voting)),
            held: Vec::new(),
            services,
        }
    }

    /// Run the transaction in its own task
    pub fn spawn(self, entry: Entry) -> TransactionHandle {
        self.spawn_after(Vec::new(), entry)
    }

    /// Run the transaction after delivering the outcomes of `earlier` starts
    ///
    /// `earlier` holds superseded starts of the same name, oldest first. The
    /// router entry is retired when the task finishes and parked for the
    /// next recovery pass when it stops on an error.
    pub fn spawn_after(
        mut self,
        earlier: Vec<(SourceMap, Decision)>,
        entry: Entry,
    ) -> TransactionHandle {
        let id = self.id.clone();
        let phase = self.phase.clone();
        let router = self.services.router.clone();
        let task_id = id.clone();

        let task = tokio::spawn(async move {
            let result = self.run_after(earlier, entry).await;
            match &result {
                Ok(_) => router.finish(&task_id),
                Err(e) => {
                    tracing::error!("Transaction {} stopped, left for recovery: {}", task_id, e);
                    router.stall(&task_id);
                }
            }
            result
        });

        TransactionHandle {
            transaction: id,
            phase,
            task,
        }
    }

    async fn run_after(
        &mut self,
        earlier: Vec<(SourceMap, Decision)>,
        entry: Entry,
    ) -> Result<Outcome> {
        let latest = std::mem::take(&mut self.sources);
        for (sources, decision) in earlier {
            tracing::warn!(
                "Transaction {}: delivering {} for an earlier unfinished start",
                self.id,
                decision
            );
            self.sources = sources;
            self.complete(decision).await?;
        }
        // Acks queued for the earlier starts say nothing about this one
        while self.inbox.try_recv().is_ok() {}

        self.sources = latest;
        self.run(entry).await
    }

    async fn run(&mut self, entry: Entry) -> Result<Outcome> {
        let decision = match entry {
            Entry::New { artifact } => {
                self.log(CoordinatorRecord::Start {
                    transaction: self.id.clone(),
                    sources: self.sources.clone(),
                })?;
                tracing::info!(
                    "Transaction {} started with {} participants",
                    self.id,
                    self.sources.len()
                );

                let decision = self.collect_votes(&artifact).await;
                self.decide(decision, &artifact)?;
                decision
            }
            Entry::RecoveredStart => {
                self.set_phase(Phase::Deciding);
                self.services.sink.discard(self.id.as_str())?;
                self.log(CoordinatorRecord::Decision {
                    transaction: self.id.clone(),
                    decision: Decision::Abort,
                })?;
                tracing::info!("Transaction {} recovered without a decision, aborting", self.id);
                Decision::Abort
            }
            Entry::RecoveredDecision(decision) => {
                self.set_phase(Phase::Deciding);
                if decision.is_commit() {
                    self.services.sink.publish(self.id.as_str())?;
                }
                tracing::info!(
                    "Transaction {} recovered with decision {}, resending",
                    self.id,
                    decision
                );
                decision
            }
        };

        self.complete(decision).await?;

        self.log(CoordinatorRecord::Finish {
            transaction: self.id.clone(),
        })?;
        self.set_phase(Phase::Done);
        tracing::info!("Transaction {} finished: {}", self.id, decision);

        Ok(Outcome {
            transaction: self.id.clone(),
            decision,
        })
    }

    /// Ask every participant to vote and wait for the outcome
    ///
    /// Only a `yes` from every participant inside the window commits.
    async fn collect_votes(&mut self, artifact: &[u8]) -> Decision {
        if self.sources.is_empty() {
            return Decision::Commit;
        }

        for (participant, sources) in &self.sources {
            let vote = CommitMessage::vote(
                self.services.config.node_id.clone(),
                self.id.clone(),
                sources.clone(),
                artifact.to_vec(),
            );
            self.send(participant, vote).await;
        }

        let deadline = Instant::now() + self.services.config.vote_timeout;
        let mut yes = BTreeSet::new();

        while yes.len() < self.sources.len() {
            let reply = match timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(reply)) => reply,
                Ok(None) => return Decision::Abort,
                Err(_) => {
                    tracing::info!(
                        "Transaction {} timed out with {}/{} votes",
                        self.id,
                        yes.len(),
                        self.sources.len()
                    );
                    return Decision::Abort;
                }
            };

            let Some((participant, _)) = self.sources.get_key_value(reply.sender.as_str()) else {
                tracing::debug!(
                    "Ignoring {} from {}: not in transaction {}",
                    reply.kind.as_str(),
                    reply.sender,
                    self.id
                );
                continue;
            };

            match reply.kind {
                MessageKind::Yes => {
                    tracing::debug!("Transaction {}: yes from {}", self.id, participant);
                    yes.insert(participant.clone());
                }
                MessageKind::No => {
                    tracing::info!("Transaction {}: no from {}", self.id, participant);
                    return Decision::Abort;
                }
                _ => self.held.push(reply),
            }
        }

        Decision::Commit
    }

    /// Make the decision durable before anyone hears it
    fn decide(&mut self, decision: Decision, artifact: &[u8]) -> Result<()> {
        self.set_phase(Phase::Deciding);

        if decision.is_commit() {
            self.services.sink.stage(self.id.as_str(), artifact)?;
        }
        self.log(CoordinatorRecord::Decision {
            transaction: self.id.clone(),
            decision,
        })?;
        if decision.is_commit() {
            self.services.sink.publish(self.id.as_str())?;
        }

        tracing::info!("Transaction {} decided {}", self.id, decision);
        Ok(())
    }

    /// Resend the decision until every participant has acknowledged it
    async fn complete(&mut self, decision: Decision) -> Result<()> {
        self.set_phase(Phase::Completing);

        let mut outstanding: BTreeSet<ParticipantId> = self.sources.keys().cloned().collect();
        let mut held = std::mem::take(&mut self.held);

        let mut round = 0u64;
        while !outstanding.is_empty() {
            round += 1;
            if round > 1 {
                tracing::info!(
                    "Transaction {}: resending {} to {} participants (round {})",
                    self.id,
                    decision,
                    outstanding.len(),
                    round
                );
            }

            for participant in &outstanding {
                let sources = self.sources.get(participant).cloned().unwrap_or_default();
                let message = CommitMessage::decision(
                    self.services.config.node_id.clone(),
                    self.id.clone(),
                    decision,
                    sources,
                );
                self.send(participant, message).await;
            }

            // Replies held back while voting count once every participant has the decision
            for reply in held.drain(..) {
                self.acknowledge(&mut outstanding, &reply);
            }

            let deadline = Instant::now() + self.services.config.ack_timeout;
            while !outstanding.is_empty() {
                match timeout_at(deadline, self.inbox.recv()).await {
                    Ok(Some(reply)) => self.acknowledge(&mut outstanding, &reply),
                    Ok(None) => return Err(CoordinatorError::InboxClosed(self.id.clone())),
                    Err(_) => break,
                }
            }
        }

        Ok(())
    }

    fn acknowledge(&self, outstanding: &mut BTreeSet<ParticipantId>, reply: &CommitMessage) {
        if reply.kind != MessageKind::Ack {
            tracing::debug!(
                "Transaction {}: ignoring late {} from {}",
                self.id,
                reply.kind.as_str(),
                reply.sender
            );
            return;
        }
        if outstanding.remove(reply.sender.as_str()) {
            tracing::debug!("Transaction {}: ack from {}", self.id, reply.sender);
        }
    }

    async fn send(&self, participant: &ParticipantId, message: CommitMessage) {
        if let Err(e) = self
            .services
            .transport
            .send(participant.as_str(), message.into_message())
            .await
        {
            tracing::warn!(
                "Transaction {}: send to {} failed: {}",
                self.id,
                participant,
                e
            );
        }
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    fn log(&self, record: CoordinatorRecord) -> Result<()> {
        tracing::debug!(
            "Transaction {} in {:?}: logging {:?}",
            self.id,
            *self.phase.lock(),
            record
        );
        self.services.log.append(&record)?;
        Ok(())
    }
}
