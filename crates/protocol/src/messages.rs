//! Typed messages exchanged during a collage commit

use crate::header;
use proven_common::{Decision, TransactionId};
use proven_engine::Message;
use std::collections::HashMap;

/// Kind of a protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Vote request (coordinator to participant)
    Vote,
    /// Positive vote (participant to coordinator)
    Yes,
    /// Negative vote (participant to coordinator)
    No,
    /// Commit decision (coordinator to participant)
    Commit,
    /// Abort decision (coordinator to participant)
    Abort,
    /// Decision acknowledgement (participant to coordinator)
    Ack,
}

impl MessageKind {
    /// Parse from string header value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vote" => Some(Self::Vote),
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "commit" => Some(Self::Commit),
            "abort" => Some(Self::Abort),
            "ack" => Some(Self::Ack),
            _ => None,
        }
    }

    /// Convert to string header value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vote => "vote",
            Self::Yes => "yes",
            Self::No => "no",
            Self::Commit => "commit",
            Self::Abort => "abort",
            Self::Ack => "ack",
        }
    }

    /// The decision carried by a commit/abort message
    pub fn decision(&self) -> Option<Decision> {
        match self {
            Self::Commit => Some(Decision::Commit),
            Self::Abort => Some(Decision::Abort),
            _ => None,
        }
    }

    pub fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Commit => Self::Commit,
            Decision::Abort => Self::Abort,
        }
    }

    /// Whether participants send this kind back to the coordinator
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Yes | Self::No | Self::Ack)
    }
}

/// A protocol message in typed form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub kind: MessageKind,
    /// Node that sent the message; replies go back to it
    pub sender: String,
    pub transaction_id: TransactionId,
    /// Resource names the receiving participant is asked about (empty for replies)
    pub sources: Vec<String>,
    /// Collage bytes (vote requests only, empty otherwise)
    pub artifact: Vec<u8>,
}

impl CommitMessage {
    /// Vote request for one participant's sources
    pub fn vote(
        sender: impl Into<String>,
        transaction_id: TransactionId,
        sources: Vec<String>,
        artifact: Vec<u8>,
    ) -> Self {
        Self {
            kind: MessageKind::Vote,
            sender: sender.into(),
            transaction_id,
            sources,
            artifact,
        }
    }

    /// Commit or abort decision for one participant's sources
    pub fn decision(
        sender: impl Into<String>,
        transaction_id: TransactionId,
        decision: Decision,
        sources: Vec<String>,
    ) -> Self {
        Self {
            kind: MessageKind::from_decision(decision),
            sender: sender.into(),
            transaction_id,
            sources,
            artifact: Vec::new(),
        }
    }

    /// Yes, no, or ack reply
    pub fn reply(kind: MessageKind, sender: impl Into<String>, transaction_id: TransactionId) -> Self {
        Self {
            kind,
            sender: sender.into(),
            transaction_id,
            sources: Vec::new(),
            artifact: Vec::new(),
        }
    }

    /// Parse a Message into a typed CommitMessage
    pub fn from_message(msg: Message) -> Result<Self, ParseError> {
        let kind_str = msg
            .get_header(header::KIND)
            .ok_or(ParseError::MissingHeader(header::KIND))?;
        let kind = MessageKind::parse(kind_str)
            .ok_or_else(|| ParseError::InvalidKind(kind_str.to_string()))?;

        let sender = msg
            .get_header(header::SENDER)
            .filter(|s| !s.is_empty())
            .ok_or(ParseError::MissingHeader(header::SENDER))?
            .to_string();

        let txn_id_str = msg
            .get_header(header::TXN_ID)
            .ok_or(ParseError::MissingHeader(header::TXN_ID))?;
        let transaction_id =
            TransactionId::parse(txn_id_str).map_err(ParseError::InvalidTransactionId)?;

        let sources = match msg.get_header(header::SOURCES) {
            Some(s) => serde_json::from_str(s)
                .map_err(|e| ParseError::InvalidSources(e.to_string()))?,
            None => Vec::new(),
        };

        Ok(Self {
            kind,
            sender,
            transaction_id,
            sources,
            artifact: msg.body,
        })
    }

    /// Convert to a raw Message for sending
    pub fn into_message(self) -> Message {
        let mut headers = HashMap::new();
        headers.insert(header::KIND.to_string(), self.kind.as_str().to_string());
        headers.insert(header::SENDER.to_string(), self.sender);
        headers.insert(header::TXN_ID.to_string(), self.transaction_id.to_string());

        if !self.kind.is_reply() {
            headers.insert(
                header::SOURCES.to_string(),
                serde_json::to_string(&self.sources).unwrap_or_else(|_| "[]".to_string()),
            );
        }

        Message::new(self.artifact, headers)
    }
}

/// Transaction ID header of a raw message, without parsing the rest
pub fn transaction_id_of(msg: &Message) -> Option<&str> {
    msg.get_header(header::TXN_ID)
}

/// Errors that can occur when parsing messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid message kind: {0}")]
    InvalidKind(String),

    #[error("{0}")]
    InvalidTransactionId(String),

    #[error("Invalid source list: {0}")]
    InvalidSources(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_request_carries_sources_and_artifact() {
        let vote = CommitMessage::vote(
            "Server",
            TransactionId::new("collage1"),
            vec!["a.jpg".to_string(), "b.jpg".to_string()],
            vec![1, 2, 3],
        );

        let msg = vote.clone().into_message();
        assert_eq!(msg.get_header("kind"), Some("vote"));
        assert_eq!(msg.get_header("sources"), Some(r#"["a.jpg","b.jpg"]"#));
        assert_eq!(msg.body, vec![1, 2, 3]);

        assert_eq!(CommitMessage::from_message(msg).unwrap(), vote);
    }

    #[test]
    fn test_replies_have_no_sources_header() {
        let ack = CommitMessage::reply(MessageKind::Ack, "alice", TransactionId::new("c"));
        let msg = ack.into_message();

        assert!(msg.get_header("sources").is_none());
        assert!(msg.body.is_empty());
        assert_eq!(transaction_id_of(&msg), Some("c"));
    }

    #[test]
    fn test_decision_kinds() {
        let commit = CommitMessage::decision(
            "Server",
            TransactionId::new("c"),
            Decision::Commit,
            vec!["a.jpg".to_string()],
        );
        assert_eq!(commit.kind, MessageKind::Commit);
        assert_eq!(commit.kind.decision(), Some(Decision::Commit));
        assert!(commit.artifact.is_empty());
        assert_eq!(MessageKind::Vote.decision(), None);
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        let no_kind = Message::with_body(Vec::new())
            .with_header("sender", "a")
            .with_header("txn_id", "c");
        assert_eq!(
            CommitMessage::from_message(no_kind),
            Err(ParseError::MissingHeader("kind"))
        );

        let bad_kind = Message::with_body(Vec::new())
            .with_header("kind", "ACK!")
            .with_header("sender", "a")
            .with_header("txn_id", "c");
        assert_eq!(
            CommitMessage::from_message(bad_kind),
            Err(ParseError::InvalidKind("ACK!".to_string()))
        );

        let empty_txn = Message::with_body(Vec::new())
            .with_header("kind", "yes")
            .with_header("sender", "a")
            .with_header("txn_id", "");
        assert!(matches!(
            CommitMessage::from_message(empty_txn),
            Err(ParseError::InvalidTransactionId(_))
        ));

        let bad_sources = Message::with_body(Vec::new())
            .with_header("kind", "vote")
            .with_header("sender", "a")
            .with_header("txn_id", "c")
            .with_header("sources", "a.jpg");
        assert!(matches!(
            CommitMessage::from_message(bad_sources),
            Err(ParseError::InvalidSources(_))
        ));
    }
}
