//! Build requests submitted to a coordinator
//!
//! A build request asks the coordinator to assemble a collage. It is the
//! only message a coordinator accepts that is not a reply to one of its own
//! transactions.

use crate::{ParseError, header};
use proven_common::TransactionId;
use proven_engine::Message;
use std::collections::HashMap;

const BUILD_KIND: &str = "build";

/// Request to commit a collage built from `participant:resource` sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub collage: TransactionId,
    pub image: Vec<u8>,
    pub sources: Vec<String>,
}

impl BuildRequest {
    /// Whether a raw message is a build request
    pub fn matches(msg: &Message) -> bool {
        msg.get_header(header::KIND) == Some(BUILD_KIND)
    }

    pub fn into_message(self) -> Message {
        let mut headers = HashMap::new();
        headers.insert(header::KIND.to_string(), BUILD_KIND.to_string());
        headers.insert(header::TXN_ID.to_string(), self.collage.to_string());
        headers.insert(
            header::SOURCES.to_string(),
            serde_json::to_string(&self.sources).unwrap_or_else(|_| "[]".to_string()),
        );
        Message::new(self.image, headers)
    }

    pub fn from_message(msg: Message) -> Result<Self, ParseError> {
        if !Self::matches(&msg) {
            let kind = msg.get_header(header::KIND).unwrap_or_default();
            return Err(ParseError::InvalidKind(kind.to_string()));
        }

        let collage = msg
            .get_header(header::TXN_ID)
            .ok_or(ParseError::MissingHeader(header::TXN_ID))
            .and_then(|s| TransactionId::parse(s).map_err(ParseError::InvalidTransactionId))?;

        let sources = msg
            .get_header(header::SOURCES)
            .ok_or(ParseError::MissingHeader(header::SOURCES))
            .and_then(|s| {
                serde_json::from_str(s).map_err(|e| ParseError::InvalidSources(e.to_string()))
            })?;

        Ok(Self {
            collage,
            image: msg.body,
            sources,
        })
    }
}
