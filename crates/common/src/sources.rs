//! Parsing and partitioning of collage source lists
//!
//! A build request names each source image as `participant:resource`. The
//! coordinator groups them by owning participant before the vote phase.

use crate::ParticipantId;
use std::collections::BTreeMap;
use thiserror::Error;

/// Source images grouped by owning participant, in first-seen order
pub type SourceMap = BTreeMap<ParticipantId, Vec<String>>;

/// Errors from parsing a source reference
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Invalid source {0:?}: expected <participant>:<resource>")]
    InvalidSource(String),
}

/// A single `participant:resource` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub participant: ParticipantId,
    pub resource: String,
}

impl SourceRef {
    /// Parse a reference, splitting at the first `:`
    pub fn parse(s: &str) -> Result<Self, SourceError> {
        match s.split_once(':') {
            Some((participant, resource)) if !participant.is_empty() && !resource.is_empty() => {
                Ok(Self {
                    participant: ParticipantId::new(participant),
                    resource: resource.to_string(),
                })
            }
            _ => Err(SourceError::InvalidSource(s.to_string())),
        }
    }
}

/// Group source references by participant
///
/// Resources keep the order in which they first appear; a resource named
/// twice for the same participant is only pledged once.
pub fn partition_sources<S: AsRef<str>>(sources: &[S]) -> Result<SourceMap, SourceError> {
    let mut map = SourceMap::new();
    for source in sources {
        let SourceRef {
            participant,
            resource,
        } = SourceRef::parse(source.as_ref())?;

        let resources = map.entry(participant).or_default();
        if !resources.contains(&resource) {
            resources.push(resource);
        }
    }
    Ok(map)
}
