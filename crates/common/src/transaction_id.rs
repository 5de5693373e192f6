//! Transaction identifier
//!
//! A collage transaction is named after the artifact it produces. Names are
//! unique among pending transactions, which is all the router needs to keep
//! replies apart.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Transaction identifier (the collage file name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Create a transaction ID from a collage name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the collage name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse from a header value, rejecting empty names
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.is_empty() {
            return Err("Invalid transaction ID: empty name".to_string());
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TransactionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_empty() {
        assert!(TransactionId::parse("").is_err());
        assert_eq!(
            TransactionId::parse("collage1").unwrap(),
            TransactionId::new("collage1")
        );
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let txn = TransactionId::new("collage1");
        let json = serde_json::to_string(&txn).unwrap();
        assert_eq!(json, "\"collage1\"");

        let back: TransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, txn);
    }
}
