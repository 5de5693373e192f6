//! Pledged ("dirty") resources

use proven_common::TransactionId;
use std::collections::HashMap;

/// Resources pledged to pending transactions
///
/// A resource belongs to at most one transaction at a time.
#[derive(Debug, Default)]
pub struct DirtySet {
    /// Owning transaction by resource name
    owners: HashMap<String, TransactionId>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self, resource: &str) -> bool {
        self.owners.contains_key(resource)
    }

    /// Transaction a resource is pledged to
    pub fn owner(&self, resource: &str) -> Option<&TransactionId> {
        self.owners.get(resource)
    }

    /// Pledge a resource, unless another transaction already holds it
    pub fn reserve(&mut self, transaction: &TransactionId, resource: &str) -> bool {
        match self.owners.get(resource) {
            Some(owner) => owner == transaction,
            None => {
                self.owners
                    .insert(resource.to_string(), transaction.clone());
                true
            }
        }
    }

    /// Release a resource if it is pledged to `transaction`
    pub fn release(&mut self, transaction: &TransactionId, resource: &str) -> bool {
        if self.owner(resource) == Some(transaction) {
            self.owners.remove(resource);
            true
        } else {
            false
        }
    }

    /// Resources pledged to a transaction, sorted by name
    pub fn resources_of(&self, transaction: &TransactionId) -> Vec<String> {
        let mut resources: Vec<_> = self
            .owners
            .iter()
            .filter(|(_, owner)| *owner == transaction)
            .map(|(resource, _)| resource.clone())
            .collect();
        resources.sort();
        resources
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
