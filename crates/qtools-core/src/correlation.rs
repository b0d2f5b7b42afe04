//! Outstanding request tracking
//!
//! The requester records the id of every request it sends and checks each
//! response's correlation id against the record. Ids are counted, so a
//! caller-supplied id may be in flight more than once.

use std::collections::HashMap;

use qtools_types::{Error, MessageId, Result};

/// Default bound on requests awaiting a response
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Bounded multiset of correlation ids
#[derive(Debug)]
pub struct PendingRequests {
    ids: HashMap<MessageId, usize>,
    len: usize,
    capacity: usize,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_PENDING)
    }
}

impl PendingRequests {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashMap::new(),
            len: 0,
            capacity: capacity.max(1),
        }
    }

    /// Record a sent request
    pub fn insert(&mut self, id: MessageId) -> Result<()> {
        if self.is_full() {
            return Err(Error::Internal(format!(
                "More than {} requests pending",
                self.capacity
            )));
        }

        *self.ids.entry(id).or_insert(0) += 1;
        self.len += 1;

        Ok(())
    }

    /// Match a response against a pending request
    pub fn remove(&mut self, id: &MessageId) -> Result<()> {
        let count = self
            .ids
            .get_mut(id)
            .ok_or_else(|| Error::UnknownCorrelation(id.to_string()))?;

        *count -= 1;

        if *count == 0 {
            self.ids.remove(id);
        }

        self.len -= 1;

        Ok(())
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains_key(id)
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
