use std::collections::{HashSet, VecDeque};

use shared::domain::MessageId;

/// Bounded set of recently processed message identifiers.
///
/// Eviction is FIFO by insertion order: once the ledger grows past
/// `capacity`, the oldest `evict_batch` identifiers are forgotten together.
/// Lookups never refresh an entry's age.
#[derive(Debug)]
pub struct DedupLedger {
    order: VecDeque<MessageId>,
    members: HashSet<MessageId>,
    capacity: usize,
    evict_batch: usize,
}

impl DedupLedger {
    pub fn new(capacity: usize, evict_batch: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
            evict_batch: evict_batch.clamp(1, capacity),
        }
    }

    pub fn seen(&self, id: &MessageId) -> bool {
        self.members.contains(id)
    }

    /// Returns `false` when the identifier was already recorded.
    pub fn remember(&mut self, id: MessageId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            for _ in 0..self.evict_batch {
                match self.order.pop_front() {
                    Some(evicted) => {
                        self.members.remove(&evicted);
                    }
                    None => break,
                }
            }
        }
        true
    }

    /// Check-then-record in one step. Returns `true` on first sighting.
    pub fn admit(&mut self, id: &MessageId) -> bool {
        if self.seen(id) {
            return false;
        }
        self.remember(id.clone())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

#[cfg(test)]
#[path = "tests/dedup_tests.rs"]
mod tests;
