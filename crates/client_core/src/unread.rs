/// Domain-wide unread aggregate. Per-thread counters live on the
/// conversation and group records and are passed in by reference so the two
/// always move together.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnreadTally {
    total: u32,
}

impl UnreadTally {
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn record_incoming(&mut self, counter: &mut u32) {
        *counter = counter.saturating_add(1);
        self.total = self.total.saturating_add(1);
    }

    /// Zeroes the thread counter and removes its whole prior value from the
    /// aggregate. Returns the prior value.
    pub fn mark_read(&mut self, counter: &mut u32) -> u32 {
        let prior = std::mem::take(counter);
        self.total = self.total.saturating_sub(prior);
        prior
    }

    /// A thread left the list (deleted, left, removed).
    pub fn forget(&mut self, counter: u32) {
        self.total = self.total.saturating_sub(counter);
    }

    pub fn rebase(&mut self, total: u32) {
        self.total = total;
    }

    pub fn recompute<'a>(&mut self, counters: impl IntoIterator<Item = &'a u32>) {
        self.total = counters
            .into_iter()
            .fold(0u32, |acc, count| acc.saturating_add(*count));
    }
}

#[cfg(test)]
#[path = "tests/unread_tests.rs"]
mod tests;
