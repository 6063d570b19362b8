use shared::domain::{ConversationId, GroupId, ThreadRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Inactive,
    Loading,
    Active,
}

/// Proof that a history fetch was started for a particular selection.
/// A ticket whose generation no longer matches is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusTicket {
    pub thread: ThreadRef,
    generation: u64,
}

/// The one focused thread across both domains.
#[derive(Debug, Default)]
pub struct Focus {
    target: Option<ThreadRef>,
    phase: Phase,
    generation: u64,
}

impl Focus {
    pub fn select(&mut self, thread: ThreadRef) -> FocusTicket {
        self.generation += 1;
        self.target = Some(thread);
        self.phase = Phase::Loading;
        FocusTicket {
            thread,
            generation: self.generation,
        }
    }

    pub fn is_current(&self, ticket: &FocusTicket) -> bool {
        self.generation == ticket.generation && self.target == Some(ticket.thread)
    }

    pub fn activate(&mut self, ticket: &FocusTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.phase = Phase::Active;
        true
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.target = None;
        self.phase = Phase::Inactive;
    }

    pub fn clear_if(&mut self, thread: ThreadRef) -> bool {
        if self.target != Some(thread) {
            return false;
        }
        self.clear();
        true
    }

    pub fn target(&self) -> Option<ThreadRef> {
        self.target
    }

    pub fn is_focused(&self, thread: ThreadRef) -> bool {
        self.target == Some(thread)
    }

    pub fn phase_of(&self, thread: ThreadRef) -> Phase {
        if self.is_focused(thread) {
            self.phase
        } else {
            Phase::Inactive
        }
    }

    pub fn direct(&self) -> Option<ConversationId> {
        match self.target {
            Some(ThreadRef::Direct(id)) => Some(id),
            _ => None,
        }
    }

    pub fn group(&self) -> Option<GroupId> {
        match self.target {
            Some(ThreadRef::Group(id)) => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/focus_tests.rs"]
mod tests;
