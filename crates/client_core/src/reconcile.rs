use shared::{
    domain::{MessageId, ThreadRef},
    protocol::{GroupMessagePayload, LastMessage, MessagePayload},
};

/// One in-flight send awaiting its server identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend<M> {
    pub thread: ThreadRef,
    /// Preview the thread showed before the optimistic insert.
    pub prior_preview: Option<LastMessage>,
    /// Preview written by the optimistic insert.
    pub optimistic_preview: LastMessage,
    /// The optimistic record, restored whenever its thread is reloaded.
    pub record: M,
    /// Accepted by the server without naming the final id yet.
    pub acknowledged: bool,
}

/// Provisional id -> pending send, in send order. Every entry leaves the
/// map exactly once, through `resolve`, `fail`, `settle` or `forget_acknowledged`.
#[derive(Debug)]
pub struct Reconciliation<M> {
    pending: Vec<(MessageId, PendingSend<M>)>,
}

impl<M> Default for Reconciliation<M> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<M: Identified + Clone> Reconciliation<M> {
    /// Registers a send keyed by the record's provisional id.
    pub fn begin(&mut self, pending: PendingSend<M>) -> MessageId {
        let temp_id = pending.record.message_id().clone();
        self.pending.push((temp_id.clone(), pending));
        temp_id
    }

    fn take(&mut self, temp_id: &MessageId) -> Option<PendingSend<M>> {
        let index = self.pending.iter().position(|(id, _)| id == temp_id)?;
        Some(self.pending.remove(index).1)
    }

    pub fn resolve(&mut self, temp_id: &MessageId) -> Option<PendingSend<M>> {
        self.take(temp_id)
    }

    pub fn fail(&mut self, temp_id: &MessageId) -> Option<PendingSend<M>> {
        self.take(temp_id)
    }

    pub fn acknowledge(&mut self, temp_id: &MessageId) -> bool {
        match self.pending.iter_mut().find(|(id, _)| id == temp_id) {
            Some((_, pending)) => {
                pending.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, temp_id: &MessageId) -> bool {
        self.pending.iter().any(|(id, _)| id == temp_id)
    }

    pub fn is_acknowledged(&self, temp_id: &MessageId) -> bool {
        self.pending
            .iter()
            .any(|(id, pending)| id == temp_id && pending.acknowledged)
    }

    /// Optimistic records still waiting in `thread`, oldest first.
    pub fn records_for(&self, thread: ThreadRef) -> Vec<M> {
        self.pending
            .iter()
            .filter(|(_, pending)| pending.thread == thread)
            .map(|(_, pending)| pending.record.clone())
            .collect()
    }

    /// Resolves sends of `thread` whose echo is already part of `history`
    /// (matched through the echoed `temp_id`). Returns the settled ids.
    pub fn settle(&mut self, thread: ThreadRef, history: &[M]) -> Vec<MessageId> {
        let mut settled = Vec::new();
        self.pending.retain(|(id, pending)| {
            let echoed = pending.thread == thread
                && history.iter().any(|m| m.echoed_temp_id() == Some(id));
            if echoed {
                settled.push(id.clone());
            }
            !echoed
        });
        settled
    }

    /// Drops acknowledged sends whose thread fails `keep`. Unacknowledged
    /// sends always end through the ack or its timeout.
    pub fn forget_acknowledged(&mut self, keep: impl Fn(ThreadRef) -> bool) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|(_, pending)| !pending.acknowledged || keep(pending.thread));
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

pub trait Identified {
    fn message_id(&self) -> &MessageId;
    fn set_message_id(&mut self, id: MessageId);
    /// Provisional id the sender attached, when the server echoes it back.
    fn echoed_temp_id(&self) -> Option<&MessageId>;
}

impl Identified for MessagePayload {
    fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    fn set_message_id(&mut self, id: MessageId) {
        self.message_id = id;
    }

    fn echoed_temp_id(&self) -> Option<&MessageId> {
        self.temp_id.as_ref()
    }
}

impl Identified for GroupMessagePayload {
    fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    fn set_message_id(&mut self, id: MessageId) {
        self.message_id = id;
    }

    fn echoed_temp_id(&self) -> Option<&MessageId> {
        self.temp_id.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substitution {
    /// Provisional id rewritten in place.
    Replaced,
    /// The server id was already listed; the provisional record was dropped.
    Collapsed,
    /// Provisional id not in this list (thread not loaded).
    Missing,
}

pub fn substitute_id<M: Identified>(
    list: &mut Vec<M>,
    temp_id: &MessageId,
    server_id: &MessageId,
) -> Substitution {
    let Some(index) = list.iter().position(|m| m.message_id() == temp_id) else {
        return Substitution::Missing;
    };
    if list.iter().any(|m| m.message_id() == server_id) {
        list.remove(index);
        return Substitution::Collapsed;
    }
    list[index].set_message_id(server_id.clone());
    Substitution::Replaced
}

pub fn remove_id<M: Identified>(list: &mut Vec<M>, id: &MessageId) -> bool {
    let before = list.len();
    list.retain(|m| m.message_id() != id);
    list.len() != before
}

pub fn contains_id<M: Identified>(list: &[M], id: &MessageId) -> bool {
    list.iter().any(|m| m.message_id() == id)
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
