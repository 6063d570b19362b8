use std::collections::HashMap;

use chrono::Utc;
use shared::{
    domain::{
        ConversationId, ConversationKind, CustomerId, MessageId, MessageStatus, ThreadRef, UserId,
    },
    protocol::{ClientRequest, ConversationSummary, LastMessage, MessagePayload, UnreadCounts},
};
use tracing::debug;

use crate::{
    config::ClientSettings,
    dedup::DedupLedger,
    error::SyncError,
    focus::Focus,
    presence::PresenceTracker,
    reconcile::{contains_id, remove_id, substitute_id, PendingSend, Reconciliation},
    types::{ClientEvent, Dispatch, Effect, MessageDraft},
    unread::UnreadTally,
};

/// Direct (and support) conversation state: the conversation list, the
/// message list of the loaded conversation, and in-flight sends.
#[derive(Debug)]
pub struct ConversationSync {
    me: UserId,
    conversations: Vec<ConversationSummary>,
    messages: Vec<MessagePayload>,
    loaded: Option<ConversationId>,
    ledger: DedupLedger,
    pending: Reconciliation<MessagePayload>,
    unread: UnreadTally,
}

impl ConversationSync {
    pub fn new(me: UserId, settings: &ClientSettings) -> Self {
        Self {
            me,
            conversations: Vec::new(),
            messages: Vec::new(),
            loaded: None,
            ledger: DedupLedger::new(settings.dedup_capacity, settings.dedup_evict_batch),
            pending: Reconciliation::default(),
            unread: UnreadTally::default(),
        }
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|c| c.conversation_id == id)
    }

    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    pub fn loaded(&self) -> Option<ConversationId> {
        self.loaded
    }

    pub fn unread_total(&self) -> u32 {
        self.unread.total()
    }

    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    fn index_of(&self, id: ConversationId) -> Option<usize> {
        self.conversations
            .iter()
            .position(|c| c.conversation_id == id)
    }

    pub fn replace_all(&mut self, list: Vec<ConversationSummary>, focus: &mut Focus) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.conversations = list.into_iter().filter(|c| !c.is_deleted).collect();

        let listed: Vec<_> = self.conversations.iter().map(|c| c.conversation_id).collect();
        self.pending.forget_acknowledged(|thread| match thread {
            ThreadRef::Direct(id) => listed.contains(&id),
            ThreadRef::Group(_) => true,
        });

        if let Some(id) = focus.direct() {
            let still_listed = self
                .conversations
                .iter_mut()
                .find(|c| c.conversation_id == id)
                .map(|conversation| conversation.unread_count = 0)
                .is_some();
            if !still_listed {
                focus.clear();
                self.leave();
                effects.push(Effect::Notify(ClientEvent::FocusChanged(None)));
            }
        }

        self.unread
            .recompute(self.conversations.iter().map(|c| &c.unread_count));
        effects.push(Effect::Notify(ClientEvent::ConversationsChanged));
        effects
    }

    /// Rebases counters on the server's authoritative counts. The focused
    /// conversation is being read, so it stays at zero.
    pub fn apply_unread_counts(&mut self, counts: &UnreadCounts, focus: &Focus) {
        let mut focused_prior = 0u32;
        if counts.conversations.is_empty() {
            if let Some(conversation) = focus
                .direct()
                .and_then(|id| self.conversations.iter_mut().find(|c| c.conversation_id == id))
            {
                focused_prior = std::mem::take(&mut conversation.unread_count);
            }
        } else {
            let per_thread: HashMap<ConversationId, u32> = counts
                .conversations
                .iter()
                .map(|entry| (entry.conversation_id, entry.count))
                .collect();
            for conversation in &mut self.conversations {
                let count = per_thread
                    .get(&conversation.conversation_id)
                    .copied()
                    .unwrap_or(0);
                if focus.is_focused(ThreadRef::Direct(conversation.conversation_id)) {
                    focused_prior += count;
                    conversation.unread_count = 0;
                } else {
                    conversation.unread_count = count;
                }
            }
        }
        self.unread
            .rebase(counts.direct_total.saturating_sub(focused_prior));
    }

    /// Inserts or refreshes one conversation (create/get result). A known
    /// conversation keeps its local unread counter.
    pub fn upsert(&mut self, mut summary: ConversationSummary) -> Vec<Effect> {
        match self.index_of(summary.conversation_id) {
            Some(index) => {
                summary.unread_count = self.conversations[index].unread_count;
                self.conversations[index] = summary;
            }
            None => {
                self.conversations.insert(0, summary);
                self.unread
                    .recompute(self.conversations.iter().map(|c| &c.unread_count));
            }
        }
        vec![Effect::Notify(ClientEvent::ConversationsChanged)]
    }

    /// Focus entered: the list restarts from the sends still pending here,
    /// and the counter is read down.
    pub fn enter(&mut self, id: ConversationId) -> u32 {
        self.messages = self.pending.records_for(ThreadRef::Direct(id));
        self.loaded = Some(id);
        match self
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == id)
        {
            Some(conversation) => self.unread.mark_read(&mut conversation.unread_count),
            None => 0,
        }
    }

    pub fn leave(&mut self) {
        self.messages.clear();
        self.loaded = None;
    }

    /// Installs a fetched history page, keeping anything that arrived or was
    /// sent while the fetch was in flight.
    pub fn finish_loading(&mut self, id: ConversationId, history: Vec<MessagePayload>) -> bool {
        if self.loaded != Some(id) {
            return false;
        }
        let mut merged = history;
        for temp_id in self.pending.settle(ThreadRef::Direct(id), &merged) {
            remove_id(&mut self.messages, &temp_id);
        }
        let arrived: Vec<_> = self
            .messages
            .drain(..)
            .filter(|m| !contains_id(&merged, &m.message_id))
            .collect();
        merged.extend(arrived);
        self.messages = merged;
        true
    }

    pub fn prepend_older(&mut self, id: ConversationId, page: Vec<MessagePayload>) -> usize {
        if self.loaded != Some(id) {
            return 0;
        }
        let mut older: Vec<_> = page
            .into_iter()
            .filter(|m| !contains_id(&self.messages, &m.message_id))
            .collect();
        let added = older.len();
        older.append(&mut self.messages);
        self.messages = older;
        added
    }

    /// Oldest server-assigned id in the loaded list, used as the paging cursor.
    pub fn oldest_server_id(&self) -> Option<&MessageId> {
        self.messages
            .iter()
            .map(|m| &m.message_id)
            .find(|id| !id.is_provisional())
    }

    pub fn on_message_received(&mut self, message: &MessagePayload, focus: &Focus) -> Dispatch {
        if !self.ledger.admit(&message.message_id) {
            debug!(message_id = %message.message_id, "sync: duplicate direct message discarded");
            return Dispatch::duplicate();
        }

        let id = message.conversation_id;
        let thread = ThreadRef::Direct(id);
        let from_me = !message.sender_is_customer && message.sender_id == self.me;

        if from_me {
            if let Some(temp_id) = &message.temp_id {
                if self.pending.resolve(temp_id).is_some() {
                    substitute_id(&mut self.messages, temp_id, &message.message_id);
                    return Dispatch::applied(vec![Effect::Notify(ClientEvent::MessagesChanged(
                        thread,
                    ))]);
                }
            }
        }

        let Some(index) = self.index_of(id) else {
            debug!(conversation_id = id.0, "sync: message for unknown conversation; refreshing list");
            return Dispatch::applied(vec![Effect::RefreshConversations]);
        };

        let mut effects = Vec::new();
        let mut conversation = self.conversations.remove(index);
        conversation.last_message = Some(preview_of(message));

        if focus.is_focused(thread) {
            if self.loaded == Some(id) && !contains_id(&self.messages, &message.message_id) {
                self.messages.push(message.clone());
                effects.push(Effect::Notify(ClientEvent::MessagesChanged(thread)));
            }
            if !from_me {
                self.unread.mark_read(&mut conversation.unread_count);
                effects.push(Effect::Emit(ClientRequest::MarkRead {
                    conversation_id: id,
                }));
            }
        } else if !from_me {
            self.unread.record_incoming(&mut conversation.unread_count);
        }

        self.conversations.insert(0, conversation);
        effects.push(Effect::Notify(ClientEvent::ConversationsChanged));
        Dispatch::applied(effects)
    }

    pub fn begin_send(
        &mut self,
        id: ConversationId,
        draft: &MessageDraft,
        focus: &Focus,
    ) -> Result<(MessageId, ClientRequest), SyncError> {
        let thread = ThreadRef::Direct(id);
        if !focus.is_focused(thread) {
            return Err(SyncError::NotFocused { thread });
        }
        let index = self.index_of(id).ok_or(SyncError::UnknownThread(thread))?;

        let now = Utc::now();
        let optimistic_preview = LastMessage {
            text: draft.text.clone(),
            sender_id: self.me,
            sent_at: now,
            system: None,
        };
        let mut conversation = self.conversations.remove(index);
        let recipient_id = conversation.other.user_id;
        let prior_preview = conversation.last_message.replace(optimistic_preview.clone());
        self.conversations.insert(0, conversation);

        let record = MessagePayload {
            message_id: MessageId::provisional(),
            conversation_id: id,
            sender_id: self.me,
            recipient_id: Some(recipient_id),
            sender_is_customer: false,
            content: draft.text.clone(),
            attachment: draft.attachment.clone(),
            status: MessageStatus::Sent,
            is_deleted: false,
            deleted_for_everyone: false,
            created_at: now,
            temp_id: None,
        };
        if self.loaded == Some(id) {
            self.messages.push(record.clone());
        }
        let temp_id = self.pending.begin(PendingSend {
            thread,
            prior_preview,
            optimistic_preview,
            record,
            acknowledged: false,
        });

        let request = ClientRequest::SendMessage {
            temp_id: temp_id.clone(),
            recipient_id,
            conversation_id: Some(id),
            content: draft.text.clone(),
            attachment: draft.attachment.clone(),
        };
        Ok((temp_id, request))
    }

    /// Provisional -> server id, at most once per send. Shared by the send
    /// acknowledgment and the out-of-band confirmation event.
    pub fn confirm_send(&mut self, temp_id: &MessageId, server_id: &MessageId) -> bool {
        if self.pending.resolve(temp_id).is_none() {
            return false;
        }
        let substitution = substitute_id(&mut self.messages, temp_id, server_id);
        self.ledger.remember(server_id.clone());
        debug!(temp_id = %temp_id, message_id = %server_id, ?substitution, "sync: direct send reconciled");
        true
    }

    /// Accepted without a server id; the record waits for the confirmation
    /// event or an echo carrying its `temp_id`.
    pub fn acknowledge_send(&mut self, temp_id: &MessageId) -> bool {
        self.pending.acknowledge(temp_id)
    }

    pub fn fail_send(&mut self, temp_id: &MessageId) -> Option<ThreadRef> {
        let pending = self.pending.fail(temp_id)?;
        remove_id(&mut self.messages, temp_id);
        if let ThreadRef::Direct(id) = pending.thread {
            if let Some(conversation) = self
                .conversations
                .iter_mut()
                .find(|c| c.conversation_id == id)
            {
                if conversation.last_message.as_ref() == Some(&pending.optimistic_preview) {
                    conversation.last_message = pending.prior_preview;
                }
            }
        }
        Some(pending.thread)
    }

    pub fn on_message_deleted(
        &mut self,
        id: ConversationId,
        message_id: &MessageId,
        for_everyone: bool,
    ) -> Dispatch {
        if self.loaded != Some(id) {
            return Dispatch::ignored();
        }
        let Some(index) = self.messages.iter().position(|m| &m.message_id == message_id) else {
            return Dispatch::ignored();
        };

        if for_everyone {
            let message = &mut self.messages[index];
            if message.deleted_for_everyone {
                return Dispatch::duplicate();
            }
            message.content = None;
            message.attachment = None;
            message.is_deleted = true;
            message.deleted_for_everyone = true;
        } else {
            self.messages.remove(index);
        }

        let latest = self.messages.last().map(preview_of);
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == id)
        {
            conversation.last_message = latest;
        }

        Dispatch::applied(vec![
            Effect::Notify(ClientEvent::MessagesChanged(ThreadRef::Direct(id))),
            Effect::Notify(ClientEvent::ConversationsChanged),
        ])
    }

    pub fn on_status_updated(
        &mut self,
        id: ConversationId,
        message_ids: &[MessageId],
        status: MessageStatus,
    ) -> Dispatch {
        if self.loaded != Some(id) {
            return Dispatch::ignored();
        }
        let mut changed = false;
        for message in &mut self.messages {
            if message.status < status && message_ids.contains(&message.message_id) {
                message.status = status;
                changed = true;
            }
        }
        if !changed {
            return Dispatch::ignored();
        }
        Dispatch::applied(vec![Effect::Notify(ClientEvent::MessagesChanged(
            ThreadRef::Direct(id),
        ))])
    }

    pub fn remove(&mut self, id: ConversationId, focus: &mut Focus) -> Vec<Effect> {
        let Some(index) = self.index_of(id) else {
            return Vec::new();
        };
        let removed = self.conversations.remove(index);
        self.unread.forget(removed.unread_count);
        self.pending
            .forget_acknowledged(|thread| thread != ThreadRef::Direct(id));

        let mut effects = Vec::new();
        if focus.clear_if(ThreadRef::Direct(id)) {
            self.leave();
            effects.push(Effect::Notify(ClientEvent::FocusChanged(None)));
        }
        effects.push(Effect::Notify(ClientEvent::ConversationsChanged));
        effects
    }

    pub fn mark_read(&mut self, id: ConversationId) -> Option<u32> {
        let conversation = self
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == id)?;
        Some(self.unread.mark_read(&mut conversation.unread_count))
    }

    pub fn set_user_online(&mut self, user_id: UserId, online: bool) -> bool {
        let mut changed = false;
        for conversation in &mut self.conversations {
            if matches!(conversation.kind, ConversationKind::Direct)
                && conversation.other.user_id == user_id
                && conversation.other.is_online != online
            {
                conversation.other.is_online = online;
                changed = true;
            }
        }
        changed
    }

    pub fn set_customer_online(&mut self, customer_id: CustomerId, online: bool) -> bool {
        let mut changed = false;
        for conversation in &mut self.conversations {
            if conversation.kind == (ConversationKind::Support { customer_id })
                && conversation.other.is_online != online
            {
                conversation.other.is_online = online;
                changed = true;
            }
        }
        changed
    }

    /// Re-derives every denormalized online flag from the tracker.
    pub fn sync_presence(&mut self, presence: &PresenceTracker) {
        for conversation in &mut self.conversations {
            conversation.other.is_online = match conversation.kind {
                ConversationKind::Direct => presence.is_user_online(conversation.other.user_id),
                ConversationKind::Support { customer_id } => {
                    presence.is_customer_online(customer_id)
                }
            };
        }
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.leave();
        self.ledger.clear();
        self.pending.clear();
        self.unread = UnreadTally::default();
    }
}

fn preview_of(message: &MessagePayload) -> LastMessage {
    LastMessage {
        text: message.content.clone(),
        sender_id: message.sender_id,
        sent_at: message.created_at,
        system: None,
    }
}

#[cfg(test)]
#[path = "tests/conversations_tests.rs"]
mod tests;
