use shared::{
    domain::{ConversationId, GroupId, MessageId, ThreadRef, UserId},
    protocol::{
        ClientRequest, ConversationSummary, GroupMessageInfo, GroupMessagePayload, GroupSummary,
        MessagePayload, OnlineSnapshot, ServerEvent, UnreadCounts,
    },
};
use tracing::debug;

use crate::{
    config::ClientSettings,
    conversations::ConversationSync,
    error::SyncError,
    focus::{Focus, FocusTicket, Phase},
    groups::GroupSync,
    presence::PresenceTracker,
    types::{ClientEvent, Dispatch, Effect, HandleOutcome, MessageDraft},
    typing::TypingTracker,
};

/// All synchronization state of one logged-in session.
///
/// Every method is synchronous; the caller holds the engine lock for the
/// duration of one call and performs the returned effects afterwards.
#[derive(Debug)]
pub struct SyncEngine {
    me: UserId,
    focus: Focus,
    direct: ConversationSync,
    groups: GroupSync,
    presence: PresenceTracker,
    typing: TypingTracker,
}

impl SyncEngine {
    pub fn new(me: UserId, settings: &ClientSettings) -> Self {
        Self {
            me,
            focus: Focus::default(),
            direct: ConversationSync::new(me, settings),
            groups: GroupSync::new(me, settings),
            presence: PresenceTracker::default(),
            typing: TypingTracker::default(),
        }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn focus(&self) -> Option<ThreadRef> {
        self.focus.target()
    }

    pub fn phase_of(&self, thread: ThreadRef) -> Phase {
        self.focus.phase_of(thread)
    }

    pub fn direct(&self) -> &ConversationSync {
        &self.direct
    }

    pub fn groups(&self) -> &GroupSync {
        &self.groups
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    pub fn unread_totals(&self) -> (u32, u32) {
        (self.direct.unread_total(), self.groups.unread_total())
    }

    fn note_unread_change(&self, before: (u32, u32), effects: &mut Vec<Effect>) {
        let (direct, group) = self.unread_totals();
        if (direct, group) != before {
            effects.push(Effect::Notify(ClientEvent::UnreadChanged { direct, group }));
        }
    }

    /// Applies one inbound event. Focus is read here, at execution time, so
    /// an event for a thread the user just left is treated as unfocused.
    pub fn handle(&mut self, event: &ServerEvent) -> Dispatch {
        let before = self.unread_totals();
        let mut dispatch = self.route(event);
        if dispatch.outcome == HandleOutcome::Applied {
            self.note_unread_change(before, &mut dispatch.effects);
        }
        dispatch
    }

    fn route(&mut self, event: &ServerEvent) -> Dispatch {
        match event {
            ServerEvent::MessageReceived { message } => {
                self.direct.on_message_received(message, &self.focus)
            }
            ServerEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => self.apply_typing(ThreadRef::Direct(*conversation_id), *user_id, *is_typing),
            ServerEvent::UserOnline { user_id } => self.apply_user_presence(*user_id, true),
            ServerEvent::UserOffline { user_id } => self.apply_user_presence(*user_id, false),
            ServerEvent::OnlineList { snapshot } => {
                Dispatch::applied(self.apply_online_snapshot(snapshot))
            }
            ServerEvent::CustomerOnline { customer_id } => {
                let tracked = self.presence.set_customer_online(*customer_id, true);
                let mirrored = self.direct.set_customer_online(*customer_id, true);
                presence_dispatch(tracked || mirrored)
            }
            ServerEvent::CustomerOffline { customer_id } => {
                let tracked = self.presence.set_customer_online(*customer_id, false);
                let mirrored = self.direct.set_customer_online(*customer_id, false);
                presence_dispatch(tracked || mirrored)
            }
            ServerEvent::MessageDeleted {
                conversation_id,
                message_id,
                for_everyone,
            } => self
                .direct
                .on_message_deleted(*conversation_id, message_id, *for_everyone),
            ServerEvent::MessageStatusUpdated {
                conversation_id,
                message_ids,
                status,
            } => self
                .direct
                .on_status_updated(*conversation_id, message_ids, *status),
            ServerEvent::MessageConfirmed {
                thread,
                temp_id,
                message_id,
            } => {
                if self.confirm_send(*thread, temp_id, message_id) {
                    Dispatch::applied(vec![Effect::Notify(ClientEvent::MessagesChanged(*thread))])
                } else {
                    Dispatch::duplicate()
                }
            }
            ServerEvent::GroupMessageReceived { message }
            | ServerEvent::GroupSystemMessage { message } => {
                self.groups.on_message_received(message, &self.focus)
            }
            ServerEvent::GroupTyping {
                group_id,
                user_id,
                is_typing,
            } => self.apply_typing(ThreadRef::Group(*group_id), *user_id, *is_typing),
            ServerEvent::GroupMemberAdded {
                group_id,
                member,
                joined_at,
                group,
                ..
            } => self.groups.on_members_added(
                *group_id,
                std::slice::from_ref(member),
                *joined_at,
                group.as_ref(),
            ),
            ServerEvent::GroupMembersAdded {
                group_id,
                members,
                joined_at,
                group,
                ..
            } => self
                .groups
                .on_members_added(*group_id, members, *joined_at, group.as_ref()),
            ServerEvent::GroupMemberRemoved {
                group_id, user_id, ..
            } => self
                .groups
                .on_member_gone(*group_id, *user_id, None, &mut self.focus),
            ServerEvent::GroupMemberLeft {
                group_id,
                user_id,
                new_admin_id,
            } => self
                .groups
                .on_member_gone(*group_id, *user_id, *new_admin_id, &mut self.focus),
            ServerEvent::GroupUpdated {
                group_id,
                name,
                avatar_url,
                admin_id,
            } => self.groups.on_group_updated(
                *group_id,
                name.as_deref(),
                avatar_url.as_deref(),
                *admin_id,
            ),
            ServerEvent::GroupDeleted { group_id } => {
                let effects = self.groups.remove(*group_id, &mut self.focus);
                if effects.is_empty() {
                    Dispatch::ignored()
                } else {
                    self.typing.clear_thread(ThreadRef::Group(*group_id));
                    Dispatch::applied(effects)
                }
            }
            ServerEvent::GroupMessagesRead {
                group_id,
                user_id,
                message_ids,
                read_at,
            } => self
                .groups
                .on_messages_read(*group_id, *user_id, message_ids, *read_at),
            ServerEvent::GroupMessageDelivered {
                group_id,
                message_id,
                user_id,
                delivered_at,
            } => self
                .groups
                .on_message_delivered(*group_id, message_id, *user_id, *delivered_at),
            ServerEvent::GroupMessageDeleted {
                group_id,
                message_id,
                for_everyone,
            } => self
                .groups
                .on_message_deleted(*group_id, message_id, *for_everyone),
            ServerEvent::Error(err) => {
                Dispatch::applied(vec![Effect::Notify(ClientEvent::ServerError(err.clone()))])
            }
        }
    }

    fn apply_typing(&mut self, thread: ThreadRef, user_id: UserId, is_typing: bool) -> Dispatch {
        if user_id == self.me {
            return Dispatch::ignored();
        }
        if !self.typing.apply(thread, user_id, is_typing) {
            return Dispatch::duplicate();
        }
        Dispatch::applied(vec![Effect::Notify(ClientEvent::TypingChanged(thread))])
    }

    fn apply_user_presence(&mut self, user_id: UserId, online: bool) -> Dispatch {
        let tracked = self.presence.set_user_online(user_id, online);
        let mirrored = self.direct.set_user_online(user_id, online);
        presence_dispatch(tracked || mirrored)
    }

    /// Authoritative presence: replaces both online sets and every mirrored
    /// flag.
    pub fn apply_online_snapshot(&mut self, snapshot: &OnlineSnapshot) -> Vec<Effect> {
        self.presence.replace(snapshot);
        self.direct.sync_presence(&self.presence);
        vec![
            Effect::Notify(ClientEvent::PresenceChanged),
            Effect::Notify(ClientEvent::ConversationsChanged),
        ]
    }

    pub fn apply_conversations(&mut self, list: Vec<ConversationSummary>) -> Vec<Effect> {
        let before = self.unread_totals();
        let mut effects = self.direct.replace_all(list, &mut self.focus);
        self.direct.sync_presence(&self.presence);
        self.note_unread_change(before, &mut effects);
        effects
    }

    pub fn apply_groups(&mut self, list: Vec<GroupSummary>) -> Vec<Effect> {
        let before = self.unread_totals();
        let mut effects = self.groups.replace_all(list, &mut self.focus);
        self.note_unread_change(before, &mut effects);
        effects
    }

    pub fn apply_unread_counts(&mut self, counts: &UnreadCounts) -> Vec<Effect> {
        let before = self.unread_totals();
        self.direct.apply_unread_counts(counts, &self.focus);
        self.groups.apply_unread_counts(counts, &self.focus);
        let mut effects = Vec::new();
        self.note_unread_change(before, &mut effects);
        effects
    }

    pub fn upsert_conversation(&mut self, summary: ConversationSummary) -> Vec<Effect> {
        let before = self.unread_totals();
        let mut effects = self.direct.upsert(summary);
        self.direct.sync_presence(&self.presence);
        self.note_unread_change(before, &mut effects);
        effects
    }

    pub fn upsert_group(&mut self, summary: GroupSummary) -> Vec<Effect> {
        let before = self.unread_totals();
        let mut effects = self.groups.upsert(summary);
        self.note_unread_change(before, &mut effects);
        effects
    }

    pub fn remove_conversation(&mut self, id: ConversationId) -> Vec<Effect> {
        let before = self.unread_totals();
        let mut effects = self.direct.remove(id, &mut self.focus);
        self.typing.clear_thread(ThreadRef::Direct(id));
        self.note_unread_change(before, &mut effects);
        effects
    }

    pub fn remove_group(&mut self, id: GroupId) -> Vec<Effect> {
        let before = self.unread_totals();
        let mut effects = self.groups.remove(id, &mut self.focus);
        self.typing.clear_thread(ThreadRef::Group(id));
        self.note_unread_change(before, &mut effects);
        effects
    }

    /// Moves focus to `thread`, leaving whatever the other domain had
    /// loaded. The returned ticket must accompany the history fetch.
    pub fn select(&mut self, thread: ThreadRef) -> Result<(FocusTicket, Vec<Effect>), SyncError> {
        let known = match thread {
            ThreadRef::Direct(id) => self.direct.conversation(id).is_some(),
            ThreadRef::Group(id) => self.groups.group(id).is_some(),
        };
        if !known {
            return Err(SyncError::UnknownThread(thread));
        }

        let before = self.unread_totals();
        let ticket = self.focus.select(thread);
        let mut effects = Vec::new();
        match thread {
            ThreadRef::Direct(id) => {
                self.groups.leave();
                self.direct.enter(id);
                effects.push(Effect::Emit(ClientRequest::MarkRead {
                    conversation_id: id,
                }));
                effects.push(Effect::Notify(ClientEvent::ConversationsChanged));
            }
            ThreadRef::Group(id) => {
                self.direct.leave();
                self.groups.enter(id);
                effects.push(Effect::Emit(ClientRequest::GroupMarkRead { group_id: id }));
                effects.push(Effect::Notify(ClientEvent::GroupsChanged));
            }
        }
        effects.push(Effect::Notify(ClientEvent::FocusChanged(Some(thread))));
        self.note_unread_change(before, &mut effects);
        Ok((ticket, effects))
    }

    fn accept_ticket(&mut self, ticket: &FocusTicket) -> bool {
        if !self.focus.activate(ticket) {
            debug!(thread = ?ticket.thread, "sync: discarding history for a stale selection");
            return false;
        }
        self.typing.clear_thread(ticket.thread);
        true
    }

    pub fn finish_direct_load(
        &mut self,
        ticket: &FocusTicket,
        history: Vec<MessagePayload>,
    ) -> Dispatch {
        let ThreadRef::Direct(id) = ticket.thread else {
            return Dispatch::ignored();
        };
        if !self.accept_ticket(ticket) || !self.direct.finish_loading(id, history) {
            return Dispatch::ignored();
        }
        Dispatch::applied(vec![
            Effect::Notify(ClientEvent::MessagesChanged(ticket.thread)),
            Effect::Notify(ClientEvent::TypingChanged(ticket.thread)),
        ])
    }

    pub fn finish_group_load(
        &mut self,
        ticket: &FocusTicket,
        history: Vec<GroupMessagePayload>,
    ) -> Dispatch {
        let ThreadRef::Group(id) = ticket.thread else {
            return Dispatch::ignored();
        };
        if !self.accept_ticket(ticket) || !self.groups.finish_loading(id, history) {
            return Dispatch::ignored();
        }
        Dispatch::applied(vec![
            Effect::Notify(ClientEvent::MessagesChanged(ticket.thread)),
            Effect::Notify(ClientEvent::TypingChanged(ticket.thread)),
        ])
    }

    pub fn prepend_direct_older(&mut self, id: ConversationId, page: Vec<MessagePayload>) -> usize {
        self.direct.prepend_older(id, page)
    }

    pub fn prepend_group_older(&mut self, id: GroupId, page: Vec<GroupMessagePayload>) -> usize {
        self.groups.prepend_older(id, page)
    }

    /// Paging cursor for the loaded thread.
    pub fn oldest_loaded(&self, thread: ThreadRef) -> Option<MessageId> {
        match thread {
            ThreadRef::Direct(id) if self.direct.loaded() == Some(id) => {
                self.direct.oldest_server_id().cloned()
            }
            ThreadRef::Group(id) if self.groups.loaded() == Some(id) => {
                self.groups.oldest_server_id().cloned()
            }
            _ => None,
        }
    }

    pub fn clear_focus(&mut self) -> Vec<Effect> {
        if self.focus.target().is_none() {
            return Vec::new();
        }
        self.focus.clear();
        self.direct.leave();
        self.groups.leave();
        vec![Effect::Notify(ClientEvent::FocusChanged(None))]
    }

    pub fn begin_send(
        &mut self,
        thread: ThreadRef,
        draft: &MessageDraft,
    ) -> Result<(MessageId, ClientRequest), SyncError> {
        match thread {
            ThreadRef::Direct(id) => self.direct.begin_send(id, draft, &self.focus),
            ThreadRef::Group(id) => self.groups.begin_send(id, draft, &self.focus),
        }
    }

    pub fn confirm_send(
        &mut self,
        thread: ThreadRef,
        temp_id: &MessageId,
        server_id: &MessageId,
    ) -> bool {
        match thread {
            ThreadRef::Direct(_) => self.direct.confirm_send(temp_id, server_id),
            ThreadRef::Group(_) => self.groups.confirm_send(temp_id, server_id),
        }
    }

    /// Ack without a server id: the send succeeded, the id arrives later.
    pub fn acknowledge_send(&mut self, thread: ThreadRef, temp_id: &MessageId) -> bool {
        match thread {
            ThreadRef::Direct(_) => self.direct.acknowledge_send(temp_id),
            ThreadRef::Group(_) => self.groups.acknowledge_send(temp_id),
        }
    }

    pub fn fail_send(&mut self, thread: ThreadRef, temp_id: &MessageId) -> Option<ThreadRef> {
        match thread {
            ThreadRef::Direct(_) => self.direct.fail_send(temp_id),
            ThreadRef::Group(_) => self.groups.fail_send(temp_id),
        }
    }

    /// Explicit mark-as-read. Returns `None` for unknown threads.
    pub fn mark_read(&mut self, thread: ThreadRef) -> Option<Vec<Effect>> {
        let before = self.unread_totals();
        let request = match thread {
            ThreadRef::Direct(id) => {
                self.direct.mark_read(id)?;
                ClientRequest::MarkRead {
                    conversation_id: id,
                }
            }
            ThreadRef::Group(id) => {
                self.groups.mark_read(id)?;
                ClientRequest::GroupMarkRead { group_id: id }
            }
        };
        let mut effects = vec![Effect::Emit(request)];
        self.note_unread_change(before, &mut effects);
        Some(effects)
    }

    /// Local echo of a delete performed through REST.
    pub fn apply_message_delete(
        &mut self,
        thread: ThreadRef,
        message_id: &MessageId,
        for_everyone: bool,
    ) -> Dispatch {
        match thread {
            ThreadRef::Direct(id) => self.direct.on_message_deleted(id, message_id, for_everyone),
            ThreadRef::Group(id) => self.groups.on_message_deleted(id, message_id, for_everyone),
        }
    }

    pub fn apply_group_message_info(&mut self, id: GroupId, info: &GroupMessageInfo) -> Vec<Effect> {
        if self.groups.apply_message_info(id, info) {
            vec![Effect::Notify(ClientEvent::MessagesChanged(ThreadRef::Group(id)))]
        } else {
            Vec::new()
        }
    }

    /// Drops every remote typing set. Used on resync after reconnect.
    pub fn clear_typing(&mut self) -> Vec<Effect> {
        self.typing.clear();
        self.focus
            .target()
            .map(|thread| vec![Effect::Notify(ClientEvent::TypingChanged(thread))])
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.focus.clear();
        self.direct.clear();
        self.groups.clear();
        self.presence.clear();
        self.typing.clear();
    }
}

fn presence_dispatch(changed: bool) -> Dispatch {
    if changed {
        Dispatch::applied(vec![
            Effect::Notify(ClientEvent::PresenceChanged),
            Effect::Notify(ClientEvent::ConversationsChanged),
        ])
    } else {
        Dispatch::duplicate()
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
