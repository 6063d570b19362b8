use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{GroupId, MessageId, MessageStatus, ThreadRef, UserId},
    protocol::{
        ClientRequest, GroupMessageInfo, GroupMessagePayload, GroupSummary, LastMessage,
        MemberJoin, MemberSnapshot, Receipt, UnreadCounts,
    },
};
use tracing::debug;

use crate::{
    config::ClientSettings,
    dedup::DedupLedger,
    error::SyncError,
    focus::Focus,
    reconcile::{contains_id, remove_id, substitute_id, PendingSend, Reconciliation},
    types::{ClientEvent, Dispatch, Effect, MessageDraft},
    unread::UnreadTally,
};

/// Aggregate delivery state of a group message against the member count.
/// The sender never counts toward its own receipts.
pub fn aggregate_status(message: &GroupMessagePayload, member_count: usize) -> MessageStatus {
    let recipients = member_count.saturating_sub(1);
    if recipients == 0 {
        return MessageStatus::Sent;
    }
    let others = |receipts: &[Receipt]| {
        receipts
            .iter()
            .filter(|receipt| receipt.user_id != message.sender_id)
            .count()
    };
    if others(&message.read_by) >= recipients {
        MessageStatus::Read
    } else if others(&message.delivered_to) >= recipients {
        MessageStatus::Delivered
    } else {
        MessageStatus::Sent
    }
}

fn joined_at(group: &GroupSummary, user_id: UserId) -> Option<DateTime<Utc>> {
    group
        .joined
        .iter()
        .find(|join| join.user_id == user_id)
        .map(|join| join.joined_at)
}

fn add_receipt(receipts: &mut Vec<Receipt>, user_id: UserId, at: DateTime<Utc>) -> bool {
    if receipts.iter().any(|receipt| receipt.user_id == user_id) {
        return false;
    }
    receipts.push(Receipt { user_id, at });
    true
}

/// Moves `user_id`'s recorded join time forward. Returns whether it changed.
fn rejoin(group: &mut GroupSummary, user_id: UserId, joined_at: DateTime<Utc>) -> bool {
    match group.joined.iter_mut().find(|j| j.user_id == user_id) {
        Some(existing) if existing.joined_at >= joined_at => false,
        Some(existing) => {
            existing.joined_at = joined_at;
            true
        }
        None => {
            group.joined.push(MemberJoin {
                user_id,
                joined_at,
            });
            true
        }
    }
}

fn preview_of(message: &GroupMessagePayload) -> LastMessage {
    LastMessage {
        text: message.content.clone(),
        sender_id: message.sender_id,
        sent_at: message.created_at,
        system: message.system.clone(),
    }
}

#[derive(Debug)]
pub struct GroupSync {
    me: UserId,
    groups: Vec<GroupSummary>,
    messages: Vec<GroupMessagePayload>,
    loaded: Option<GroupId>,
    ledger: DedupLedger,
    pending: Reconciliation<GroupMessagePayload>,
    unread: UnreadTally,
}

impl GroupSync {
    pub fn new(me: UserId, settings: &ClientSettings) -> Self {
        Self {
            me,
            groups: Vec::new(),
            messages: Vec::new(),
            loaded: None,
            ledger: DedupLedger::new(settings.dedup_capacity, settings.dedup_evict_batch),
            pending: Reconciliation::default(),
            unread: UnreadTally::default(),
        }
    }

    pub fn groups(&self) -> &[GroupSummary] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupSummary> {
        self.groups.iter().find(|g| g.group_id == id)
    }

    pub fn messages(&self) -> &[GroupMessagePayload] {
        &self.messages
    }

    pub fn loaded(&self) -> Option<GroupId> {
        self.loaded
    }

    pub fn unread_total(&self) -> u32 {
        self.unread.total()
    }

    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    /// Status of a message in the loaded group, if listed.
    pub fn message_status(&self, message_id: &MessageId) -> Option<MessageStatus> {
        let group = self.group(self.loaded?)?;
        self.messages
            .iter()
            .find(|m| &m.message_id == message_id)
            .map(|m| aggregate_status(m, group.participant_ids.len()))
    }

    /// Display snapshot for a member, current or former.
    pub fn member(&self, id: GroupId, user_id: UserId) -> Option<&MemberSnapshot> {
        self.group(id)?
            .members
            .iter()
            .find(|member| member.user_id == user_id)
    }

    fn index_of(&self, id: GroupId) -> Option<usize> {
        self.groups.iter().position(|g| g.group_id == id)
    }

    fn find_mut(&mut self, id: GroupId) -> Option<&mut GroupSummary> {
        self.groups.iter_mut().find(|g| g.group_id == id)
    }

    /// Messages created before the current user joined stay hidden.
    fn visible_to_me(&self, id: GroupId, created_at: DateTime<Utc>) -> bool {
        match self.group(id).and_then(|group| joined_at(group, self.me)) {
            Some(joined) => created_at >= joined,
            None => true,
        }
    }

    fn recompute_unread(&mut self) {
        self.unread
            .recompute(self.groups.iter().map(|g| &g.unread_count));
    }

    pub fn replace_all(&mut self, list: Vec<GroupSummary>, focus: &mut Focus) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.groups = list;
        let listed: Vec<_> = self.groups.iter().map(|g| g.group_id).collect();
        self.pending.forget_acknowledged(|thread| match thread {
            ThreadRef::Group(id) => listed.contains(&id),
            ThreadRef::Direct(_) => true,
        });

        if let Some(id) = focus.group() {
            let still_listed = self
                .find_mut(id)
                .map(|group| group.unread_count = 0)
                .is_some();
            if still_listed {
                let visible: Vec<_> = self
                    .messages
                    .iter()
                    .filter(|m| self.visible_to_me(id, m.created_at))
                    .cloned()
                    .collect();
                self.messages = visible;
            } else {
                focus.clear();
                self.leave();
                effects.push(Effect::Notify(ClientEvent::FocusChanged(None)));
            }
        }

        self.recompute_unread();
        effects.push(Effect::Notify(ClientEvent::GroupsChanged));
        effects
    }

    pub fn apply_unread_counts(&mut self, counts: &UnreadCounts, focus: &Focus) {
        let mut focused_prior = 0u32;
        if counts.groups.is_empty() {
            if let Some(group) = focus
                .group()
                .and_then(|id| self.groups.iter_mut().find(|g| g.group_id == id))
            {
                focused_prior = std::mem::take(&mut group.unread_count);
            }
        } else {
            let per_thread: HashMap<GroupId, u32> = counts
                .groups
                .iter()
                .map(|entry| (entry.group_id, entry.count))
                .collect();
            for group in &mut self.groups {
                let count = per_thread.get(&group.group_id).copied().unwrap_or(0);
                if focus.is_focused(ThreadRef::Group(group.group_id)) {
                    focused_prior += count;
                    group.unread_count = 0;
                } else {
                    group.unread_count = count;
                }
            }
        }
        self.unread
            .rebase(counts.group_total.saturating_sub(focused_prior));
    }

    /// Applies a group record returned by a CRUD call. A known group keeps its
    /// local unread counter.
    pub fn upsert(&mut self, mut summary: GroupSummary) -> Vec<Effect> {
        match self.index_of(summary.group_id) {
            Some(index) => {
                summary.unread_count = self.groups[index].unread_count;
                self.groups[index] = summary;
            }
            None => {
                self.groups.insert(0, summary);
                self.recompute_unread();
            }
        }
        vec![Effect::Notify(ClientEvent::GroupsChanged)]
    }

    /// Removes a group locally (left, removed, deleted) and drops focus if it
    /// pointed there.
    pub fn remove(&mut self, id: GroupId, focus: &mut Focus) -> Vec<Effect> {
        let Some(index) = self.index_of(id) else {
            return Vec::new();
        };
        let removed = self.groups.remove(index);
        self.unread.forget(removed.unread_count);
        self.pending
            .forget_acknowledged(|thread| thread != ThreadRef::Group(id));

        let mut effects = Vec::new();
        if focus.clear_if(ThreadRef::Group(id)) {
            self.leave();
            effects.push(Effect::Notify(ClientEvent::FocusChanged(None)));
        }
        effects.push(Effect::Notify(ClientEvent::GroupsChanged));
        effects
    }

    pub fn enter(&mut self, id: GroupId) -> u32 {
        self.messages = self.pending.records_for(ThreadRef::Group(id));
        self.loaded = Some(id);
        match self.groups.iter_mut().find(|g| g.group_id == id) {
            Some(group) => self.unread.mark_read(&mut group.unread_count),
            None => 0,
        }
    }

    pub fn leave(&mut self) {
        self.messages.clear();
        self.loaded = None;
    }

    pub fn finish_loading(&mut self, id: GroupId, history: Vec<GroupMessagePayload>) -> bool {
        if self.loaded != Some(id) {
            return false;
        }
        let mut merged: Vec<_> = history
            .into_iter()
            .filter(|m| self.visible_to_me(id, m.created_at))
            .collect();
        for temp_id in self.pending.settle(ThreadRef::Group(id), &merged) {
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

    pub fn prepend_older(&mut self, id: GroupId, page: Vec<GroupMessagePayload>) -> usize {
        if self.loaded != Some(id) {
            return 0;
        }
        let mut older: Vec<_> = page
            .into_iter()
            .filter(|m| self.visible_to_me(id, m.created_at))
            .filter(|m| !contains_id(&self.messages, &m.message_id))
            .collect();
        let added = older.len();
        older.append(&mut self.messages);
        self.messages = older;
        added
    }

    pub fn oldest_server_id(&self) -> Option<&MessageId> {
        self.messages
            .iter()
            .map(|m| &m.message_id)
            .find(|id| !id.is_provisional())
    }

    /// Regular and system messages share one path; system messages never
    /// touch unread counters or read receipts.
    pub fn on_message_received(&mut self, message: &GroupMessagePayload, focus: &Focus) -> Dispatch {
        if !self.ledger.admit(&message.message_id) {
            debug!(message_id = %message.message_id, "sync: duplicate group message discarded");
            return Dispatch::duplicate();
        }

        let id = message.group_id;
        let thread = ThreadRef::Group(id);
        let from_me = message.sender_id == self.me;
        let is_system = message.system.is_some();

        if from_me && !is_system {
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
            debug!(group_id = id.0, "sync: message for unknown group; refreshing list");
            return Dispatch::applied(vec![Effect::RefreshGroups]);
        };
        if !self.visible_to_me(id, message.created_at) {
            debug!(group_id = id.0, message_id = %message.message_id, "sync: message predates membership");
            return Dispatch::ignored();
        }

        let mut effects = Vec::new();
        let mut group = self.groups.remove(index);
        group.last_message = Some(preview_of(message));
        let counts_as_unread = !from_me && !is_system;

        if focus.is_focused(thread) {
            if self.loaded == Some(id) && !contains_id(&self.messages, &message.message_id) {
                self.messages.push(message.clone());
                effects.push(Effect::Notify(ClientEvent::MessagesChanged(thread)));
            }
            if counts_as_unread {
                self.unread.mark_read(&mut group.unread_count);
                effects.push(Effect::Emit(ClientRequest::GroupMarkRead { group_id: id }));
            }
        } else if counts_as_unread {
            self.unread.record_incoming(&mut group.unread_count);
        }

        self.groups.insert(0, group);
        effects.push(Effect::Notify(ClientEvent::GroupsChanged));
        Dispatch::applied(effects)
    }

    pub fn on_members_added(
        &mut self,
        id: GroupId,
        members: &[MemberSnapshot],
        joined_at: DateTime<Utc>,
        group: Option<&GroupSummary>,
    ) -> Dispatch {
        if self.index_of(id).is_none() {
            if !members.iter().any(|member| member.user_id == self.me) {
                return Dispatch::ignored();
            }
            return match group {
                Some(summary) => Dispatch::applied(self.upsert(summary.clone())),
                None => Dispatch::applied(vec![Effect::RefreshGroups]),
            };
        }

        let me = self.me;
        let Some(group) = self.find_mut(id) else {
            return Dispatch::ignored();
        };
        let mut changed = false;
        for member in members {
            if group.participant_ids.contains(&member.user_id) {
                // A re-add of me after a missed removal moves my join time.
                if member.user_id == me {
                    changed |= rejoin(group, me, joined_at);
                }
                continue;
            }
            group.participant_ids.push(member.user_id);
            match group.members.iter_mut().find(|m| m.user_id == member.user_id) {
                Some(existing) => *existing = member.clone(),
                None => group.members.push(member.clone()),
            }
            match group.joined.iter_mut().find(|j| j.user_id == member.user_id) {
                Some(existing) => existing.joined_at = joined_at,
                None => group.joined.push(MemberJoin {
                    user_id: member.user_id,
                    joined_at,
                }),
            }
            changed = true;
        }

        if !changed {
            return Dispatch::duplicate();
        }
        let mut effects = vec![Effect::Notify(ClientEvent::GroupsChanged)];
        if self.loaded == Some(id) {
            let before = self.messages.len();
            let visible: Vec<_> = self
                .messages
                .iter()
                .filter(|m| self.visible_to_me(id, m.created_at))
                .cloned()
                .collect();
            self.messages = visible;
            if self.messages.len() != before {
                effects.push(Effect::Notify(ClientEvent::MessagesChanged(
                    ThreadRef::Group(id),
                )));
            }
        }
        Dispatch::applied(effects)
    }

    /// Removal or departure. The member snapshot is kept as fallback display
    /// data for their past messages.
    pub fn on_member_gone(
        &mut self,
        id: GroupId,
        user_id: UserId,
        new_admin_id: Option<UserId>,
        focus: &mut Focus,
    ) -> Dispatch {
        if user_id == self.me {
            let effects = self.remove(id, focus);
            if effects.is_empty() {
                return Dispatch::ignored();
            }
            return Dispatch::applied(effects);
        }

        let Some(group) = self.find_mut(id) else {
            return Dispatch::ignored();
        };
        let before = group.participant_ids.len();
        group.participant_ids.retain(|participant| *participant != user_id);
        let mut changed = group.participant_ids.len() != before;
        if let Some(admin_id) = new_admin_id {
            if group.admin_id != admin_id {
                group.admin_id = admin_id;
                changed = true;
            }
        }

        if !changed {
            return Dispatch::duplicate();
        }
        Dispatch::applied(vec![Effect::Notify(ClientEvent::GroupsChanged)])
    }

    pub fn on_group_updated(
        &mut self,
        id: GroupId,
        name: Option<&str>,
        avatar_url: Option<&str>,
        admin_id: Option<UserId>,
    ) -> Dispatch {
        let Some(group) = self.find_mut(id) else {
            return Dispatch::ignored();
        };
        if let Some(name) = name {
            group.name = name.to_string();
        }
        if let Some(avatar_url) = avatar_url {
            group.avatar_url = Some(avatar_url.to_string());
        }
        if let Some(admin_id) = admin_id {
            group.admin_id = admin_id;
        }
        Dispatch::applied(vec![Effect::Notify(ClientEvent::GroupsChanged)])
    }

    pub fn on_messages_read(
        &mut self,
        id: GroupId,
        user_id: UserId,
        message_ids: &[MessageId],
        read_at: DateTime<Utc>,
    ) -> Dispatch {
        if self.loaded != Some(id) {
            return Dispatch::ignored();
        }
        let mut changed = false;
        for message in &mut self.messages {
            if !message_ids.contains(&message.message_id) {
                continue;
            }
            changed |= add_receipt(&mut message.delivered_to, user_id, read_at);
            changed |= add_receipt(&mut message.read_by, user_id, read_at);
        }
        if !changed {
            return Dispatch::duplicate();
        }
        Dispatch::applied(vec![Effect::Notify(ClientEvent::MessagesChanged(
            ThreadRef::Group(id),
        ))])
    }

    pub fn on_message_delivered(
        &mut self,
        id: GroupId,
        message_id: &MessageId,
        user_id: UserId,
        delivered_at: DateTime<Utc>,
    ) -> Dispatch {
        if self.loaded != Some(id) {
            return Dispatch::ignored();
        }
        let Some(message) = self.messages.iter_mut().find(|m| &m.message_id == message_id) else {
            return Dispatch::ignored();
        };
        if !add_receipt(&mut message.delivered_to, user_id, delivered_at) {
            return Dispatch::duplicate();
        }
        Dispatch::applied(vec![Effect::Notify(ClientEvent::MessagesChanged(
            ThreadRef::Group(id),
        ))])
    }

    /// Merges receipts fetched on demand for one message.
    pub fn apply_message_info(&mut self, id: GroupId, info: &GroupMessageInfo) -> bool {
        if self.loaded != Some(id) {
            return false;
        }
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.message_id == info.message_id)
        else {
            return false;
        };
        let mut changed = false;
        for receipt in &info.delivered_to {
            changed |= add_receipt(&mut message.delivered_to, receipt.user_id, receipt.at);
        }
        for receipt in &info.read_by {
            changed |= add_receipt(&mut message.read_by, receipt.user_id, receipt.at);
        }
        changed
    }

    pub fn on_message_deleted(
        &mut self,
        id: GroupId,
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
            message.mentions.clear();
            message.mentions_everyone = false;
            message.is_deleted = true;
            message.deleted_for_everyone = true;
        } else {
            self.messages.remove(index);
        }

        let latest = self.messages.last().map(preview_of);
        if let Some(group) = self.find_mut(id) {
            group.last_message = latest;
        }

        Dispatch::applied(vec![
            Effect::Notify(ClientEvent::MessagesChanged(ThreadRef::Group(id))),
            Effect::Notify(ClientEvent::GroupsChanged),
        ])
    }

    pub fn begin_send(
        &mut self,
        id: GroupId,
        draft: &MessageDraft,
        focus: &Focus,
    ) -> Result<(MessageId, ClientRequest), SyncError> {
        let thread = ThreadRef::Group(id);
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
        let mut group = self.groups.remove(index);
        let prior_preview = group.last_message.replace(optimistic_preview.clone());
        self.groups.insert(0, group);

        let record = GroupMessagePayload {
            message_id: MessageId::provisional(),
            group_id: id,
            sender_id: self.me,
            content: draft.text.clone(),
            attachment: draft.attachment.clone(),
            mentions: draft.mentions.clone(),
            mentions_everyone: draft.mentions_everyone,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            system: None,
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

        let request = ClientRequest::GroupSendMessage {
            temp_id: temp_id.clone(),
            group_id: id,
            content: draft.text.clone(),
            attachment: draft.attachment.clone(),
            mentions: draft.mentions.clone(),
            mentions_everyone: draft.mentions_everyone,
        };
        Ok((temp_id, request))
    }

    pub fn confirm_send(&mut self, temp_id: &MessageId, server_id: &MessageId) -> bool {
        if self.pending.resolve(temp_id).is_none() {
            return false;
        }
        let substitution = substitute_id(&mut self.messages, temp_id, server_id);
        self.ledger.remember(server_id.clone());
        debug!(temp_id = %temp_id, message_id = %server_id, ?substitution, "sync: group send reconciled");
        true
    }

    pub fn acknowledge_send(&mut self, temp_id: &MessageId) -> bool {
        self.pending.acknowledge(temp_id)
    }

    pub fn fail_send(&mut self, temp_id: &MessageId) -> Option<ThreadRef> {
        let pending = self.pending.fail(temp_id)?;
        remove_id(&mut self.messages, temp_id);
        if let ThreadRef::Group(id) = pending.thread {
            if let Some(group) = self.find_mut(id) {
                if group.last_message.as_ref() == Some(&pending.optimistic_preview) {
                    group.last_message = pending.prior_preview;
                }
            }
        }
        Some(pending.thread)
    }

    pub fn mark_read(&mut self, id: GroupId) -> Option<u32> {
        let group = self.groups.iter_mut().find(|g| g.group_id == id)?;
        Some(self.unread.mark_read(&mut group.unread_count))
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.leave();
        self.ledger.clear();
        self.pending.clear();
        self.unread = UnreadTally::default();
    }
}

#[cfg(test)]
#[path = "tests/groups_tests.rs"]
mod tests;
