use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use shared::{
    domain::{ConversationId, GroupId, MessageId, ThreadRef, UserId},
    protocol::{
        ChatableUser, ConversationSummary, CreateGroupRequest, EventKind, GroupMessageInfo,
        GroupSummary, ServerEvent, UpdateGroupRequest,
    },
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    api::{AttachmentUpload, ChatApi},
    config::ClientSettings,
    engine::SyncEngine,
    error::SyncError,
    lock_unpoisoned,
    transport::{ConnectionState, EventChannel, EventHandler, Subscription},
    types::{ClientEvent, Effect, HandleOutcome, MessageDraft},
    typing::{TypingEmitter, TypingTarget},
};

#[derive(Debug, Clone, Copy)]
enum Refresh {
    Conversations,
    Groups,
}

/// One logged-in user's synchronization session.
///
/// Owns the engine, every handler subscription and the background tasks;
/// `logout` releases all of them.
pub struct ChatSession {
    me: UserId,
    settings: ClientSettings,
    engine: Mutex<SyncEngine>,
    channel: Arc<dyn EventChannel>,
    api: Arc<dyn ChatApi>,
    typing: Arc<TypingEmitter>,
    events: broadcast::Sender<ClientEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ChatSession {
    pub async fn start(
        me: UserId,
        settings: ClientSettings,
        channel: Arc<dyn EventChannel>,
        api: Arc<dyn ChatApi>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let typing = TypingEmitter::new(Arc::clone(&channel), settings.typing_idle);
        let session = Arc::new(Self {
            me,
            engine: Mutex::new(SyncEngine::new(me, &settings)),
            settings,
            channel,
            api,
            typing,
            events,
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let connection_events = session.channel.connection_events();
        session.register_handlers();
        if !session.wait_for_transport().await {
            warn!(
                user_id = me.0,
                waited_ms = session.settings.connect_wait.as_millis() as u64,
                "sync: event channel not connected; continuing degraded"
            );
        }
        session.resync().await;
        session.spawn_connection_watcher(connection_events);
        info!(user_id = me.0, "sync: session started");
        session
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Read access to the engine. Keep `f` short; it runs under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&SyncEngine) -> R) -> R {
        f(&lock_unpoisoned(&self.engine))
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    async fn wait_for_transport(&self) -> bool {
        let deadline = Instant::now() + self.settings.connect_wait;
        while !self.channel.is_connected() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.settings.connect_poll).await;
        }
        true
    }

    fn register_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handler: EventHandler = Arc::new(move |event: &ServerEvent| {
            if let Some(session) = weak.upgrade() {
                session.on_event(event);
            }
        });
        let subscriptions: Vec<Subscription> = EventKind::ALL
            .iter()
            .map(|kind| self.channel.subscribe(*kind, Arc::clone(&handler)))
            .collect();
        lock_unpoisoned(&self.subscriptions).extend(subscriptions);
    }

    fn on_event(self: &Arc<Self>, event: &ServerEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let ServerEvent::Error(err) = event {
            if err.requires_reauth() {
                warn!("sync: server requires re-authentication: {err}");
            }
        }
        let dispatch = lock_unpoisoned(&self.engine).handle(event);
        if dispatch.outcome == HandleOutcome::Duplicate {
            debug!(kind = ?event.kind(), "sync: duplicate event discarded");
        }
        self.perform(dispatch.effects);
    }

    fn perform(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(request) => {
                    let name = request.name();
                    if let Err(err) = self.channel.emit(request) {
                        debug!(request = name, "sync: outbound event dropped: {err}");
                    }
                }
                Effect::Notify(event) => {
                    let _ = self.events.send(event);
                }
                Effect::RefreshConversations => self.spawn_refresh(Refresh::Conversations),
                Effect::RefreshGroups => self.spawn_refresh(Refresh::Groups),
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock_unpoisoned(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn spawn_refresh(self: &Arc<Self>, refresh: Refresh) {
        let session = Arc::clone(self);
        self.track(tokio::spawn(async move {
            session.refresh(refresh).await;
        }));
    }

    async fn refresh(self: &Arc<Self>, refresh: Refresh) {
        let effects = match refresh {
            Refresh::Conversations => match self.api.fetch_conversations().await {
                Ok(list) => lock_unpoisoned(&self.engine).apply_conversations(list),
                Err(err) => {
                    warn!("sync: conversation refresh failed; keeping prior list: {err:#}");
                    return;
                }
            },
            Refresh::Groups => match self.api.fetch_groups().await {
                Ok(list) => lock_unpoisoned(&self.engine).apply_groups(list),
                Err(err) => {
                    warn!("sync: group refresh failed; keeping prior list: {err:#}");
                    return;
                }
            },
        };
        self.perform(effects);
    }

    fn spawn_connection_watcher(
        self: &Arc<Self>,
        mut connection_events: broadcast::Receiver<ConnectionState>,
    ) {
        let weak = Arc::downgrade(self);
        self.track(tokio::spawn(async move {
            loop {
                let state = match connection_events.recv().await {
                    Ok(state) => state,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync: missed connection events; resyncing");
                        ConnectionState::Reconnected
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(session) = weak.upgrade() else {
                    break;
                };
                let _ = session.events.send(ClientEvent::Connection(state));
                if state == ConnectionState::Reconnected {
                    info!(user_id = session.me.0, "sync: reconnected; running full resync");
                    session.resync().await;
                }
            }
        }));
    }

    /// Full resync: lists, authoritative unread counts and the online list.
    /// A failed fetch keeps whatever was there before.
    pub async fn resync(self: &Arc<Self>) {
        if self.ensure_open().is_err() {
            return;
        }
        let (conversations, groups, unread, online) = tokio::join!(
            self.api.fetch_conversations(),
            self.api.fetch_groups(),
            self.api.fetch_unread_counts(),
            self.api.fetch_online_snapshot(),
        );

        let (effects, focused) = {
            let mut engine = lock_unpoisoned(&self.engine);
            let mut effects = Vec::new();
            match conversations {
                Ok(list) => effects.extend(engine.apply_conversations(list)),
                Err(err) => warn!("sync: failed to fetch conversations; keeping prior list: {err:#}"),
            }
            match groups {
                Ok(list) => effects.extend(engine.apply_groups(list)),
                Err(err) => warn!("sync: failed to fetch groups; keeping prior list: {err:#}"),
            }
            match unread {
                Ok(counts) => effects.extend(engine.apply_unread_counts(&counts)),
                Err(err) => warn!("sync: failed to fetch unread counts; keeping prior counts: {err:#}"),
            }
            match online {
                Ok(snapshot) => effects.extend(engine.apply_online_snapshot(&snapshot)),
                Err(err) => warn!("sync: failed to fetch online list; keeping prior presence: {err:#}"),
            }
            effects.extend(engine.clear_typing());
            (effects, engine.focus())
        };
        self.perform(effects);

        if let Some(thread) = focused {
            if let Err(err) = self.select(thread).await {
                warn!(thread = ?thread, "sync: failed to reload focused thread: {err}");
            }
        }
    }

    pub async fn select_conversation(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> Result<(), SyncError> {
        self.select(ThreadRef::Direct(conversation_id)).await
    }

    pub async fn select_group(self: &Arc<Self>, group_id: GroupId) -> Result<(), SyncError> {
        self.select(ThreadRef::Group(group_id)).await
    }

    /// Focuses `thread` and loads its latest history page. A load that
    /// completes after focus moved elsewhere is discarded.
    pub async fn select(self: &Arc<Self>, thread: ThreadRef) -> Result<(), SyncError> {
        self.ensure_open()?;
        let (ticket, effects) = lock_unpoisoned(&self.engine).select(thread)?;
        self.perform(effects);

        let limit = self.settings.history_page_size;
        let dispatch = match thread {
            ThreadRef::Direct(id) => {
                let history = self.api.fetch_messages(id, None, limit).await?;
                lock_unpoisoned(&self.engine).finish_direct_load(&ticket, history)
            }
            ThreadRef::Group(id) => {
                let history = self.api.fetch_group_messages(id, None, limit).await?;
                lock_unpoisoned(&self.engine).finish_group_load(&ticket, history)
            }
        };
        self.perform(dispatch.effects);
        Ok(())
    }

    pub fn clear_focus(self: &Arc<Self>) {
        let effects = lock_unpoisoned(&self.engine).clear_focus();
        self.perform(effects);
    }

    /// Fetches the page before the oldest loaded message. Returns how many
    /// messages were added.
    pub async fn load_older(self: &Arc<Self>, thread: ThreadRef) -> Result<usize, SyncError> {
        self.ensure_open()?;
        let cursor = {
            let engine = lock_unpoisoned(&self.engine);
            if engine.focus() != Some(thread) {
                return Err(SyncError::NotFocused { thread });
            }
            engine.oldest_loaded(thread)
        };
        let Some(before) = cursor else {
            return Ok(0);
        };

        let limit = self.settings.history_page_size;
        let added = match thread {
            ThreadRef::Direct(id) => {
                let page = self.api.fetch_messages(id, Some(before), limit).await?;
                lock_unpoisoned(&self.engine).prepend_direct_older(id, page)
            }
            ThreadRef::Group(id) => {
                let page = self.api.fetch_group_messages(id, Some(before), limit).await?;
                lock_unpoisoned(&self.engine).prepend_group_older(id, page)
            }
        };
        if added > 0 {
            let _ = self.events.send(ClientEvent::MessagesChanged(thread));
        }
        Ok(added)
    }

    /// Optimistic send. The record shows up immediately under a provisional
    /// id; it is rewritten on acknowledgment or removed on failure. An
    /// attachment is uploaded first, and an upload failure leaves no trace.
    pub async fn send_message(
        self: &Arc<Self>,
        thread: ThreadRef,
        mut draft: MessageDraft,
        upload: Option<AttachmentUpload>,
    ) -> Result<MessageId, SyncError> {
        self.ensure_open()?;
        if self.read(|engine| engine.focus()) != Some(thread) {
            return Err(SyncError::NotFocused { thread });
        }
        if let Some(upload) = upload {
            draft.attachment = Some(self.api.upload_attachment(upload).await?);
        }
        if draft.is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let (temp_id, request) = lock_unpoisoned(&self.engine).begin_send(thread, &draft)?;
        self.perform(vec![
            Effect::Notify(ClientEvent::MessagesChanged(thread)),
            Effect::Notify(list_changed(thread)),
        ]);
        self.typing.stop(thread);

        match self.channel.send(request).await {
            Ok(ack) => {
                let Some(server_id) = ack.message_id else {
                    debug!(temp_id = %temp_id, "sync: ack without id; awaiting confirmation event");
                    lock_unpoisoned(&self.engine).acknowledge_send(thread, &temp_id);
                    return Ok(temp_id);
                };
                if lock_unpoisoned(&self.engine).confirm_send(thread, &temp_id, &server_id) {
                    let _ = self.events.send(ClientEvent::MessagesChanged(thread));
                }
                Ok(server_id)
            }
            Err(err) => {
                warn!(thread = ?thread, temp_id = %temp_id, "sync: send failed; rolling back: {err}");
                let rolled_back = lock_unpoisoned(&self.engine).fail_send(thread, &temp_id);
                if rolled_back.is_some() {
                    self.perform(vec![
                        Effect::Notify(ClientEvent::MessagesChanged(thread)),
                        Effect::Notify(list_changed(thread)),
                        Effect::Notify(ClientEvent::SendFailed {
                            thread,
                            temp_id,
                            reason: err.to_string(),
                        }),
                    ]);
                }
                Err(err)
            }
        }
    }

    /// Local keystroke in the composer of `thread`.
    pub fn note_typing(&self, thread: ThreadRef) -> Result<(), SyncError> {
        self.ensure_open()?;
        let target = {
            let engine = lock_unpoisoned(&self.engine);
            match thread {
                ThreadRef::Direct(id) => {
                    let conversation = engine
                        .direct()
                        .conversation(id)
                        .ok_or(SyncError::UnknownThread(thread))?;
                    TypingTarget::Direct {
                        conversation_id: id,
                        recipient_id: conversation.other.user_id,
                    }
                }
                ThreadRef::Group(id) => {
                    engine
                        .groups()
                        .group(id)
                        .ok_or(SyncError::UnknownThread(thread))?;
                    TypingTarget::Group(id)
                }
            }
        };
        self.typing.note_input(target);
        Ok(())
    }

    pub fn mark_read(self: &Arc<Self>, thread: ThreadRef) -> Result<(), SyncError> {
        self.ensure_open()?;
        let effects = lock_unpoisoned(&self.engine)
            .mark_read(thread)
            .ok_or(SyncError::UnknownThread(thread))?;
        self.perform(effects);
        Ok(())
    }

    pub async fn chatable_users(&self) -> Result<Vec<ChatableUser>, SyncError> {
        Ok(self.api.fetch_chatable_users().await?)
    }

    /// Creates or fetches the conversation with `other_user_id` and lists it.
    pub async fn open_conversation(
        self: &Arc<Self>,
        other_user_id: UserId,
    ) -> Result<ConversationSummary, SyncError> {
        self.ensure_open()?;
        let summary = self.api.open_conversation(other_user_id).await?;
        let effects = lock_unpoisoned(&self.engine).upsert_conversation(summary.clone());
        self.perform(effects);
        Ok(summary)
    }

    pub async fn delete_conversation(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.api.delete_conversation(conversation_id).await?;
        let effects = lock_unpoisoned(&self.engine).remove_conversation(conversation_id);
        self.perform(effects);
        Ok(())
    }

    pub async fn delete_message(
        self: &Arc<Self>,
        thread: ThreadRef,
        message_id: &MessageId,
        for_everyone: bool,
    ) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.api
            .delete_message(thread, message_id, for_everyone)
            .await?;
        let dispatch =
            lock_unpoisoned(&self.engine).apply_message_delete(thread, message_id, for_everyone);
        self.perform(dispatch.effects);
        Ok(())
    }

    fn apply_group(self: &Arc<Self>, group: GroupSummary) -> GroupSummary {
        let effects = lock_unpoisoned(&self.engine).upsert_group(group.clone());
        self.perform(effects);
        group
    }

    pub async fn create_group(
        self: &Arc<Self>,
        name: impl Into<String>,
        member_ids: Vec<UserId>,
    ) -> Result<GroupSummary, SyncError> {
        self.ensure_open()?;
        let group = self
            .api
            .create_group(CreateGroupRequest {
                name: name.into(),
                member_ids,
            })
            .await?;
        Ok(self.apply_group(group))
    }

    pub async fn update_group(
        self: &Arc<Self>,
        group_id: GroupId,
        request: UpdateGroupRequest,
    ) -> Result<GroupSummary, SyncError> {
        self.ensure_open()?;
        let group = self.api.update_group(group_id, request).await?;
        Ok(self.apply_group(group))
    }

    pub async fn set_group_avatar(
        self: &Arc<Self>,
        group_id: GroupId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<GroupSummary, SyncError> {
        self.ensure_open()?;
        let group = self.api.set_group_avatar(group_id, filename, bytes).await?;
        Ok(self.apply_group(group))
    }

    pub async fn add_group_members(
        self: &Arc<Self>,
        group_id: GroupId,
        member_ids: Vec<UserId>,
    ) -> Result<GroupSummary, SyncError> {
        self.ensure_open()?;
        let group = self.api.add_group_members(group_id, member_ids).await?;
        Ok(self.apply_group(group))
    }

    pub async fn remove_group_member(
        self: &Arc<Self>,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<GroupSummary, SyncError> {
        self.ensure_open()?;
        let group = self.api.remove_group_member(group_id, user_id).await?;
        Ok(self.apply_group(group))
    }

    pub async fn leave_group(self: &Arc<Self>, group_id: GroupId) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.api.leave_group(group_id).await?;
        let effects = lock_unpoisoned(&self.engine).remove_group(group_id);
        self.perform(effects);
        Ok(())
    }

    pub async fn delete_group(self: &Arc<Self>, group_id: GroupId) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.api.delete_group(group_id).await?;
        let effects = lock_unpoisoned(&self.engine).remove_group(group_id);
        self.perform(effects);
        Ok(())
    }

    /// Per-member delivery/read receipts for one group message.
    pub async fn group_message_info(
        self: &Arc<Self>,
        group_id: GroupId,
        message_id: &MessageId,
    ) -> Result<GroupMessageInfo, SyncError> {
        self.ensure_open()?;
        let info = self
            .api
            .fetch_group_message_info(group_id, message_id)
            .await?;
        let effects = lock_unpoisoned(&self.engine).apply_group_message_info(group_id, &info);
        self.perform(effects);
        Ok(info)
    }

    /// Unsubscribes every handler, stops background work and discards all
    /// in-memory state. In-flight sends finish against a cleared engine.
    pub fn logout(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock_unpoisoned(&self.subscriptions).clear();
        for task in lock_unpoisoned(&self.tasks).drain(..) {
            task.abort();
        }
        self.typing.cancel_all();
        lock_unpoisoned(&self.engine).clear();
        let _ = self.events.send(ClientEvent::FocusChanged(None));
        info!(user_id = self.me.0, "sync: session closed");
    }
}

fn list_changed(thread: ThreadRef) -> ClientEvent {
    match thread {
        ThreadRef::Direct(_) => ClientEvent::ConversationsChanged,
        ThreadRef::Group(_) => ClientEvent::GroupsChanged,
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
