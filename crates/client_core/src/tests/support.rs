use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{
        ConversationId, ConversationKind, CustomerId, GroupId, MessageId, MessageStatus, UserId,
    },
    protocol::{
        ClientRequest, ConversationSummary, EventKind, GroupMessagePayload, GroupSummary,
        MemberJoin, MemberSnapshot, MessagePayload, ParticipantSnapshot, SendAck, ServerEvent,
        SystemNotice,
    },
};
use tokio::sync::broadcast;

use crate::{
    error::SyncError,
    transport::{
        ack_into_result, ConnectionState, EventChannel, EventHandler, Subscription,
        SubscriptionRegistry,
    },
};

pub const ME: UserId = UserId(1);

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

pub fn participant(user_id: i64) -> ParticipantSnapshot {
    ParticipantSnapshot {
        user_id: UserId(user_id),
        first_name: format!("user{user_id}"),
        last_name: "test".into(),
        avatar_url: None,
        is_online: false,
    }
}

pub fn member(user_id: i64) -> MemberSnapshot {
    MemberSnapshot {
        user_id: UserId(user_id),
        first_name: format!("user{user_id}"),
        last_name: "test".into(),
        avatar_url: None,
    }
}

pub fn conversation(id: i64, other: i64) -> ConversationSummary {
    ConversationSummary {
        conversation_id: ConversationId(id),
        participant_ids: [ME, UserId(other)],
        other: participant(other),
        kind: ConversationKind::Direct,
        last_message: None,
        unread_count: 0,
        is_deleted: false,
    }
}

pub fn support_conversation(id: i64, other: i64, customer: i64) -> ConversationSummary {
    ConversationSummary {
        kind: ConversationKind::Support {
            customer_id: CustomerId(customer),
        },
        ..conversation(id, other)
    }
}

pub fn message(id: &str, conversation_id: i64, sender: i64, text: &str) -> MessagePayload {
    MessagePayload {
        message_id: MessageId::new(id),
        conversation_id: ConversationId(conversation_id),
        sender_id: UserId(sender),
        recipient_id: None,
        sender_is_customer: false,
        content: Some(text.into()),
        attachment: None,
        status: MessageStatus::Sent,
        is_deleted: false,
        deleted_for_everyone: false,
        created_at: at(100),
        temp_id: None,
    }
}

/// Group with the given members, every one of them joined at `at(joined)`.
pub fn group(id: i64, admin: i64, members: &[i64], joined: i64) -> GroupSummary {
    GroupSummary {
        group_id: GroupId(id),
        name: format!("group{id}"),
        avatar_url: None,
        admin_id: UserId(admin),
        participant_ids: members.iter().copied().map(UserId).collect(),
        members: members.iter().copied().map(member).collect(),
        joined: members
            .iter()
            .map(|user_id| MemberJoin {
                user_id: UserId(*user_id),
                joined_at: at(joined),
            })
            .collect(),
        last_message: None,
        unread_count: 0,
    }
}

pub fn group_message(
    id: &str,
    group_id: i64,
    sender: i64,
    text: &str,
    created: i64,
) -> GroupMessagePayload {
    GroupMessagePayload {
        message_id: MessageId::new(id),
        group_id: GroupId(group_id),
        sender_id: UserId(sender),
        content: Some(text.into()),
        attachment: None,
        mentions: Vec::new(),
        mentions_everyone: false,
        delivered_to: Vec::new(),
        read_by: Vec::new(),
        system: None,
        is_deleted: false,
        deleted_for_everyone: false,
        created_at: at(created),
        temp_id: None,
    }
}

pub fn system_message(
    id: &str,
    group_id: i64,
    notice: SystemNotice,
    created: i64,
) -> GroupMessagePayload {
    let base = group_message(id, group_id, notice.actor_id.0, "", created);
    GroupMessagePayload {
        content: None,
        system: Some(notice),
        ..base
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendBehavior {
    Ack,
    AckWithoutId,
    Reject(String),
    Timeout,
}

/// In-memory event channel: records outbound traffic and lets tests push
/// inbound events through the registered handlers.
pub struct FakeChannel {
    registry: SubscriptionRegistry,
    connected: AtomicBool,
    emitted: Mutex<Vec<ClientRequest>>,
    sent: Mutex<Vec<ClientRequest>>,
    behavior: Mutex<SendBehavior>,
    next_id: AtomicU64,
    connection_tx: broadcast::Sender<ConnectionState>,
}

impl FakeChannel {
    pub fn new(connected: bool) -> Arc<Self> {
        let (connection_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            registry: SubscriptionRegistry::default(),
            connected: AtomicBool::new(connected),
            emitted: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            behavior: Mutex::new(SendBehavior::Ack),
            next_id: AtomicU64::new(1),
            connection_tx,
        })
    }

    pub fn set_behavior(&self, behavior: SendBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn announce(&self, state: ConnectionState) {
        let _ = self.connection_tx.send(state);
    }

    /// Delivers an inbound event; returns how many handlers ran.
    pub fn push(&self, event: ServerEvent) -> usize {
        self.registry.dispatch(&event)
    }

    pub fn handler_count(&self) -> usize {
        self.registry.handler_count()
    }

    pub fn emitted(&self) -> Vec<ClientRequest> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn take_emitted(&self) -> Vec<ClientRequest> {
        std::mem::take(&mut *self.emitted.lock().unwrap())
    }

    pub fn sent(&self) -> Vec<ClientRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventChannel for FakeChannel {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.registry.subscribe(kind, handler)
    }

    async fn send(&self, request: ClientRequest) -> Result<SendAck, SyncError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::TransportUnavailable);
        }
        let name = request.name();
        self.sent.lock().unwrap().push(request);
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        let ack = match behavior {
            SendBehavior::Ack => SendAck {
                request_id,
                success: true,
                error: None,
                message_id: Some(MessageId::new(format!("srv-{request_id}"))),
            },
            SendBehavior::AckWithoutId => SendAck {
                request_id,
                success: true,
                error: None,
                message_id: None,
            },
            SendBehavior::Reject(reason) => SendAck {
                request_id,
                success: false,
                error: Some(reason),
                message_id: None,
            },
            SendBehavior::Timeout => {
                return Err(SyncError::SendTimeout {
                    request: name,
                    after: Duration::from_secs(10),
                })
            }
        };
        ack_into_result(name, ack)
    }

    fn emit(&self, request: ClientRequest) -> Result<(), SyncError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::TransportUnavailable);
        }
        self.emitted.lock().unwrap().push(request);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionState> {
        self.connection_tx.subscribe()
    }
}
