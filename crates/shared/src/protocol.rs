use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        AttachmentKind, ConversationId, ConversationKind, CustomerId, GroupId, MessageId,
        MessageStatus, SystemNoticeKind, ThreadRef, UserId,
    },
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub user_id: UserId,
    pub display_name: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub user_id: UserId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub kind: SystemNoticeKind,
    pub actor_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberJoin {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub sender_id: UserId,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemNotice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub participant_ids: [UserId; 2],
    pub other: ParticipantSnapshot,
    #[serde(default)]
    pub kind: ConversationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_id: GroupId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub admin_id: UserId,
    pub participant_ids: Vec<UserId>,
    #[serde(default)]
    pub members: Vec<MemberSnapshot>,
    #[serde(default)]
    pub joined: Vec<MemberJoin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    #[serde(default)]
    pub sender_is_customer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_for_everyone: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessagePayload {
    pub message_id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<Mention>,
    #[serde(default)]
    pub mentions_everyone: bool,
    #[serde(default)]
    pub delivered_to: Vec<Receipt>,
    #[serde(default)]
    pub read_by: Vec<Receipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemNotice>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_for_everyone: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationUnread {
    pub conversation_id: ConversationId,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUnread {
    pub group_id: GroupId,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    pub direct_total: u32,
    pub group_total: u32,
    #[serde(default)]
    pub conversations: Vec<ConversationUnread>,
    #[serde(default)]
    pub groups: Vec<GroupUnread>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineSnapshot {
    #[serde(default)]
    pub user_ids: Vec<UserId>,
    /// Absent when the snapshot only covers direct contacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ids: Option<Vec<CustomerId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatableUser {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessageInfo {
    pub message_id: MessageId,
    pub member_count: usize,
    #[serde(default)]
    pub delivered_to: Vec<Receipt>,
    #[serde(default)]
    pub read_by: Vec<Receipt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    pub request_id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    SendMessage {
        temp_id: MessageId,
        recipient_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
    },
    TypingIndicator {
        conversation_id: ConversationId,
        recipient_id: UserId,
        is_typing: bool,
    },
    MarkRead {
        conversation_id: ConversationId,
    },
    GroupSendMessage {
        temp_id: MessageId,
        group_id: GroupId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mentions: Vec<Mention>,
        #[serde(default)]
        mentions_everyone: bool,
    },
    GroupTypingIndicator {
        group_id: GroupId,
        is_typing: bool,
    },
    GroupMarkRead {
        group_id: GroupId,
    },
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::SendMessage { .. } => "send_message",
            ClientRequest::TypingIndicator { .. } => "typing_indicator",
            ClientRequest::MarkRead { .. } => "mark_read",
            ClientRequest::GroupSendMessage { .. } => "group_send_message",
            ClientRequest::GroupTypingIndicator { .. } => "group_typing_indicator",
            ClientRequest::GroupMarkRead { .. } => "group_mark_read",
        }
    }
}

/// Outbound wire frame. `request_id` is set when the sender waits for an ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub request: ClientRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageReceived {
        message: MessagePayload,
    },
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    UserOnline {
        user_id: UserId,
    },
    UserOffline {
        user_id: UserId,
    },
    OnlineList {
        snapshot: OnlineSnapshot,
    },
    CustomerOnline {
        customer_id: CustomerId,
    },
    CustomerOffline {
        customer_id: CustomerId,
    },
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        #[serde(default)]
        for_everyone: bool,
    },
    MessageStatusUpdated {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
        status: MessageStatus,
    },
    MessageConfirmed {
        thread: ThreadRef,
        temp_id: MessageId,
        message_id: MessageId,
    },
    GroupMessageReceived {
        message: GroupMessagePayload,
    },
    GroupTyping {
        group_id: GroupId,
        user_id: UserId,
        is_typing: bool,
    },
    GroupMemberAdded {
        group_id: GroupId,
        member: MemberSnapshot,
        added_by: UserId,
        joined_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<GroupSummary>,
    },
    GroupMembersAdded {
        group_id: GroupId,
        members: Vec<MemberSnapshot>,
        added_by: UserId,
        joined_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<GroupSummary>,
    },
    GroupMemberRemoved {
        group_id: GroupId,
        user_id: UserId,
        removed_by: UserId,
    },
    GroupMemberLeft {
        group_id: GroupId,
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_admin_id: Option<UserId>,
    },
    GroupUpdated {
        group_id: GroupId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        admin_id: Option<UserId>,
    },
    GroupDeleted {
        group_id: GroupId,
    },
    GroupMessagesRead {
        group_id: GroupId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
        read_at: DateTime<Utc>,
    },
    GroupMessageDelivered {
        group_id: GroupId,
        message_id: MessageId,
        user_id: UserId,
        delivered_at: DateTime<Utc>,
    },
    GroupMessageDeleted {
        group_id: GroupId,
        message_id: MessageId,
        #[serde(default)]
        for_everyone: bool,
    },
    GroupSystemMessage {
        message: GroupMessagePayload,
    },
    Error(ApiError),
}

/// Subscription key for inbound events; one per `ServerEvent` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageReceived,
    Typing,
    UserOnline,
    UserOffline,
    OnlineList,
    CustomerOnline,
    CustomerOffline,
    MessageDeleted,
    MessageStatusUpdated,
    MessageConfirmed,
    GroupMessageReceived,
    GroupTyping,
    GroupMemberAdded,
    GroupMembersAdded,
    GroupMemberRemoved,
    GroupMemberLeft,
    GroupUpdated,
    GroupDeleted,
    GroupMessagesRead,
    GroupMessageDelivered,
    GroupMessageDeleted,
    GroupSystemMessage,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 23] = [
        EventKind::MessageReceived,
        EventKind::Typing,
        EventKind::UserOnline,
        EventKind::UserOffline,
        EventKind::OnlineList,
        EventKind::CustomerOnline,
        EventKind::CustomerOffline,
        EventKind::MessageDeleted,
        EventKind::MessageStatusUpdated,
        EventKind::MessageConfirmed,
        EventKind::GroupMessageReceived,
        EventKind::GroupTyping,
        EventKind::GroupMemberAdded,
        EventKind::GroupMembersAdded,
        EventKind::GroupMemberRemoved,
        EventKind::GroupMemberLeft,
        EventKind::GroupUpdated,
        EventKind::GroupDeleted,
        EventKind::GroupMessagesRead,
        EventKind::GroupMessageDelivered,
        EventKind::GroupMessageDeleted,
        EventKind::GroupSystemMessage,
        EventKind::Error,
    ];
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::MessageReceived { .. } => EventKind::MessageReceived,
            ServerEvent::Typing { .. } => EventKind::Typing,
            ServerEvent::UserOnline { .. } => EventKind::UserOnline,
            ServerEvent::UserOffline { .. } => EventKind::UserOffline,
            ServerEvent::OnlineList { .. } => EventKind::OnlineList,
            ServerEvent::CustomerOnline { .. } => EventKind::CustomerOnline,
            ServerEvent::CustomerOffline { .. } => EventKind::CustomerOffline,
            ServerEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
            ServerEvent::MessageStatusUpdated { .. } => EventKind::MessageStatusUpdated,
            ServerEvent::MessageConfirmed { .. } => EventKind::MessageConfirmed,
            ServerEvent::GroupMessageReceived { .. } => EventKind::GroupMessageReceived,
            ServerEvent::GroupTyping { .. } => EventKind::GroupTyping,
            ServerEvent::GroupMemberAdded { .. } => EventKind::GroupMemberAdded,
            ServerEvent::GroupMembersAdded { .. } => EventKind::GroupMembersAdded,
            ServerEvent::GroupMemberRemoved { .. } => EventKind::GroupMemberRemoved,
            ServerEvent::GroupMemberLeft { .. } => EventKind::GroupMemberLeft,
            ServerEvent::GroupUpdated { .. } => EventKind::GroupUpdated,
            ServerEvent::GroupDeleted { .. } => EventKind::GroupDeleted,
            ServerEvent::GroupMessagesRead { .. } => EventKind::GroupMessagesRead,
            ServerEvent::GroupMessageDelivered { .. } => EventKind::GroupMessageDelivered,
            ServerEvent::GroupMessageDeleted { .. } => EventKind::GroupMessageDeleted,
            ServerEvent::GroupSystemMessage { .. } => EventKind::GroupSystemMessage,
            ServerEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Inbound wire frame: either a pushed event or the ack for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ServerFrame {
    Event { event: ServerEvent },
    Ack(SendAck),
}
