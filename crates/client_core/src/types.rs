use shared::{
    domain::{MessageId, ThreadRef},
    error::ApiError,
    protocol::{Attachment, ClientRequest, Mention},
};

use crate::transport::ConnectionState;

/// Notifications for presentation collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConversationsChanged,
    GroupsChanged,
    MessagesChanged(ThreadRef),
    PresenceChanged,
    TypingChanged(ThreadRef),
    UnreadChanged { direct: u32, group: u32 },
    FocusChanged(Option<ThreadRef>),
    SendFailed {
        thread: ThreadRef,
        temp_id: MessageId,
        reason: String,
    },
    Connection(ConnectionState),
    ServerError(ApiError),
}

/// Work a synchronous handler asks the session to perform once the engine
/// lock is released.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(ClientRequest),
    Notify(ClientEvent),
    RefreshConversations,
    RefreshGroups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Applied,
    /// Already processed; nothing changed.
    Duplicate,
    /// Valid event with nothing to apply (unknown thread, stale focus, ...).
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub outcome: HandleOutcome,
    pub effects: Vec<Effect>,
}

impl Dispatch {
    pub fn applied(effects: Vec<Effect>) -> Self {
        Self {
            outcome: HandleOutcome::Applied,
            effects,
        }
    }

    pub fn duplicate() -> Self {
        Self {
            outcome: HandleOutcome::Duplicate,
            effects: Vec::new(),
        }
    }

    pub fn ignored() -> Self {
        Self {
            outcome: HandleOutcome::Ignored,
            effects: Vec::new(),
        }
    }
}

/// Outgoing message content after any attachment upload has completed.
/// Mentions are only sent for group threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageDraft {
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub mentions: Vec<Mention>,
    pub mentions_everyone: bool,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attachment.is_none()
            && self
                .text
                .as_deref()
                .map(|text| text.trim().is_empty())
                .unwrap_or(true)
    }
}
