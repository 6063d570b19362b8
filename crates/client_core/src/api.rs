use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use shared::{
    domain::{AttachmentKind, ConversationId, GroupId, MessageId, ThreadRef, UserId},
    protocol::{
        Attachment, ChatableUser, ConversationSummary, CreateGroupRequest, GroupMessageInfo,
        GroupMessagePayload, GroupSummary, MessagePayload, OnlineSnapshot, UnreadCounts,
        UpdateGroupRequest,
    },
};

/// Raw file handed to the upload endpoint before a send.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentUpload {
    pub kind: AttachmentKind,
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
    pub duration_secs: Option<f32>,
    pub waveform: Option<Vec<u8>>,
}

/// Request/response collaborator behind the realtime channel.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_chatable_users(&self) -> Result<Vec<ChatableUser>>;
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>>;
    async fn fetch_groups(&self) -> Result<Vec<GroupSummary>>;
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessagePayload>>;
    async fn fetch_group_messages(
        &self,
        group_id: GroupId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<GroupMessagePayload>>;
    async fn fetch_unread_counts(&self) -> Result<UnreadCounts>;
    async fn fetch_online_snapshot(&self) -> Result<OnlineSnapshot>;
    async fn open_conversation(&self, other_user_id: UserId) -> Result<ConversationSummary>;
    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<Attachment>;
    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<()>;
    async fn delete_message(
        &self,
        thread: ThreadRef,
        message_id: &MessageId,
        for_everyone: bool,
    ) -> Result<()>;
    async fn create_group(&self, request: CreateGroupRequest) -> Result<GroupSummary>;
    async fn update_group(
        &self,
        group_id: GroupId,
        request: UpdateGroupRequest,
    ) -> Result<GroupSummary>;
    async fn set_group_avatar(
        &self,
        group_id: GroupId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<GroupSummary>;
    async fn add_group_members(
        &self,
        group_id: GroupId,
        member_ids: Vec<UserId>,
    ) -> Result<GroupSummary>;
    async fn remove_group_member(&self, group_id: GroupId, user_id: UserId)
        -> Result<GroupSummary>;
    async fn leave_group(&self, group_id: GroupId) -> Result<()>;
    async fn delete_group(&self, group_id: GroupId) -> Result<()>;
    async fn fetch_group_message_info(
        &self,
        group_id: GroupId,
        message_id: &MessageId,
    ) -> Result<GroupMessageInfo>;
}

#[derive(Serialize)]
struct HistoryQuery {
    user_id: i64,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<String>,
}

#[derive(Serialize)]
struct OpenConversationRequest {
    other_user_id: UserId,
}

#[derive(Serialize)]
struct AddMembersRequest {
    member_ids: Vec<UserId>,
}

#[derive(Serialize)]
struct UploadQuery {
    user_id: i64,
    kind: AttachmentKind,
    filename: String,
    mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f32>,
}

/// `ChatApi` over reqwest; every call is scoped by the `user_id` query
/// parameter.
pub struct HttpChatApi {
    http: Client,
    server_url: String,
    user_id: UserId,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>, user_id: UserId) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            user_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    fn user_query(&self) -> [(&'static str, i64); 1] {
        [("user_id", self.user_id.0)]
    }

    fn history_query(&self, before: Option<MessageId>, limit: u32) -> HistoryQuery {
        HistoryQuery {
            user_id: self.user_id.0,
            limit: limit.clamp(1, 100),
            before: before.map(|id| id.0),
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_chatable_users(&self) -> Result<Vec<ChatableUser>> {
        let users = self
            .http
            .get(self.url("/chat/users"))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(users)
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conversations = self
            .http
            .get(self.url("/chat/conversations"))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("failed to decode conversation list")?;
        Ok(conversations)
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupSummary>> {
        let groups = self
            .http
            .get(self.url("/chat/groups"))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("failed to decode group list")?;
        Ok(groups)
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessagePayload>> {
        let messages = self
            .http
            .get(self.url(&format!(
                "/chat/conversations/{}/messages",
                conversation_id.0
            )))
            .query(&self.history_query(before, limit))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(messages)
    }

    async fn fetch_group_messages(
        &self,
        group_id: GroupId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<GroupMessagePayload>> {
        let messages = self
            .http
            .get(self.url(&format!("/chat/groups/{}/messages", group_id.0)))
            .query(&self.history_query(before, limit))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(messages)
    }

    async fn fetch_unread_counts(&self) -> Result<UnreadCounts> {
        let counts = self
            .http
            .get(self.url("/chat/unread"))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(counts)
    }

    async fn fetch_online_snapshot(&self) -> Result<OnlineSnapshot> {
        let snapshot = self
            .http
            .get(self.url("/chat/online"))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(snapshot)
    }

    async fn open_conversation(&self, other_user_id: UserId) -> Result<ConversationSummary> {
        let conversation = self
            .http
            .post(self.url("/chat/conversations"))
            .query(&self.user_query())
            .json(&OpenConversationRequest { other_user_id })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(conversation)
    }

    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<Attachment> {
        if upload.bytes.is_empty() {
            return Err(anyhow!("refusing to upload empty file '{}'", upload.filename));
        }
        let query = UploadQuery {
            user_id: self.user_id.0,
            kind: upload.kind,
            filename: upload.filename.clone(),
            mime_type: upload
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            duration_secs: upload.duration_secs,
        };
        let mut attachment: Attachment = self
            .http
            .post(self.url("/chat/attachments"))
            .query(&query)
            .body(upload.bytes)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("failed to decode upload result for {}", upload.filename))?;

        if attachment.waveform.is_none() {
            attachment.waveform = upload.waveform;
        }
        if attachment.duration_secs.is_none() {
            attachment.duration_secs = upload.duration_secs;
        }
        Ok(attachment)
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        self.http
            .delete(self.url(&format!("/chat/conversations/{}", conversation_id.0)))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_message(
        &self,
        thread: ThreadRef,
        message_id: &MessageId,
        for_everyone: bool,
    ) -> Result<()> {
        let path = match thread {
            ThreadRef::Direct(id) => {
                format!("/chat/conversations/{}/messages/{}", id.0, message_id)
            }
            ThreadRef::Group(id) => format!("/chat/groups/{}/messages/{}", id.0, message_id),
        };
        self.http
            .delete(self.url(&path))
            .query(&[
                ("user_id", self.user_id.0.to_string()),
                ("for_everyone", for_everyone.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn create_group(&self, request: CreateGroupRequest) -> Result<GroupSummary> {
        let group = self
            .http
            .post(self.url("/chat/groups"))
            .query(&self.user_query())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(group)
    }

    async fn update_group(
        &self,
        group_id: GroupId,
        request: UpdateGroupRequest,
    ) -> Result<GroupSummary> {
        let group = self
            .http
            .patch(self.url(&format!("/chat/groups/{}", group_id.0)))
            .query(&self.user_query())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(group)
    }

    async fn set_group_avatar(
        &self,
        group_id: GroupId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<GroupSummary> {
        let group = self
            .http
            .post(self.url(&format!("/chat/groups/{}/avatar", group_id.0)))
            .query(&[
                ("user_id", self.user_id.0.to_string()),
                ("filename", filename.to_string()),
            ])
            .body(bytes)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(group)
    }

    async fn add_group_members(
        &self,
        group_id: GroupId,
        member_ids: Vec<UserId>,
    ) -> Result<GroupSummary> {
        let group = self
            .http
            .post(self.url(&format!("/chat/groups/{}/members", group_id.0)))
            .query(&self.user_query())
            .json(&AddMembersRequest { member_ids })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(group)
    }

    async fn remove_group_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<GroupSummary> {
        let group = self
            .http
            .delete(self.url(&format!(
                "/chat/groups/{}/members/{}",
                group_id.0, user_id.0
            )))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(group)
    }

    async fn leave_group(&self, group_id: GroupId) -> Result<()> {
        self.http
            .post(self.url(&format!("/chat/groups/{}/leave", group_id.0)))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_group(&self, group_id: GroupId) -> Result<()> {
        self.http
            .delete(self.url(&format!("/chat/groups/{}", group_id.0)))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn fetch_group_message_info(
        &self,
        group_id: GroupId,
        message_id: &MessageId,
    ) -> Result<GroupMessageInfo> {
        let info = self
            .http
            .get(self.url(&format!(
                "/chat/groups/{}/messages/{}/info",
                group_id.0, message_id
            )))
            .query(&self.user_query())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info)
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
