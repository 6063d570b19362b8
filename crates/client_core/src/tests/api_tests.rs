use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::*;
use crate::test_support::{at, conversation, group, group_message};
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::Value;
use shared::error::{ApiError, ErrorCode};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: String,
    body: Vec<u8>,
}

/// Canned REST backend: answers by path and records every request.
#[derive(Clone, Default)]
struct FakeBackend {
    routes: Arc<Mutex<HashMap<String, (StatusCode, Value)>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeBackend {
    fn respond(&self, path: &str, status: StatusCode, body: impl serde::Serialize) {
        let body = serde_json::to_value(body).expect("serialize canned body");
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body));
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn answer(
    State(backend): State<FakeBackend>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    backend.requests.lock().unwrap().push(Recorded {
        method,
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        body: body.to_vec(),
    });
    let canned = backend.routes.lock().unwrap().get(uri.path()).cloned();
    match canned {
        Some((status, value)) => (status, Json(value)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_backend() -> anyhow::Result<(HttpChatApi, FakeBackend)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let backend = FakeBackend::default();
    let app = Router::new()
        .fallback(answer)
        .with_state(backend.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((HttpChatApi::new(format!("http://{addr}/"), UserId(7)), backend))
}

#[tokio::test]
async fn conversation_list_is_scoped_to_the_user() {
    let (api, backend) = spawn_backend().await.expect("spawn backend");
    backend.respond(
        "/chat/conversations",
        StatusCode::OK,
        vec![conversation(10, 2), conversation(11, 3)],
    );

    let conversations = api.fetch_conversations().await.expect("fetch");
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[1].conversation_id, ConversationId(11));

    let requests = backend.requests();
    assert_eq!(requests[0].method, Method::GET);
    assert_eq!(requests[0].query, "user_id=7");
}

#[tokio::test]
async fn history_page_carries_cursor_and_clamped_limit() {
    let (api, backend) = spawn_backend().await.expect("spawn backend");
    backend.respond(
        "/chat/groups/20/messages",
        StatusCode::OK,
        vec![group_message("g1", 20, 2, "x", 10)],
    );

    let page = api
        .fetch_group_messages(GroupId(20), Some(MessageId::new("g9")), 500)
        .await
        .expect("fetch");
    assert_eq!(page[0].message_id, MessageId::new("g1"));
    assert_eq!(page[0].created_at, at(10));

    let requests = backend.requests();
    assert_eq!(requests[0].query, "user_id=7&limit=100&before=g9");

    backend.respond(
        "/chat/conversations/10/messages",
        StatusCode::OK,
        Vec::<MessagePayload>::new(),
    );
    api.fetch_messages(ConversationId(10), None, 0)
        .await
        .expect("fetch");
    assert_eq!(backend.requests()[1].query, "user_id=7&limit=1");
}

#[tokio::test]
async fn error_status_is_reported() {
    let (api, backend) = spawn_backend().await.expect("spawn backend");
    backend.respond(
        "/chat/groups",
        StatusCode::FORBIDDEN,
        ApiError::new(ErrorCode::Forbidden, "nope"),
    );

    let err = api.fetch_groups().await.unwrap_err();
    assert!(err.to_string().contains("403"), "{err:#}");
    assert!(api.fetch_unread_counts().await.is_err());
}

#[tokio::test]
async fn upload_posts_raw_bytes_and_keeps_local_waveform() {
    let (api, backend) = spawn_backend().await.expect("spawn backend");
    backend.respond(
        "/chat/attachments",
        StatusCode::OK,
        Attachment {
            kind: AttachmentKind::Voice,
            url: "https://files.test/v1.ogg".into(),
            filename: "v1.ogg".into(),
            size_bytes: 4,
            mime_type: None,
            duration_secs: None,
            waveform: None,
        },
    );

    let attachment = api
        .upload_attachment(AttachmentUpload {
            kind: AttachmentKind::Voice,
            filename: "v1.ogg".into(),
            mime_type: None,
            bytes: vec![1, 2, 3, 4],
            duration_secs: Some(3.5),
            waveform: Some(vec![0, 9, 4]),
        })
        .await
        .expect("upload");
    assert_eq!(attachment.waveform, Some(vec![0, 9, 4]));
    assert_eq!(attachment.duration_secs, Some(3.5));

    let request = &backend.requests()[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.body, vec![1, 2, 3, 4]);
    assert!(request.query.contains("kind=voice"));
    assert!(request.query.contains("filename=v1.ogg"));
    assert!(request.query.contains("duration_secs=3.5"));
    assert!(request
        .query
        .contains("mime_type=application%2Foctet-stream"));
}

#[tokio::test]
async fn empty_upload_is_refused_locally() {
    let (api, backend) = spawn_backend().await.expect("spawn backend");
    let result = api
        .upload_attachment(AttachmentUpload {
            kind: AttachmentKind::File,
            filename: "empty.txt".into(),
            mime_type: Some("text/plain".into()),
            bytes: Vec::new(),
            duration_secs: None,
            waveform: None,
        })
        .await;
    assert!(result.is_err());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn deletes_target_the_thread_route() {
    let (api, backend) = spawn_backend().await.expect("spawn backend");
    backend.respond(
        "/chat/groups/20/messages/g1",
        StatusCode::OK,
        Value::Null,
    );
    backend.respond(
        "/chat/conversations/10/messages/m1",
        StatusCode::OK,
        Value::Null,
    );

    api.delete_message(
        ThreadRef::Group(GroupId(20)),
        &MessageId::new("g1"),
        true,
    )
    .await
    .expect("group delete");
    api.delete_message(
        ThreadRef::Direct(ConversationId(10)),
        &MessageId::new("m1"),
        false,
    )
    .await
    .expect("direct delete");

    let requests = backend.requests();
    assert_eq!(requests[0].method, Method::DELETE);
    assert_eq!(requests[0].query, "user_id=7&for_everyone=true");
    assert_eq!(requests[1].path, "/chat/conversations/10/messages/m1");
    assert_eq!(requests[1].query, "user_id=7&for_everyone=false");
}

#[tokio::test]
async fn group_management_sends_json_bodies() {
    let (api, backend) = spawn_backend().await.expect("spawn backend");
    backend.respond("/chat/groups", StatusCode::OK, group(20, 7, &[7, 2], 0));
    backend.respond(
        "/chat/groups/20/members",
        StatusCode::OK,
        group(20, 7, &[7, 2, 3], 0),
    );

    let created = api
        .create_group(CreateGroupRequest {
            name: "ops".into(),
            member_ids: vec![UserId(2)],
        })
        .await
        .expect("create");
    assert_eq!(created.group_id, GroupId(20));

    let grown = api
        .add_group_members(GroupId(20), vec![UserId(3)])
        .await
        .expect("add");
    assert_eq!(grown.participant_ids.len(), 3);

    let requests = backend.requests();
    let body: Value = serde_json::from_slice(&requests[0].body).expect("json body");
    assert_eq!(body["name"], "ops");
    let body: Value = serde_json::from_slice(&requests[1].body).expect("json body");
    assert_eq!(body["member_ids"], serde_json::json!([3]));
}
