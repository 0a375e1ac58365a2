use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info};

use healthbridge_types::api::{ArchiveResponse, DataResponse, PageResponse, Pagination, SendMessageRequest, SendMessageResponse};
use healthbridge_types::models::{Conversation, MessageView};

use crate::error::{ApiError, join_error};
use crate::middleware::AuthUser;
use crate::retention;
use crate::state::AppState;

pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

impl PageQuery {
    /// Page from 1, limit within 1..=MAX_PAGE_SIZE.
    pub fn normalized(&self) -> (u32, u32) {
        (self.page.max(1), self.limit.clamp(1, MAX_PAGE_SIZE))
    }
}

pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_conversations(caller.id))
        .await
        .map_err(join_error)??;

    let conversations: Vec<Conversation> = rows
        .into_iter()
        .map(|row| Conversation {
            user: row.counterpart,
            last_message: row.last_message.into_view(),
        })
        .collect();

    Ok(Json(DataResponse::ok(conversations)))
}

/// One page of the thread with `counterpart_id`, oldest first. Marks every
/// unread message from the counterpart to the caller as read.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(counterpart_id): Path<i64>,
    Query(query): Query<PageQuery>,
    Extension(caller): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, limit) = query.normalized();

    // Run blocking DB work off the async runtime
    let db = state.db.clone();
    let user_id = caller.id;
    let thread = tokio::task::spawn_blocking(move || {
        db.list_thread(user_id, counterpart_id, page, limit, chrono::Utc::now())
    })
    .await
    .map_err(join_error)??;

    if thread.marked_read > 0 {
        debug!("{} marked {} messages from {} as read", user_id, thread.marked_read, counterpart_id);
    }

    let messages: Vec<MessageView> = thread.messages.into_iter().map(|row| row.into_view()).collect();

    Ok(Json(PageResponse {
        success: true,
        data: messages,
        pagination: Pagination::new(thread.total, page, limit),
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let message = state.messenger.send(caller.id, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            success: true,
            message: "Message sent".to_string(),
            data: message,
        }),
    ))
}

/// On-demand retention sweep, same purge as the daily job.
pub async fn archive_messages(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let retention_days = state.settings.retention_days;
    let deleted_count = retention::archive_old_messages(&state.db, retention_days).await?;

    info!("{} ({}) triggered archive: {} messages purged", caller.name, caller.id, deleted_count);
    state.activity.archive(Some(caller.id), deleted_count, retention_days);

    Ok(Json(ArchiveResponse {
        success: true,
        message: format!("{} messages archived", deleted_count),
        deleted_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};

    use crate::test_support::{TestApp, body_json};

    #[test]
    fn page_query_is_clamped() {
        let q = PageQuery { page: 0, limit: 5000 };
        assert_eq!(q.normalized(), (1, MAX_PAGE_SIZE));
        let q = PageQuery { page: 3, limit: 0 };
        assert_eq!(q.normalized(), (3, 1));
    }

    #[tokio::test]
    async fn send_then_receiver_reads_thread() {
        let app = TestApp::new();
        let (alice, alice_token) = app.user("Alice", "alice@example.org");
        let (bob, bob_token) = app.user("Bob", "bob@example.org");

        let res = app
            .post_json("/messages/send", Some(&alice_token), json!({ "receiver_id": bob, "content": "Bonjour" }))
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let sent: Value = body_json(res).await;
        assert_eq!(sent["data"]["sender"]["name"], "Alice");
        assert_eq!(sent["data"]["receiver"]["id"], bob);
        assert_eq!(sent["data"]["is_read"], false);

        let res = app.get(&format!("/messages/{alice}"), Some(&bob_token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let thread: Value = body_json(res).await;
        assert_eq!(thread["pagination"], json!({ "total": 1, "page": 1, "limit": 50, "pages": 1 }));
        let first = &thread["data"][0];
        assert_eq!(first["content"], "Bonjour");
        assert_eq!(first["is_read"], true);
        assert!(first["read_at"].is_string());
    }

    #[tokio::test]
    async fn sender_reading_does_not_mark_own_messages() {
        let app = TestApp::new();
        let (_, alice_token) = app.user("Alice", "alice@example.org");
        let (bob, _) = app.user("Bob", "bob@example.org");

        app.post_json("/messages/send", Some(&alice_token), json!({ "receiver_id": bob, "content": "hi" }))
            .await;

        let thread: Value = body_json(app.get(&format!("/messages/{bob}"), Some(&alice_token)).await).await;
        assert_eq!(thread["data"][0]["is_read"], false);
        assert!(thread["data"][0]["read_at"].is_null());
    }

    #[tokio::test]
    async fn send_validation() {
        let app = TestApp::new();
        let (_, token) = app.user("Alice", "alice@example.org");

        let missing_receiver = app.post_json("/messages/send", Some(&token), json!({ "content": "hi" })).await;
        assert_eq!(missing_receiver.status(), StatusCode::BAD_REQUEST);

        let missing_content = app.post_json("/messages/send", Some(&token), json!({ "receiver_id": 1 })).await;
        assert_eq!(missing_content.status(), StatusCode::BAD_REQUEST);

        let unknown = app
            .post_json("/messages/send", Some(&token), json!({ "receiver_id": 999, "content": "hi" }))
            .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let anonymous = app.post_json("/messages/send", None, json!({ "receiver_id": 1, "content": "hi" })).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_send_bodies_are_bad_requests() {
        let app = TestApp::new();
        let (_, token) = app.user("Alice", "alice@example.org");
        let (bob, _) = app.user("Bob", "bob@example.org");

        let extra_field = app
            .post_json(
                "/messages/send",
                Some(&token),
                json!({ "receiver_id": bob, "content": "hi", "attachment": null }),
            )
            .await;
        assert_eq!(extra_field.status(), StatusCode::CREATED);

        let string_receiver = app
            .post_json("/messages/send", Some(&token), json!({ "receiver_id": "bob", "content": "hi" }))
            .await;
        assert_eq!(string_receiver.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(string_receiver).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn thread_pages_are_oldest_first() {
        let app = TestApp::new();
        let (alice, alice_token) = app.user("Alice", "alice@example.org");
        let (bob, _) = app.user("Bob", "bob@example.org");

        let base = Utc::now() - Duration::hours(1);
        for i in 0..5 {
            app.state
                .db
                .insert_message_at(bob, alice, &format!("m{i}"), base + Duration::seconds(i))
                .unwrap();
        }

        let page: Value = body_json(app.get(&format!("/messages/{bob}?page=1&limit=2"), Some(&alice_token)).await).await;
        let contents: Vec<&str> = page["data"].as_array().unwrap().iter().map(|m| m["content"].as_str().unwrap()).collect();
        assert_eq!(contents, ["m3", "m4"]);
        assert_eq!(page["pagination"]["pages"], 3);
        assert_eq!(page["pagination"]["total"], 5);
    }

    #[tokio::test]
    async fn conversations_list_latest_per_counterpart() {
        let app = TestApp::new();
        let (alice, alice_token) = app.user("Alice", "alice@example.org");
        let (bob, _) = app.user("Bob", "bob@example.org");
        let (carol, _) = app.user("Carol", "carol@example.org");

        let base = Utc::now() - Duration::hours(1);
        app.state.db.insert_message_at(alice, carol, "to carol", base).unwrap();
        app.state.db.insert_message_at(alice, bob, "to bob", base + Duration::minutes(1)).unwrap();
        app.state.db.insert_message_at(bob, alice, "from bob", base + Duration::minutes(2)).unwrap();

        let body: Value = body_json(app.get("/messages/conversations", Some(&alice_token)).await).await;
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["user"]["id"], bob);
        assert_eq!(data[0]["last_message"]["content"], "from bob");
        assert_eq!(data[1]["user"]["id"], carol);
    }

    #[tokio::test]
    async fn archive_purges_old_read_messages_only() {
        let app = TestApp::new();
        let (alice, alice_token) = app.user("Alice", "alice@example.org");
        let (bob, _) = app.user("Bob", "bob@example.org");

        let old = Utc::now() - Duration::days(31);
        let read = app.state.db.insert_message_at(bob, alice, "old read", old).unwrap();
        app.state.db.list_thread(alice, bob, 1, 50, Utc::now()).unwrap();
        let unread = app.state.db.insert_message_at(alice, bob, "old unread", old).unwrap();

        let res = app.post_json("/messages/archive", Some(&alice_token), json!({})).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = body_json(res).await;
        assert_eq!(body["deleted_count"], 1);

        assert!(app.state.db.get_message(read.id).unwrap().is_none());
        assert!(app.state.db.get_message(unread.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn sends_are_audited_through_the_hook() {
        let app = TestApp::new();
        let (alice, alice_token) = app.user("Alice", "alice@example.org");
        let (bob, _) = app.user("Bob", "bob@example.org");

        let sent: Value = body_json(
            app.post_json("/messages/send", Some(&alice_token), json!({ "receiver_id": bob, "content": "hi" }))
                .await,
        )
        .await;
        app.state.activity.flush().await;

        let body: Value = body_json(app.get("/activities?action=CREATE", Some(&alice_token)).await).await;
        let entry = &body["data"][0];
        assert_eq!(entry["entity_type"], "Message");
        assert_eq!(entry["entity_id"], sent["data"]["id"]);
        assert_eq!(entry["user_id"], alice);
    }
}
