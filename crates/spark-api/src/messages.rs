use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use spark_db::Store;
use tracing::error;
use uuid::Uuid;

use spark_types::api::HistoryResponse;

use crate::auth::AppState;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: only messages strictly older than this timestamp.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

/// GET /conversations/{user_id}/messages: history with another user,
/// newest first. Creates the conversation if the pair never talked.
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, StatusCode> {
    if user_id == auth.user.id {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Run all blocking DB queries off the async runtime
    let db = state.db.clone();
    let me = auth.user.id;
    let limit = query.limit.clamp(1, 200);
    let before = query.before;

    let response = tokio::task::spawn_blocking(move || {
        let internal = |e: anyhow::Error| {
            error!("History lookup {} <-> {} failed: {}", me, user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if db.get_user_by_id(user_id).map_err(internal)?.is_none() {
            return Err(StatusCode::NOT_FOUND);
        }
        let conversation = db.get_or_create_conversation(me, user_id).map_err(internal)?;
        let messages = db.get_messages(conversation.id, limit, before).map_err(internal)?;

        Ok::<_, StatusCode>(HistoryResponse {
            conversation,
            messages,
        })
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use uuid::Uuid;

    use crate::testutil::TestApp;

    #[tokio::test]
    async fn test_history_creates_conversation_lazily() {
        let app = TestApp::new();
        let (ada_id, ada_cookie) = app.register("ada").await;
        let (bob_id, bob_cookie) = app.register("bob").await;

        let (status, _, first) = app
            .request("GET", &format!("/conversations/{bob_id}/messages"), Some(&ada_cookie), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["messages"].as_array().unwrap().len(), 0);

        let ada: Uuid = ada_id.parse().unwrap();
        let bob: Uuid = bob_id.parse().unwrap();
        app.state
            .dispatcher
            .send_message(ada, bob, Some("hi".into()), None)
            .await
            .unwrap();

        let (_, _, second) = app
            .request("GET", &format!("/conversations/{ada_id}/messages"), Some(&bob_cookie), None)
            .await;
        assert_eq!(second["conversation"]["id"], first["conversation"]["id"]);
        assert_eq!(second["messages"][0]["content"], "hi");
        assert_eq!(second["messages"][0]["senderId"], ada_id);
    }

    #[tokio::test]
    async fn test_history_rejections() {
        let app = TestApp::new();
        let (ada_id, ada_cookie) = app.register("ada").await;

        let (status, _, _) = app
            .request("GET", &format!("/conversations/{ada_id}/messages"), Some(&ada_cookie), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = app
            .request(
                "GET",
                &format!("/conversations/{}/messages", Uuid::new_v4()),
                Some(&ada_cookie),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
