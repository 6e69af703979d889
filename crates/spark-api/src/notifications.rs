use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::auth::AppState;
use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = auth.user.id;
    let limit = query.limit.clamp(1, 200);

    let notifications = tokio::task::spawn_blocking(move || db.get_notifications(user_id, limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Failed to list notifications for {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = auth.user.id;

    let updated =
        tokio::task::spawn_blocking(move || db.mark_notification_read(notification_id, user_id))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .map_err(|e| {
                error!("Failed to mark notification {} read: {}", notification_id, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
