use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use spark_gateway::GatewayError;

use crate::auth::AppState;
use crate::middleware::AuthUser;

/// POST /users/{user_id}/view: records a profile view and notifies the
/// viewed user.
pub async fn view_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, StatusCode> {
    if user_id == auth.user.id {
        return Err(StatusCode::BAD_REQUEST);
    }

    let notification = state
        .dispatcher
        .profile_viewed(auth.user.id, user_id)
        .await
        .map_err(|e| match e {
            GatewayError::Invalid(_) => StatusCode::NOT_FOUND,
            GatewayError::PrincipalNotFound(_) | GatewayError::Unauthenticated(_) => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::Storage(_) => {
                error!("Failed to record profile view {} -> {}: {}", auth.user.id, user_id, e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    Ok((StatusCode::CREATED, Json(notification)))
}
