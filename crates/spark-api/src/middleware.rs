use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};

use spark_gateway::GatewayError;
use spark_types::models::User;

use crate::auth::AppState;

/// The caller of a protected route, resolved from the session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

/// Resolve the session cookie with the same verifier the gateway uses.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let sessions = state.dispatcher.sessions();

    let resolved = match sessions.token_from_headers(req.headers()) {
        Ok(token) => sessions
            .resolve(token.clone())
            .await
            .map(|user| AuthUser { user, token }),
        Err(e) => Err(e),
    };

    let auth = resolved.map_err(|e| match e {
        GatewayError::Storage(_) => {
            error!("Session lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => {
            debug!("Rejected request to {}: {}", req.uri().path(), e);
            StatusCode::UNAUTHORIZED
        }
    })?;

    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}
