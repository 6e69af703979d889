use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use rand::RngCore;
use tracing::{error, info};

use spark_db::Database;
use spark_gateway::Dispatcher;
use spark_types::api::{AuthResponse, LoginRequest, RegisterRequest};
use spark_types::models::User;

use crate::middleware::AuthUser;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub session_ttl: chrono::Duration,
    pub secure_cookies: bool,
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let display_name = req.display_name.trim();
    if display_name.is_empty() || display_name.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Check if username is taken
    if state
        .db
        .get_user_by_username(&req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    let user = state
        .db
        .create_user(&req.username, &password_hash, display_name, req.photo_url.as_deref())
        .map_err(|e| {
            error!("Failed to create user {}: {}", req.username, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!("Registered {} ({})", user.username, user.id);
    let jar = start_session(&state, jar, &user)?;

    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            user: user.public_profile(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = state
        .db
        .get_user_by_username(&req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&row.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user = row.into_user().map_err(|e| {
        error!("Corrupt user row for {}: {}", req.username, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let jar = start_session(&state, jar, &user)?;

    Ok((
        jar,
        Json(AuthResponse {
            user: user.public_profile(),
        }),
    ))
}

/// Ends the session and drops the user's live connection, if any.
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let token = auth.token.clone();
    tokio::task::spawn_blocking(move || db.delete_session(&token))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Failed to delete session for {}: {}", auth.user.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let was_connected = state.dispatcher.logout(auth.user.id).await;
    info!("{} ({}) logged out (was_connected={})", auth.user.username, auth.user.id, was_connected);

    let mut cookie = Cookie::new(state.dispatcher.sessions().cookie_name().to_string(), "");
    cookie.set_path("/");

    Ok((StatusCode::NO_CONTENT, jar.remove(cookie)))
}

/// Persists a new session bound to `user` and adds its signed cookie.
fn start_session(state: &AppStateInner, jar: CookieJar, user: &User) -> Result<CookieJar, StatusCode> {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let token = B64.encode(bytes);

    state
        .db
        .create_session(&token, Some(user.id), chrono::Utc::now() + state.session_ttl)
        .map_err(|e| {
            error!("Failed to create session for {}: {}", user.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let sessions = state.dispatcher.sessions();
    let cookie = Cookie::build((sessions.cookie_name().to_string(), sessions.signer().sign(&token)))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.secure_cookies);

    Ok(jar.add(cookie))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testutil::TestApp;

    #[tokio::test]
    async fn test_register_sets_working_cookie() {
        let app = TestApp::new();
        let (user_id, cookie) = app.register("ada").await;

        let (status, _, body) = app.request("GET", "/notifications", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
        assert!(!user_id.is_empty());
    }

    #[tokio::test]
    async fn test_register_validation_and_conflict() {
        let app = TestApp::new();
        let short = json!({"username": "ab", "password": "correct horse", "displayName": "Ab"});
        let (status, _, _) = app.request("POST", "/auth/register", None, Some(short)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        app.register("ada").await;
        let dup = json!({"username": "ada", "password": "correct horse", "displayName": "Ada"});
        let (status, _, _) = app.request("POST", "/auth/register", None, Some(dup)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_login() {
        let app = TestApp::new();
        app.register("ada").await;

        let bad = json!({"username": "ada", "password": "wrong password"});
        let (status, cookie, _) = app.request("POST", "/auth/login", None, Some(bad)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(cookie.is_none());

        let good = json!({"username": "ada", "password": "correct horse"});
        let (status, cookie, body) = app.request("POST", "/auth/login", None, Some(good)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["displayName"], "ADA");
        assert!(body["user"].get("username").is_none());
        assert!(cookie.unwrap().starts_with("spark.sid="));
    }

    #[tokio::test]
    async fn test_logout_invalidates_session() {
        let app = TestApp::new();
        let (_, cookie) = app.register("ada").await;

        let (status, _, _) = app.request("POST", "/auth/logout", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = app.request("GET", "/notifications", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
