pub mod auth;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod profiles;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::auth::AppState;

/// REST routes. Everything except register/login requires a session cookie.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users/{user_id}/view", post(profiles::view_profile))
        .route("/conversations/{user_id}/messages", get(messages::get_history))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_session,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    use spark_db::{Database, Store};
    use spark_gateway::{Dispatcher, SessionSigner, SessionVerifier};

    use crate::auth::{AppState, AppStateInner};

    pub struct TestApp {
        pub state: AppState,
        pub app: Router,
    }

    impl TestApp {
        pub fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let store: Arc<dyn Store> = db.clone();
            let signer = SessionSigner::new(b"test-secret").unwrap();
            let verifier = SessionVerifier::new(store.clone(), signer, "spark.sid");
            let state = Arc::new(AppStateInner {
                db,
                dispatcher: Dispatcher::new(store, verifier),
                session_ttl: chrono::Duration::hours(1),
                secure_cookies: false,
            });
            let app = crate::router(state.clone());
            Self { state, app }
        }

        pub async fn request(
            &self,
            method: &str,
            uri: &str,
            cookie: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Option<String>, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(cookie) = cookie {
                builder = builder.header(header::COOKIE, cookie);
            }
            let body = match body {
                Some(json) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };

            let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
            let status = response.status();
            let set_cookie = response
                .headers()
                .get(header::SET_COOKIE)
                .map(|v| v.to_str().unwrap().split(';').next().unwrap().to_string());
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, set_cookie, json)
        }

        /// Registers `username` and returns (user id, cookie header value).
        pub async fn register(&self, username: &str) -> (String, String) {
            let (status, cookie, body) = self
                .request(
                    "POST",
                    "/auth/register",
                    None,
                    Some(serde_json::json!({
                        "username": username,
                        "password": "correct horse",
                        "displayName": username.to_uppercase(),
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            (body["user"]["id"].as_str().unwrap().to_string(), cookie.unwrap())
        }
    }
}
