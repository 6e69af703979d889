pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use spark_api::auth::{AppState, AppStateInner};
use spark_db::{Database, Store};
use spark_gateway::{Dispatcher, SessionSigner, SessionVerifier, connection};

use crate::config::Config;

/// Wires the database into one dispatcher shared by REST and the gateway.
pub fn build_state(db: Arc<Database>, config: &Config) -> anyhow::Result<AppState> {
    let store: Arc<dyn Store> = db.clone();
    let signer = SessionSigner::new(config.session_secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Unusable session secret: {}", e))?;
    let verifier = SessionVerifier::new(store.clone(), signer, config.cookie_name.clone());

    Ok(Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(store, verifier),
        session_ttl: config.session_ttl,
        secure_cookies: config.secure_cookies,
    }))
}

pub fn app(state: AppState) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.dispatcher.clone());

    Router::new()
        .merge(spark_api::router(state))
        .merge(ws_route)
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(dispatcher): State<Dispatcher>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, headers))
}
