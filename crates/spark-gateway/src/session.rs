//! Resolves a WebSocket handshake to the user it belongs to.
//!
//! The session cookie carries `s:<token>.<signature>`, where the signature is
//! an HMAC-SHA256 of the token under the server secret. Only the token is
//! looked up in the session store.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use spark_db::Store;
use spark_types::models::User;

use crate::blocking;
use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_PREFIX: &str = "s:";
const SIGNED_PREFIX_ENCODED: &str = "s%3A";

/// Signs and unsigns session tokens for use as cookie values.
#[derive(Clone)]
pub struct SessionSigner {
    mac: HmacSha256,
}

impl SessionSigner {
    pub fn new(secret: &[u8]) -> Result<Self, InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
        })
    }

    pub fn sign(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        let signature = B64.encode(mac.finalize().into_bytes());
        format!("{SIGNED_PREFIX}{token}.{signature}")
    }

    /// Strips the signature framing and returns the token if the signature
    /// matches.
    pub fn unsign(&self, value: &str) -> Option<String> {
        let framed = value
            .strip_prefix(SIGNED_PREFIX)
            .or_else(|| value.strip_prefix(SIGNED_PREFIX_ENCODED))?;
        let (token, signature) = framed.rsplit_once('.')?;
        let signature = B64.decode(signature).ok()?;

        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).ok()?;

        Some(token.to_string())
    }
}

/// Authenticates handshakes against the external session store.
#[derive(Clone)]
pub struct SessionVerifier {
    store: Arc<dyn Store>,
    signer: SessionSigner,
    cookie_name: String,
}

impl SessionVerifier {
    pub fn new(store: Arc<dyn Store>, signer: SessionSigner, cookie_name: impl Into<String>) -> Self {
        Self {
            store,
            signer,
            cookie_name: cookie_name.into(),
        }
    }

    pub fn signer(&self) -> &SessionSigner {
        &self.signer
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// The unsigned session token carried by `headers`, if any.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Result<String, GatewayError> {
        let jar = CookieJar::from_headers(headers);
        let value = jar
            .get(&self.cookie_name)
            .ok_or(GatewayError::Unauthenticated("missing session cookie"))?;

        self.signer
            .unsign(value.value())
            .ok_or(GatewayError::Unauthenticated("malformed or forged session cookie"))
    }

    pub async fn verify(&self, headers: &HeaderMap) -> Result<User, GatewayError> {
        let token = self.token_from_headers(headers)?;
        self.resolve(token).await
    }

    /// Looks the token up and requires that it names an existing user.
    pub async fn resolve(&self, token: String) -> Result<User, GatewayError> {
        let record = blocking::call(&self.store, move |store| store.get_session(&token))
            .await?
            .ok_or(GatewayError::Unauthenticated("unknown session"))?;

        if record.is_expired(chrono::Utc::now()) {
            return Err(GatewayError::Unauthenticated("session expired"));
        }

        let user_id = record
            .user_id
            .ok_or(GatewayError::Unauthenticated("session has no principal"))?;

        let user = blocking::call(&self.store, move |store| store.get_user(user_id))
            .await?
            .ok_or(GatewayError::PrincipalNotFound(user_id))?;

        debug!("Session resolved to {} ({})", user.username, user.id);
        Ok(user)
    }
}
