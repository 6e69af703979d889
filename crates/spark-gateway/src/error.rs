use axum::extract::ws::close_code;
use thiserror::Error;
use uuid::Uuid;

/// Close code sent to a connection that has been replaced by a newer one
/// for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4000;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No usable session: missing or forged cookie, unknown or expired
    /// session, or a session that was never bound to a user.
    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),

    /// The session names a user that no longer exists.
    #[error("user {0} no longer exists")]
    PrincipalNotFound(Uuid),

    /// The request itself is unacceptable; nothing was persisted.
    #[error("{0}")]
    Invalid(String),

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl GatewayError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthenticated(_) | Self::PrincipalNotFound(_))
    }

    /// WebSocket close code for a handshake that failed with this error.
    pub fn close_code(&self) -> u16 {
        if self.is_auth_failure() {
            close_code::POLICY
        } else {
            close_code::ERROR
        }
    }

    pub fn close_reason(&self) -> &'static str {
        if self.is_auth_failure() {
            "Authentication required"
        } else {
            "Authentication failed"
        }
    }
}
