//! Real-time presence and messaging coordinator.
//!
//! One [`Dispatcher`] per process owns the connection registry and the
//! focus tracker. Each WebSocket gets a [`lifecycle::Connection`] that
//! authenticates once, then feeds its frames to the dispatcher in order.

pub mod blocking;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod focus;
pub mod lifecycle;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session;

#[cfg(test)]
mod testutil;

pub use dispatcher::Dispatcher;
pub use error::GatewayError;
pub use session::{SessionSigner, SessionVerifier};
