//! Session module - owns the single external messaging session.

pub mod driver;
pub mod manager;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

use thiserror::Error;

pub use driver::{DriverConfig, DriverFactory};
pub use manager::{SessionConfig, SessionManager};
pub use state::{Identity, PendingCredential, SessionStatus};
pub use transport::InboundMessage;

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Bad or empty phone number.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("message body is empty")]
    EmptyMessage,
    #[error("session is already connected")]
    AlreadyConnected,
    /// Failure reported by the transport, message passed through as-is.
    #[error("{0}")]
    Transport(String),
}
