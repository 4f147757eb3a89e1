//! The seam between the session manager and whatever speaks the messaging
//! protocol.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::state::Identity;

/// Lifecycle notifications emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A QR payload the operator must scan.
    CredentialReady(String),
    Authenticated,
    Ready(Identity),
    AuthFailed(String),
    Disconnected(String),
}

/// A message seen by the session, including ones it sent itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Chat address of the counterpart (or group).
    pub sender: String,
    pub recipient: String,
    pub is_self_originated: bool,
    pub body: String,
    /// Display name the transport attached to the message, if any.
    pub sender_name: Option<String>,
}

/// Where a transport instance sends its events.
///
/// Events carry the instance's generation so the manager can drop anything a
/// retired instance says after it was replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    lifecycle: mpsc::UnboundedSender<(u64, LifecycleEvent)>,
    messages: mpsc::UnboundedSender<(u64, InboundMessage)>,
}

impl EventSink {
    pub fn new(
        generation: u64,
        lifecycle: mpsc::UnboundedSender<(u64, LifecycleEvent)>,
        messages: mpsc::UnboundedSender<(u64, InboundMessage)>,
    ) -> Self {
        Self {
            generation,
            lifecycle,
            messages,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lifecycle(&self, event: LifecycleEvent) {
        // Receiver gone means the manager is shutting down.
        let _ = self.lifecycle.send((self.generation, event));
    }

    pub fn message(&self, message: InboundMessage) {
        let _ = self.messages.send((self.generation, message));
    }
}

/// One live connection to the messaging network.
///
/// Errors are the transport's own messages; the manager passes them through
/// verbatim.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn initialize(&self) -> Result<(), String>;

    async fn request_pairing_code(&self, phone: &str) -> Result<String, String>;

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<(), String>;

    async fn logout(&self) -> Result<(), String>;

    /// Display name of a contact, if the network knows one.
    async fn contact_name(&self, chat_id: &str) -> Result<Option<String>, String>;

    /// Release everything this instance holds. Must not fail.
    async fn shutdown(&self);
}

/// Creates a new transport instance for every (re)connect cycle.
pub trait TransportFactory: Send + Sync {
    fn create(&self, events: EventSink) -> Result<Arc<dyn Transport>, String>;
}
