//! Session state and its single transition handler.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::transport::LifecycleEvent;

/// Connectivity state of the session. Serialized with the names the control
/// API has always reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    #[serde(rename = "initializing")]
    Initializing,
    /// Waiting for the operator to scan a QR code or enter a pairing code.
    #[serde(rename = "qr")]
    CredentialPending,
    #[serde(rename = "authenticated")]
    Authenticated,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "auth_failure")]
    AuthFailed,
    #[serde(rename = "disconnected")]
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::CredentialPending => "qr",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::AuthFailed => "auth_failure",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential the operator needs to finish pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCredential {
    Qr(String),
    PairingCode(String),
}

/// Account the session is logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub number: String,
    pub name: Option<String>,
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub pending: Option<PendingCredential>,
    pub identity: Option<Identity>,
    pub updated_at: DateTime<Utc>,
    pub last_disconnect_reason: Option<String>,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    status: SessionStatus,
    pending: Option<PendingCredential>,
    identity: Option<Identity>,
    updated_at: DateTime<Utc>,
    last_disconnect_reason: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Initializing,
            pending: None,
            identity: None,
            updated_at: Utc::now(),
            last_disconnect_reason: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            pending: self.pending.clone(),
            identity: self.identity.clone(),
            updated_at: self.updated_at,
            last_disconnect_reason: self.last_disconnect_reason.clone(),
        }
    }

    /// Apply a lifecycle event. Returns true if the session died and must be
    /// replaced.
    pub fn apply(&mut self, event: &LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::CredentialReady(qr) => {
                self.set(SessionStatus::CredentialPending);
                self.pending = Some(PendingCredential::Qr(qr.clone()));
                self.identity = None;
                false
            }
            LifecycleEvent::Authenticated => {
                self.set(SessionStatus::Authenticated);
                self.pending = None;
                false
            }
            LifecycleEvent::Ready(identity) => {
                self.set(SessionStatus::Ready);
                self.pending = None;
                self.identity = Some(identity.clone());
                false
            }
            LifecycleEvent::AuthFailed(_) => {
                self.set(SessionStatus::AuthFailed);
                self.pending = None;
                self.identity = None;
                false
            }
            LifecycleEvent::Disconnected(reason) => {
                self.mark_disconnected(reason);
                true
            }
        }
    }

    /// A fresh session instance is starting.
    pub fn reset(&mut self) {
        self.set(SessionStatus::Initializing);
        self.pending = None;
        self.identity = None;
    }

    pub fn mark_disconnected(&mut self, reason: &str) {
        self.set(SessionStatus::Disconnected);
        self.pending = None;
        self.identity = None;
        self.last_disconnect_reason = Some(reason.to_string());
    }

    /// Record a pairing code. Ignored unless a credential is still pending.
    pub fn set_pairing_code(&mut self, code: &str) -> bool {
        if self.status != SessionStatus::CredentialPending {
            return false;
        }
        self.pending = Some(PendingCredential::PairingCode(code.to_string()));
        self.updated_at = Utc::now();
        true
    }

    fn set(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
