//! Session manager - owns the one live transport and keeps it alive.
//!
//! All state lives behind a single mutex that is never held across a
//! transport call. Lifecycle events from the transport are consumed by one
//! loop and applied through `SessionState::apply`. When a session dies, a
//! reconnect task tears it down, waits the backoff delay and creates the next
//! instance; at most one such task runs at a time.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::SessionError;
use super::state::{SessionSnapshot, SessionState, SessionStatus};
use super::transport::{EventSink, InboundMessage, LifecycleEvent, Transport, TransportFactory};
use crate::phone;

/// Session manager settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Country calling code used when normalizing phone numbers.
    pub country_code: String,
    /// Delay between losing a session and creating the next one.
    pub reconnect_delay: Duration,
    /// Upper bound for pairing, send, logout and contact lookups.
    pub transport_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            country_code: "90".to_string(),
            reconnect_delay: Duration::from_secs(5),
            transport_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Handle to the session. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    shared: Mutex<Shared>,
    lifecycle_tx: mpsc::UnboundedSender<(u64, LifecycleEvent)>,
    messages_tx: mpsc::UnboundedSender<(u64, InboundMessage)>,
}

#[derive(Clone)]
struct ActiveSession {
    generation: u64,
    transport: Arc<dyn Transport>,
}

struct Shared {
    state: SessionState,
    active: Option<ActiveSession>,
    /// Detached instances waiting for the reconnect task to shut them down.
    retired: Vec<ActiveSession>,
    generation: u64,
    /// A reconnect task is scheduled or running.
    reconnecting: bool,
    /// Another session died while the reconnect task was running.
    rerun: bool,
    shutting_down: bool,
}

impl SessionManager {
    /// Create the manager and start consuming lifecycle events. Inbound
    /// messages from the live session instance arrive on the returned receiver.
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config,
            factory,
            shared: Mutex::new(Shared {
                state: SessionState::new(),
                active: None,
                retired: Vec::new(),
                generation: 0,
                reconnecting: false,
                rerun: false,
                shutting_down: false,
            }),
            lifecycle_tx,
            messages_tx,
        });

        tokio::spawn(lifecycle_loop(Arc::downgrade(&inner), lifecycle_rx));
        tokio::spawn(message_loop(Arc::downgrade(&inner), messages_rx, inbound_tx));

        (Self { inner }, inbound_rx)
    }

    /// Create the first session instance in the background.
    pub async fn start(&self) {
        let mut shared = self.inner.shared.lock().await;
        schedule_reconnect(&self.inner, &mut shared, Duration::ZERO);
    }

    /// Current status, pending credential and identity.
    pub async fn status(&self) -> SessionSnapshot {
        self.inner.shared.lock().await.state.snapshot()
    }

    /// Ask the network for a pairing code for `raw_phone`.
    pub async fn request_pairing_code(&self, raw_phone: &str) -> Result<String, SessionError> {
        let phone = phone::normalize(raw_phone, &self.inner.config.country_code)?;

        let active = {
            let shared = self.inner.shared.lock().await;
            if shared.state.status() == SessionStatus::Ready {
                return Err(SessionError::AlreadyConnected);
            }
            active_session(&shared)?
        };

        info!("🔑 Requesting pairing code for {}", phone);
        let code = self.call(active.transport.request_pairing_code(&phone)).await?;

        let mut shared = self.inner.shared.lock().await;
        if shared.active.as_ref().map(|a| a.generation) == Some(active.generation) {
            shared.state.set_pairing_code(&code);
        }
        Ok(code)
    }

    /// Send `body` to a user-entered phone number.
    pub async fn send_message(&self, raw_phone: &str, body: &str) -> Result<(), SessionError> {
        let phone = phone::normalize(raw_phone, &self.inner.config.country_code)?;
        self.send_to(&phone::chat_id(&phone), body).await
    }

    /// Send `body` to an address that is already in transport form.
    pub async fn send_to(&self, chat_id: &str, body: &str) -> Result<(), SessionError> {
        if body.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let active = {
            let shared = self.inner.shared.lock().await;
            active_session(&shared)?
        };
        debug!("Sending {} chars to {}", body.chars().count(), chat_id);
        self.call(active.transport.send_message(chat_id, body)).await
    }

    /// Display name for a chat address.
    pub async fn contact_name(&self, chat_id: &str) -> Result<Option<String>, SessionError> {
        let active = {
            let shared = self.inner.shared.lock().await;
            active_session(&shared)?
        };
        self.call(active.transport.contact_name(chat_id)).await
    }

    /// Log out of the network. The local session is torn down and replaced
    /// whether or not the remote call succeeds.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let active = {
            let shared = self.inner.shared.lock().await;
            active_session(&shared)
        };

        let logged_out = active.as_ref().ok().map(|a| a.generation);
        let result = match active {
            Ok(active) => {
                info!("👋 Logging out session #{}", active.generation);
                self.call(active.transport.logout()).await
            }
            Err(e) => Err(e),
        };
        if let Err(ref e) = result {
            warn!("Logout failed: {}", e);
        }

        let mut shared = self.inner.shared.lock().await;
        // A replacement created while the call was in flight is left alone.
        if shared.active.as_ref().map(|a| a.generation) == logged_out {
            shared.state.mark_disconnected("logout");
            schedule_reconnect(&self.inner, &mut shared, self.inner.config.reconnect_delay);
        }
        result
    }

    /// Tear down the live session for process exit. No reconnect follows.
    pub async fn shutdown(&self) {
        let sessions = {
            let mut shared = self.inner.shared.lock().await;
            shared.shutting_down = true;
            let mut sessions = std::mem::take(&mut shared.retired);
            sessions.extend(shared.active.take());
            sessions
        };
        for session in sessions {
            info!("Shutting down session #{}", session.generation);
            session.transport.shutdown().await;
        }
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, String>>,
    ) -> Result<T, SessionError> {
        match self.inner.config.transport_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result.map_err(SessionError::Transport),
                Err(_) => Err(SessionError::Transport(format!(
                    "transport call timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => fut.await.map_err(SessionError::Transport),
        }
    }
}

fn active_session(shared: &Shared) -> Result<ActiveSession, SessionError> {
    shared
        .active
        .clone()
        .ok_or_else(|| SessionError::Transport("session is not initialized".to_string()))
}

/// Detach the live session and make sure exactly one reconnect task will
/// replace it. Called with the state lock held.
fn schedule_reconnect(inner: &Arc<Inner>, shared: &mut Shared, delay: Duration) {
    let detached = shared.active.take();
    let replaced = detached.is_some();
    shared.retired.extend(detached);
    if shared.shutting_down {
        return;
    }
    if shared.reconnecting {
        // With nothing detached the task in flight already covers this request.
        if replaced {
            debug!("Reconnect already in flight, folding request into it");
            shared.rerun = true;
        }
        return;
    }
    shared.reconnecting = true;
    tokio::spawn(reconnect_task(inner.clone(), delay));
}

async fn reconnect_task(inner: Arc<Inner>, first_delay: Duration) {
    let mut delay = first_delay;
    loop {
        let retired = std::mem::take(&mut inner.shared.lock().await.retired);
        for session in retired {
            debug!("Tearing down session #{}", session.generation);
            session.transport.shutdown().await;
        }

        if !delay.is_zero() {
            info!("⏳ Reinitializing in {}ms", delay.as_millis());
            sleep(delay).await;
        }
        delay = inner.config.reconnect_delay;

        let outcome = initialize_next(&inner).await;

        let mut shared = inner.shared.lock().await;
        if shared.shutting_down {
            shared.reconnecting = false;
            return;
        }
        match outcome {
            Ok(generation) if !shared.rerun => {
                debug!("Session #{} initialized", generation);
                shared.reconnecting = false;
                return;
            }
            Ok(generation) => {
                info!("Session #{} died during initialization, retrying", generation);
                let active = shared.active.take();
                shared.retired.extend(active);
                shared.rerun = false;
            }
            Err((generation, e)) => {
                error!("❌ Session #{} failed to initialize: {}", generation, e);
                if shared.active.as_ref().map(|a| a.generation) == Some(generation) {
                    let active = shared.active.take();
                    shared.retired.extend(active);
                }
                shared.state.mark_disconnected(&e);
                shared.rerun = false;
            }
        }
    }
}

/// Create the next transport instance and initialize it.
async fn initialize_next(inner: &Arc<Inner>) -> Result<u64, (u64, String)> {
    let (generation, transport) = {
        let mut shared = inner.shared.lock().await;
        shared.generation += 1;
        let generation = shared.generation;

        let sink = EventSink::new(
            generation,
            inner.lifecycle_tx.clone(),
            inner.messages_tx.clone(),
        );
        let transport = inner.factory.create(sink).map_err(|e| (generation, e))?;

        shared.active = Some(ActiveSession {
            generation,
            transport: transport.clone(),
        });
        shared.state.reset();
        (generation, transport)
    };

    info!("🔄 Initializing session #{}", generation);
    transport.initialize().await.map_err(|e| (generation, e))?;
    Ok(generation)
}

async fn lifecycle_loop(
    inner: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<(u64, LifecycleEvent)>,
) {
    while let Some((generation, event)) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        handle_lifecycle(&inner, generation, event).await;
    }
}

/// Forward messages from the live instance; anything a retired one still
/// delivers is dropped.
async fn message_loop(
    inner: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<(u64, InboundMessage)>,
    tx: mpsc::UnboundedSender<InboundMessage>,
) {
    while let Some((generation, message)) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let live = inner.shared.lock().await.active.as_ref().map(|a| a.generation);
        if live != Some(generation) {
            debug!("Dropping message from retired session #{}", generation);
            continue;
        }
        if tx.send(message).is_err() {
            break;
        }
    }
}

async fn handle_lifecycle(inner: &Arc<Inner>, generation: u64, event: LifecycleEvent) {
    let mut shared = inner.shared.lock().await;
    if shared.active.as_ref().map(|a| a.generation) != Some(generation) {
        debug!("Ignoring {:?} from retired session #{}", event, generation);
        return;
    }

    match &event {
        LifecycleEvent::CredentialReady(_) => info!("📱 QR code received"),
        LifecycleEvent::Authenticated => info!("🔐 Authenticated"),
        LifecycleEvent::Ready(identity) => info!("✅ Session ready as {}", identity.number),
        LifecycleEvent::AuthFailed(msg) => error!("❌ Auth failure: {}", msg),
        LifecycleEvent::Disconnected(reason) => warn!("🔌 Disconnected: {}", reason),
    }

    if shared.state.apply(&event) {
        schedule_reconnect(inner, &mut shared, inner.config.reconnect_delay);
    }
}
