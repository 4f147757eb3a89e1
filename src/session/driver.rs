//! Driver transport - relays to an external protocol driver process.
//!
//! The driver (for example a small Node script wrapping a browser-based
//! client) is spawned once per session instance and speaks newline-delimited
//! JSON over stdio:
//!
//! - requests: `{"id": 7, "method": "sendMessage", "params": {...}}`
//! - responses: `{"id": 7, "result": ...}` or `{"id": 7, "error": "..."}`
//! - events: `{"event": "qr", "qr": "..."}`, `{"event": "message", ...}`
//!
//! The driver exiting (stdout EOF) is reported as a disconnect.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::Identity;
use super::transport::{EventSink, InboundMessage, LifecycleEvent, Transport, TransportFactory};
use crate::phone;

/// How long `shutdown` waits for the driver to acknowledge `destroy`.
const DESTROY_TIMEOUT: Duration = Duration::from_secs(3);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;
type Response = oneshot::Receiver<Result<Value, String>>;

/// Command line for the driver process.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub command: String,
    pub args: Vec<String>,
}

/// Spawns one driver process per session instance.
pub struct DriverFactory {
    config: DriverConfig,
}

impl DriverFactory {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for DriverFactory {
    fn create(&self, events: EventSink) -> Result<Arc<dyn Transport>, String> {
        info!(
            "🚀 Spawning driver for session #{}: {} {}",
            events.generation(),
            self.config.command,
            self.config.args.join(" ")
        );

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to spawn driver '{}': {e}", self.config.command))?;

        let stdin = child.stdin.take().ok_or("Driver stdin unavailable")?;
        let stdout = child.stdout.take().ok_or("Driver stdout unavailable")?;

        let transport = DriverTransport::from_pipes(stdin, stdout, events).with_child(child);
        Ok(Arc::new(transport))
    }
}

/// Transport backed by a driver speaking the line protocol.
pub struct DriverTransport {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl DriverTransport {
    /// Wire a transport to the driver's stdin (`writer`) and stdout (`reader`).
    pub fn from_pipes<W, R>(writer: W, reader: R, events: EventSink) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(reader, pending.clone(), closed.clone(), events));

        Self {
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
            child: Mutex::new(None),
        }
    }

    /// Kill `child` when this transport shuts down.
    fn with_child(mut self, child: Child) -> Self {
        self.child = Mutex::new(Some(child));
        self
    }

    /// Reserve a response slot for `id`. The reader marks the connection
    /// closed before it takes the lock to fail pending slots, so checking
    /// under the lock never strands a slot.
    async fn register(&self, id: u64) -> Result<Response, String> {
        let mut pending = self.pending.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err("Driver connection closed".to_string());
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rx = self.register(id).await?;

        let mut line = json!({ "id": id, "method": method, "params": params }).to_string();
        line.push('\n');
        debug!("→ driver {} #{}", method, id);

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(format!("Failed to write to driver: {e}"));
        }

        rx.await
            .map_err(|_| "Driver connection closed".to_string())?
    }
}

#[async_trait]
impl Transport for DriverTransport {
    async fn initialize(&self) -> Result<(), String> {
        self.request("initialize", json!({})).await.map(|_| ())
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String, String> {
        let result = self.request("requestPairingCode", json!({ "phone": phone })).await?;
        match result {
            Value::String(code) => Ok(code),
            other => Err(format!("Unexpected pairing code response: {other}")),
        }
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<(), String> {
        self.request("sendMessage", json!({ "chatId": chat_id, "body": body }))
            .await
            .map(|_| ())
    }

    async fn logout(&self) -> Result<(), String> {
        self.request("logout", json!({})).await.map(|_| ())
    }

    async fn contact_name(&self, chat_id: &str) -> Result<Option<String>, String> {
        let result = self.request("getContactName", json!({ "chatId": chat_id })).await?;
        Ok(result.as_str().map(str::to_string))
    }

    async fn shutdown(&self) {
        if !self.closed.load(Ordering::SeqCst) {
            match tokio::time::timeout(DESTROY_TIMEOUT, self.request("destroy", json!({}))).await {
                Ok(Ok(_)) => debug!("Driver destroyed session"),
                Ok(Err(e)) => debug!("Driver destroy failed: {}", e),
                Err(_) => warn!("Driver did not acknowledge destroy"),
            }
        }
        self.closed.store(true, Ordering::SeqCst);
        self.reader.abort();
        self.pending.lock().await.clear();

        if let Some(mut child) = self.child.lock().await.take()
            && let Err(e) = child.kill().await
        {
            debug!("Driver already gone: {}", e);
        }
    }
}

impl Drop for DriverTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// One line from the driver.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DriverLine {
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event(DriverEvent),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DriverEvent {
    Qr {
        qr: String,
    },
    Authenticated,
    Ready {
        number: String,
        #[serde(default)]
        name: Option<String>,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Message {
        from: String,
        #[serde(default)]
        to: String,
        #[serde(rename = "fromMe", default)]
        from_me: bool,
        #[serde(default)]
        body: String,
        #[serde(rename = "notifyName", default)]
        notify_name: Option<String>,
    },
    #[serde(other)]
    Other,
}

async fn read_loop<R>(reader: R, pending: Pending, closed: Arc<AtomicBool>, events: EventSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(&line, &pending, &events).await,
            Ok(None) => break "driver process exited".to_string(),
            Err(e) => break format!("driver read error: {e}"),
        }
    };

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every in-flight request.
    pending.lock().await.clear();
    warn!("Driver for session #{} closed: {}", events.generation(), reason);
    events.lifecycle(LifecycleEvent::Disconnected(reason));
}

async fn handle_line(line: &str, pending: &Pending, events: &EventSink) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let parsed = match serde_json::from_str::<DriverLine>(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            let preview: String = line.chars().take(100).collect();
            warn!("Unparseable driver line ({}): {}", e, preview);
            return;
        }
    };

    match parsed {
        DriverLine::Response { id, result, error } => {
            let Some(tx) = pending.lock().await.remove(&id) else {
                debug!("Response for unknown request #{}", id);
                return;
            };
            let _ = tx.send(match error {
                Some(e) => Err(e),
                None => Ok(result),
            });
        }
        DriverLine::Event(event) => match event {
            DriverEvent::Qr { qr } => events.lifecycle(LifecycleEvent::CredentialReady(qr)),
            DriverEvent::Authenticated => events.lifecycle(LifecycleEvent::Authenticated),
            DriverEvent::Ready { number, name } => {
                let number = phone::number_of(&number).to_string();
                events.lifecycle(LifecycleEvent::Ready(Identity { number, name }))
            }
            DriverEvent::AuthFailure { message } => {
                events.lifecycle(LifecycleEvent::AuthFailed(message))
            }
            DriverEvent::Disconnected { reason } => {
                events.lifecycle(LifecycleEvent::Disconnected(reason))
            }
            DriverEvent::Message {
                from,
                to,
                from_me,
                body,
                notify_name,
            } => events.message(InboundMessage {
                sender: from,
                recipient: to,
                is_self_originated: from_me,
                body,
                sender_name: notify_name,
            }),
            DriverEvent::Other => debug!("Ignoring driver event: {}", line),
        },
    }
}
