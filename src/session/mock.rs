//! In-memory transport for tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{EventSink, InboundMessage, LifecycleEvent, Transport, TransportFactory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Initialize,
    PairingCode(String),
    Send { chat_id: String, body: String },
    Logout,
    ContactName(String),
    Shutdown,
}

/// Knobs shared by every transport a factory creates.
#[derive(Default)]
pub(crate) struct Behavior {
    pub fail_init: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_logout: AtomicBool,
    pub fail_contact: AtomicBool,
    /// Panics in the next `send_message`, after the call is recorded.
    pub panic_send: AtomicBool,
    pub init_delay_ms: AtomicU64,
    pub send_delay_ms: AtomicU64,
    pub contact_name: Mutex<Option<String>>,
    active_inits: AtomicUsize,
    pub max_concurrent_inits: AtomicUsize,
}

pub(crate) struct MockTransport {
    pub generation: u64,
    sink: EventSink,
    behavior: Arc<Behavior>,
    pub calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn emit(&self, event: LifecycleEvent) {
        self.sink.lifecycle(event);
    }

    pub fn deliver(&self, message: InboundMessage) {
        self.sink.message(message);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn initialize(&self) -> Result<(), String> {
        self.record(Call::Initialize);
        let running = self.behavior.active_inits.fetch_add(1, Ordering::SeqCst) + 1;
        self.behavior.max_concurrent_inits.fetch_max(running, Ordering::SeqCst);

        let delay = self.behavior.init_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.behavior.active_inits.fetch_sub(1, Ordering::SeqCst);

        if self.behavior.fail_init.load(Ordering::SeqCst) {
            return Err("browser failed to launch".to_string());
        }
        Ok(())
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String, String> {
        self.record(Call::PairingCode(phone.to_string()));
        Ok("ABCD-1234".to_string())
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<(), String> {
        self.record(Call::Send {
            chat_id: chat_id.to_string(),
            body: body.to_string(),
        });
        let delay = self.behavior.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.behavior.panic_send.swap(false, Ordering::SeqCst) {
            panic!("driver state corrupted");
        }
        if self.behavior.fail_send.load(Ordering::SeqCst) {
            return Err("Evaluation failed: chat not found".to_string());
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), String> {
        self.record(Call::Logout);
        if self.behavior.fail_logout.load(Ordering::SeqCst) {
            return Err("Protocol error: target closed".to_string());
        }
        Ok(())
    }

    async fn contact_name(&self, chat_id: &str) -> Result<Option<String>, String> {
        self.record(Call::ContactName(chat_id.to_string()));
        if self.behavior.fail_contact.load(Ordering::SeqCst) {
            return Err("contact lookup failed".to_string());
        }
        Ok(self.behavior.contact_name.lock().unwrap().clone())
    }

    async fn shutdown(&self) {
        self.record(Call::Shutdown);
    }
}

#[derive(Default)]
pub(crate) struct MockFactory {
    pub behavior: Arc<Behavior>,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created yet")
    }

    /// Every call made on any instance, in creation order.
    pub fn all_calls(&self) -> Vec<Call> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .flat_map(|t| t.calls())
            .collect()
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, events: EventSink) -> Result<Arc<dyn Transport>, String> {
        let transport = Arc::new(MockTransport {
            generation: events.generation(),
            sink: events,
            behavior: self.behavior.clone(),
            calls: Mutex::new(Vec::new()),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

/// Poll `condition` until it holds, panicking after about two seconds.
pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
