use std::time::Duration;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::session::{SessionManager, SessionStatus};

/// Lines kept while the session is not ready; oldest are dropped first.
const MAX_PENDING: usize = 200;
const FLUSH_AT: usize = 50;
const MAX_CHARS: usize = 4000;

/// Log message with priority.
enum LogMessage {
    /// High priority (WARN/ERROR) - send immediately
    Urgent(String),
    /// Low priority (INFO) - batch and send periodically
    Info(String),
}

/// Forwards log lines to an operator's chat through the live session.
pub struct ChatLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl ChatLogLayer {
    pub fn new(session: SessionManager, chat_id: String) -> Self {
        Self::with_interval(session, chat_id, Duration::from_secs(5))
    }

    pub fn with_interval(session: SessionManager, chat_id: String, interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                if is_ready(&session).await {
                                    flush_buffer(&session, &chat_id, &mut buffer).await;
                                    send_log(&session, &chat_id, &text).await;
                                } else {
                                    push_bounded(&mut buffer, text);
                                }
                            }
                            Some(LogMessage::Info(text)) => {
                                push_bounded(&mut buffer, text);
                                if buffer.len() >= FLUSH_AT && is_ready(&session).await {
                                    flush_buffer(&session, &chat_id, &mut buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        if !buffer.is_empty() && is_ready(&session).await {
                            flush_buffer(&session, &chat_id, &mut buffer).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn is_ready(session: &SessionManager) -> bool {
    session.status().await.status == SessionStatus::Ready
}

fn push_bounded(buffer: &mut Vec<String>, text: String) {
    if buffer.len() >= MAX_PENDING {
        buffer.remove(0);
    }
    buffer.push(text);
}

async fn send_log(session: &SessionManager, chat_id: &str, text: &str) {
    let text = if text.chars().count() > MAX_CHARS {
        let truncated: String = text.chars().take(MAX_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    };
    // eprintln, not tracing: a failed send must not produce another log line to send.
    if let Err(e) = session.send_to(chat_id, &text).await {
        eprintln!("Failed to forward log to {chat_id}: {e}");
    }
}

async fn flush_buffer(session: &SessionManager, chat_id: &str, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(session, chat_id, &combined).await;
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for ChatLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();

        // Only forward INFO, WARN, ERROR to the chat
        if level > Level::INFO {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        // Add emoji prefix for WARN/ERROR levels
        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
