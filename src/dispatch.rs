//! Inbound dispatcher - answers recognized commands.
//!
//! Every message the session sees comes through here, including the ones it
//! sent itself. Those are dropped first so a reply can never trigger another
//! reply. Each message is handled on its own task so a panic is contained to
//! that message; messages are still handled one after another, in order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::commands::{
    CommandMatch, CommandResolver, CommandTable, ReplyCatalog, normalize_text, render, wants_name,
};
use crate::session::{InboundMessage, SessionError, SessionManager};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Sent by this session.
    OwnMessage,
    /// Nothing matched; ambient chatter.
    Ignored,
    Replied { command: String, reply: String },
}

pub struct Dispatcher {
    session: SessionManager,
    resolver: CommandResolver,
    catalog: ReplyCatalog,
}

impl Dispatcher {
    pub fn new(session: SessionManager, table: CommandTable) -> Self {
        let catalog = ReplyCatalog::from_table(&table);
        Self {
            session,
            resolver: CommandResolver::new(table),
            catalog,
        }
    }

    /// Consume messages until the session manager goes away.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<InboundMessage>) {
        info!(
            "📬 Dispatcher listening ({} commands)",
            self.resolver.table().categories.len()
        );
        while let Some(message) = rx.recv().await {
            let sender = message.sender.clone();
            let this = self.clone();
            match tokio::spawn(async move { this.handle(message).await }).await {
                Ok(Ok(Outcome::Replied { command, .. })) => {
                    info!("💬 Replied to {} ({})", sender, command)
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Failed to answer {}: {}", sender, e),
                Err(e) => error!("Handler for message from {} crashed: {}", sender, e),
            }
        }
        info!("Dispatcher stopped");
    }

    /// Handle one message. At most one reply is sent.
    pub async fn handle(&self, message: InboundMessage) -> Result<Outcome, SessionError> {
        if message.is_self_originated {
            debug!("Skipping own message to {}", message.recipient);
            return Ok(Outcome::OwnMessage);
        }

        let text = normalize_text(&message.body);
        if text.is_empty() {
            return Ok(Outcome::Ignored);
        }

        let preview: String = text.chars().take(50).collect();
        let (command, reply) = match self.resolver.resolve(&text) {
            CommandMatch::Keyword { trigger, reply } => (trigger, reply),
            CommandMatch::None => {
                debug!("No command in \"{}\" from {}", preview, message.sender);
                return Ok(Outcome::Ignored);
            }
            CommandMatch::Category { name, score } => {
                info!("📨 {}: \"{}\" → {} ({:.2})", message.sender, preview, name, score);
                let Some(template) = self.catalog.template(&name) else {
                    warn!("No reply configured for command {}", name);
                    return Ok(Outcome::Ignored);
                };
                let sender_name = if wants_name(template) {
                    self.sender_name(&message).await
                } else {
                    None
                };
                let reply = render(template, sender_name.as_deref());
                (name, reply)
            }
        };

        self.session.send_to(&message.sender, &reply).await?;
        Ok(Outcome::Replied { command, reply })
    }

    /// Name to greet the sender with. Lookup failures only cost the
    /// personalization.
    async fn sender_name(&self, message: &InboundMessage) -> Option<String> {
        if let Some(name) = message.sender_name.as_deref().map(str::trim)
            && !name.is_empty()
        {
            return Some(name.to_string());
        }
        match self.session.contact_name(&message.sender).await {
            Ok(name) => name.filter(|n| !n.trim().is_empty()),
            Err(e) => {
                warn!("Contact lookup for {} failed: {}", message.sender, e);
                None
            }
        }
    }
}
