//! Outbound Messages
//!
//! Everything the monitor tells the host process goes through a
//! [`Publisher`] as an [`Outbound`] message. On the wire a message is a JSON
//! object `{ "topic": ..., "payload": ... }`.
//!
//! ## Topics
//!
//! - `conversations`: ordered conversation list after each rebuild
//! - `notification`: one deduplicated notification request
//! - `update-tray-icon`: badge value after each badge evaluation

use crate::conversation::Conversation;
use crate::dedup::NotificationEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Message published to the host process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum Outbound {
    #[serde(rename = "conversations")]
    Conversations(Vec<Conversation>),

    #[serde(rename = "notification")]
    Notification(NotificationEvent),

    #[serde(rename = "update-tray-icon")]
    UpdateTrayIcon(u32),
}

impl Outbound {
    /// Topic name on the wire
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Conversations(_) => "conversations",
            Self::Notification(_) => "notification",
            Self::UpdateTrayIcon(_) => "update-tray-icon",
        }
    }
}

/// Transport to the host process
///
/// Publishing must not block and must not fail the caller.
pub trait Publisher: Send + Sync + std::fmt::Debug {
    fn publish(&self, message: Outbound);
}

/// Publisher forwarding into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, message: Outbound) {
        let topic = message.topic();
        if self.sender.send(message).is_err() {
            warn!("Dropping '{}' message: receiver closed", topic);
        }
    }
}
