//! Conversation Sidebar Monitor
//!
//! Watches the conversation sidebar of a web messaging client, a document the
//! monitor does not own and whose markup changes without notice, and derives
//! three views from its low-level mutations:
//!
//! - the ordered list of conversations, for rendering in a popup
//! - deduplicated desktop notifications for newly unread messages
//! - a debounced unread count for the tray badge
//!
//! ## Architecture
//!
//! ```text
//!  host document ──mutations──┐
//!  focus / visibility ────────┤   MonitorEvent    ┌──────────────────────────┐
//!  reconcile ─────────────────┴──────────────────▶│ Monitor (single task)    │
//!                                    badge timer ▶│  ConversationListBuilder │
//!                                                 │  NotificationDeduplicator│
//!                                                 │  BadgeStabilizer         │
//!                                                 └────────────┬─────────────┘
//!                                                              │ Outbound
//!                                                              ▼
//!                                                         Publisher
//! ```
//!
//! The document is reached through the [`DocumentTree`] capability and every
//! markup assumption lives in the swappable [`SelectorTable`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use cosmic_messages_monitor::{
//!     event_channel, ChannelPublisher, MemoryTree, Monitor, MonitorConfig, PassthroughRenderer,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> cosmic_messages_monitor::Result<()> {
//! let tree = MemoryTree::new();
//! let (publisher, mut outbound) = ChannelPublisher::new();
//! let monitor = Monitor::new(
//!     tree.clone(),
//!     MonitorConfig::default(),
//!     Arc::new(PassthroughRenderer),
//!     Arc::new(publisher),
//! )?;
//!
//! let (handle, events) = event_channel();
//! let task = monitor.spawn(events);
//!
//! handle.reconcile()?;
//! while let Some(message) = outbound.recv().await {
//!     println!("{}", serde_json::to_string(&message)?);
//! #   break;
//! }
//!
//! handle.shutdown()?;
//! let _stats = task.await;
//! # Ok(())
//! # }
//! ```

pub mod badge;
pub mod config;
pub mod conversation;
pub mod conversation_list;
pub mod dedup;
pub mod error;
pub mod icon;
pub mod monitor;
pub mod publish;
pub mod queries;
pub mod selector;
pub mod tree;

pub use badge::{BadgeStabilizer, BadgeState, BadgeTransition};
pub use config::{IconConfig, MonitorConfig, NotificationConfig, TimingConfig};
pub use conversation::{Conversation, ConversationExtractor, ConversationIdentity};
pub use conversation_list::ConversationListBuilder;
pub use dedup::{DedupOutcome, NotificationDeduplicator, NotificationEvent, NotificationState};
pub use error::{MonitorError, Result};
pub use icon::{
    IconHandle, IconRenderer, IconResolver, PassthroughRenderer, READ_ICON_ATTRIBUTE,
    UNREAD_ICON_ATTRIBUTE,
};
pub use monitor::{event_channel, BatchClass, Monitor, MonitorEvent, MonitorHandle, MonitorStats};
pub use publish::{ChannelPublisher, Outbound, Publisher};
pub use queries::{SelectorTable, StructuralQueries, SELECTOR_TABLE_VERSION};
pub use selector::Selector;
pub use tree::{
    wait_for_element, DocumentTree, MemoryTree, MutationBatch, MutationKind, MutationRecord,
    NodeId, NodeSpec,
};
