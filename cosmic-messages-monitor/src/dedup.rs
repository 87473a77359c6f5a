//! Notification Deduplication
//!
//! Decides, per mutation batch, which unread conversations deserve a desktop
//! notification. The host page re-renders rows constantly without anything
//! new having arrived, and it exposes no message ids or timestamps in the
//! sidebar. The only usable signal is content: a notification fires when an
//! unread row's preview text differs from what was last notified for the
//! same conversation.
//!
//! ## Per-Batch Algorithm
//!
//! Records are walked newest first. Each record is resolved to its enclosing
//! row, which must sit inside the conversations grid and carry a permalink.
//! Every identity is handled once per batch (the newest record wins), and only
//! unread rows with a title and a cached icon are considered.

use crate::conversation::ConversationIdentity;
use crate::icon::{IconHandle, IconResolver};
use crate::queries::StructuralQueries;
use crate::tree::{DocumentTree, MutationBatch, MutationRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Last notified body per conversation
///
/// An entry exists only once a notification has fired for that identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationState {
    last_notified: HashMap<ConversationIdentity, String>,
}

impl NotificationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Body last notified for `identity`
    pub fn last_body(&self, identity: &ConversationIdentity) -> Option<&str> {
        self.last_notified.get(identity).map(String::as_str)
    }

    /// Record a fired notification
    pub fn record(&mut self, identity: ConversationIdentity, body: String) {
        self.last_notified.insert(identity, body);
    }

    /// Forget everything (the user is caught up)
    pub fn clear(&mut self) {
        self.last_notified.clear();
    }

    pub fn len(&self) -> usize {
        self.last_notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_notified.is_empty()
    }
}

/// Notification request for the collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Derived from the conversation identity
    pub id: u32,
    pub title: String,
    pub body: String,
    pub icon: IconHandle,
    pub silent: bool,
}

/// Result of one deduplication pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Notifications to publish, in processing order
    pub events: Vec<NotificationEvent>,
    /// Unread rows whose content matched the last notification
    pub suppressed: usize,
}

/// Per-batch notification deduplicator
#[derive(Debug, Clone)]
pub struct NotificationDeduplicator {
    queries: Arc<StructuralQueries>,
    placeholder_body: String,
    silent: bool,
}

impl NotificationDeduplicator {
    pub fn new(
        queries: Arc<StructuralQueries>,
        placeholder_body: impl Into<String>,
        silent: bool,
    ) -> Self {
        Self {
            queries,
            placeholder_body: placeholder_body.into(),
            silent,
        }
    }

    /// Row a mutation record belongs to
    ///
    /// Child list changes start at the target itself; attribute and text
    /// changes start at its parent. If no ancestor is a row, an added node
    /// that is itself a row is used (a row moved to the top of the list).
    /// Rows outside the conversations grid are rejected.
    pub fn resolve_row<T: DocumentTree>(
        &self,
        tree: &T,
        record: &MutationRecord<T::Node>,
    ) -> Option<T::Node> {
        let start = if record.is_child_list() {
            Some(record.target.clone())
        } else {
            tree.parent(&record.target)
        };

        let row = start
            .and_then(|node| self.queries.row.closest(tree, &node))
            .or_else(|| {
                record
                    .added_nodes
                    .iter()
                    .find(|node| self.queries.row.matches(tree, node))
                    .cloned()
            })?;

        if self.queries.grid.closest(tree, &row).is_none() {
            trace!("Row {:?} is outside the conversations grid", row);
            return None;
        }
        Some(row)
    }

    /// Run one batch against the notification state
    pub fn process_batch<T: DocumentTree>(
        &self,
        tree: &T,
        batch: &MutationBatch<T::Node>,
        state: &mut NotificationState,
    ) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();
        let mut seen: HashSet<ConversationIdentity> = HashSet::new();

        for record in batch.newest_first() {
            let Some(row) = self.resolve_row(tree, record) else {
                continue;
            };
            let Some(permalink) = self.queries.permalink(tree, &row) else {
                trace!("Row {:?} has no permalink", row);
                continue;
            };
            let identity = ConversationIdentity::new(permalink);
            if !seen.insert(identity.clone()) {
                continue;
            }
            if !self.queries.is_unread(tree, &row) {
                continue;
            }

            let icon = IconResolver::cached(tree, &row, true)
                .or_else(|| IconResolver::cached(tree, &row, false));
            let title = self
                .queries
                .slot_text(tree, &row, self.queries.title_slot_index)
                .filter(|title| !title.is_empty());
            let (Some(icon), Some(title)) = (icon, title) else {
                debug!("Unread row {} has no title or icon yet, skipping", identity);
                continue;
            };
            let body = self
                .queries
                .slot_text(tree, &row, self.queries.body_slot_index)
                .unwrap_or_default();

            if state.last_body(&identity) == Some(body.as_str()) {
                debug!("Suppressing duplicate notification for {}", identity);
                outcome.suppressed += 1;
                continue;
            }

            state.record(identity.clone(), body.clone());
            let body = if body.is_empty() {
                self.placeholder_body.clone()
            } else {
                body
            };
            outcome.events.push(NotificationEvent {
                id: identity.notification_id(),
                title,
                body,
                icon,
                silent: self.silent,
            });
        }

        outcome
    }
}
