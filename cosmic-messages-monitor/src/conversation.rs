//! Conversation Extraction
//!
//! Turns one sidebar row into a [`Conversation`] record and derives the
//! stable [`ConversationIdentity`] used by the notification pipeline.
//!
//! ## Conversation vs. Identity
//!
//! A `Conversation` is positional and ephemeral: it is rebuilt from scratch on
//! every list rebuild and only carries what the sidebar renders. An identity
//! comes from the row's permalink and survives re-renders, so notification
//! deduplication keys on it.

use crate::icon::{IconHandle, IconResolver};
use crate::queries::StructuralQueries;
use crate::tree::DocumentTree;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Modulus of the notification id hash
const ID_HASH_MODULUS: u64 = 2_147_483_647;

/// One sidebar entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Display name, never empty in a published list
    pub label: String,
    pub unread: bool,
    pub icon: IconHandle,
    /// Currently open conversation
    pub selected: bool,
}

impl Conversation {
    /// Check if the row this came from is a real conversation
    pub fn is_valid(&self) -> bool {
        !self.label.is_empty()
    }
}

/// Stable key of a conversation, derived from its permalink
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationIdentity(String);

impl ConversationIdentity {
    pub fn new(permalink: impl Into<String>) -> Self {
        Self(permalink.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric notification id
    ///
    /// Rolling hash over the UTF-16 code units of the permalink:
    /// `hash = (hash * 31 + unit) mod 2147483647`, seeded with 0. The
    /// collaborator uses it to replace an earlier notification for the same
    /// conversation.
    pub fn notification_id(&self) -> u32 {
        let hash = self
            .0
            .encode_utf16()
            .fold(0u64, |hash, unit| (hash * 31 + u64::from(unit)) % ID_HASH_MODULUS);
        // Always below 2^31
        hash as u32
    }
}

impl fmt::Display for ConversationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts conversations from rows
#[derive(Debug, Clone)]
pub struct ConversationExtractor {
    queries: Arc<StructuralQueries>,
    icons: IconResolver,
}

impl ConversationExtractor {
    pub fn new(queries: Arc<StructuralQueries>, icons: IconResolver) -> Self {
        Self { queries, icons }
    }

    /// Extract one row
    ///
    /// An empty label marks the row as not being a conversation; such rows
    /// skip icon resolution and get the empty icon.
    pub async fn extract<T: DocumentTree>(&self, tree: &T, row: &T::Node) -> Conversation {
        let label = self.queries.label(tree, row);
        let unread = self.queries.is_unread(tree, row);
        let selected = self.queries.is_selected(tree, row);

        let icon = if label.is_empty() {
            IconHandle::empty()
        } else {
            self.icons.resolve(tree, row, unread).await
        };

        Conversation {
            label,
            unread,
            icon,
            selected,
        }
    }

    /// Identity of the conversation a row renders, if it has a permalink
    pub fn identity<T: DocumentTree>(
        &self,
        tree: &T,
        row: &T::Node,
    ) -> Option<ConversationIdentity> {
        self.queries.permalink(tree, row).map(ConversationIdentity::new)
    }
}
