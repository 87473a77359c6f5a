//! Conversation List Builder
//!
//! Full rebuild of the ordered conversation list from the sidebar root. The
//! sidebar holds tens of rows, so there is no incremental bookkeeping.

use crate::conversation::{Conversation, ConversationExtractor};
use crate::queries::StructuralQueries;
use crate::tree::DocumentTree;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the ordered conversation list
#[derive(Debug, Clone)]
pub struct ConversationListBuilder {
    queries: Arc<StructuralQueries>,
    extractor: ConversationExtractor,
}

impl ConversationListBuilder {
    pub fn new(queries: Arc<StructuralQueries>, extractor: ConversationExtractor) -> Self {
        Self { queries, extractor }
    }

    /// Row candidates of a list container
    ///
    /// The host page always appends one trailing element that is not a
    /// conversation, so the last child is dropped.
    pub fn candidate_rows<T: DocumentTree>(&self, tree: &T, container: &T::Node) -> Vec<T::Node> {
        let mut children = tree.element_children(container);
        children.pop();
        children
    }

    /// Build the list under `root`
    ///
    /// A missing root or list container gives an empty list.
    pub async fn build<T: DocumentTree>(
        &self,
        tree: &T,
        root: Option<&T::Node>,
    ) -> Vec<Conversation> {
        let Some(root) = root else {
            warn!("Sidebar root not found, conversation list is empty");
            return Vec::new();
        };
        let Some(container) = self.queries.conversation_list.query_first(tree, root) else {
            warn!(
                "No conversation list matching '{}' under sidebar root",
                self.queries.conversation_list
            );
            return Vec::new();
        };

        let rows = self.candidate_rows(tree, &container);
        let extracted = join_all(rows.iter().map(|row| self.extractor.extract(tree, row))).await;
        let total = extracted.len();

        let conversations: Vec<Conversation> = extracted
            .into_iter()
            .filter(Conversation::is_valid)
            .collect();

        debug!(
            "Built conversation list: {} conversations from {} candidate rows",
            conversations.len(),
            total
        );
        conversations
    }
}
