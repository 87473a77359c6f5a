//! Document Tree Capability
//!
//! The monitor never owns the document it watches. It sees the host page
//! through the [`DocumentTree`] trait: a handful of primitive accessors
//! (parent, children, tag, attributes, text) from which every structural
//! query is derived. Mutation observation is modelled by [`MutationRecord`]
//! and [`MutationBatch`], mirroring what a DOM mutation observer delivers.
//!
//! ## Implementations
//!
//! - [`MemoryTree`]: thread-safe in-memory tree used by tests and the replay
//!   tool. Its mutators return the mutation record they caused.
//!
//! ## Deferred Lookup
//!
//! The sidebar may not exist yet when the monitor starts. [`wait_for_element`]
//! polls a selector until it matches or a timeout elapses.

mod memory;

pub use memory::{MemoryTree, NodeId, NodeSpec};

use crate::selector::Selector;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Read access to an externally owned, externally mutated document
///
/// Implementations are handles: methods take `&self`, and
/// [`set_attribute`](DocumentTree::set_attribute) relies on interior
/// mutability. A node handle stays valid after the node is detached; it
/// simply has no parent anymore.
pub trait DocumentTree: Send + Sync {
    /// Node handle
    type Node: Clone + Eq + Hash + Debug + Send + Sync;

    /// The document node (root of the tree)
    fn document(&self) -> Self::Node;

    /// Parent of `node`, `None` for the document and for detached nodes
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    /// All child nodes (elements and text) in document order
    fn children(&self, node: &Self::Node) -> Vec<Self::Node>;

    /// Tag name for elements, `None` for text nodes
    fn tag(&self, node: &Self::Node) -> Option<String>;

    /// Attribute value of an element
    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    /// Set an attribute on an element (used for the per-row icon cache)
    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str);

    /// Text of a text node, `None` for elements
    fn own_text(&self, node: &Self::Node) -> Option<String>;

    /// Check if `node` is an element
    fn is_element(&self, node: &Self::Node) -> bool {
        self.tag(node).is_some()
    }

    /// Element children of `node` in document order
    fn element_children(&self, node: &Self::Node) -> Vec<Self::Node> {
        self.children(node)
            .into_iter()
            .filter(|child| self.is_element(child))
            .collect()
    }

    /// All descendants of `node` in document (pre-)order, excluding `node`
    fn descendants(&self, node: &Self::Node) -> Vec<Self::Node> {
        let mut result = Vec::new();
        let mut stack: Vec<Self::Node> = self.children(node).into_iter().rev().collect();
        while let Some(current) = stack.pop() {
            stack.extend(self.children(&current).into_iter().rev());
            result.push(current);
        }
        result
    }

    /// Concatenated text of all descendant text nodes
    fn text_content(&self, node: &Self::Node) -> String {
        if let Some(text) = self.own_text(node) {
            return text;
        }
        self.descendants(node)
            .iter()
            .filter_map(|descendant| self.own_text(descendant))
            .collect()
    }

    /// Check if `node` is `ancestor` or lies beneath it
    fn contains(&self, ancestor: &Self::Node, node: &Self::Node) -> bool {
        let mut current = Some(node.clone());
        while let Some(candidate) = current {
            if &candidate == ancestor {
                return true;
            }
            current = self.parent(&candidate);
        }
        false
    }

    /// Check if `node` is still connected to the document
    fn is_attached(&self, node: &Self::Node) -> bool {
        self.contains(&self.document(), node)
    }
}

/// What a mutation record describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    /// Children were added to or removed from `target`
    ChildList,
    /// An attribute of `target` changed
    Attributes { name: Option<String> },
    /// The text of the text node `target` changed
    CharacterData,
}

/// One low-level change reported by the host document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord<N> {
    pub kind: MutationKind,
    pub target: N,
    pub added_nodes: Vec<N>,
    pub removed_nodes: Vec<N>,
}

impl<N> MutationRecord<N> {
    /// Child list change on `target`
    pub fn child_list(target: N, added_nodes: Vec<N>, removed_nodes: Vec<N>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            added_nodes,
            removed_nodes,
        }
    }

    /// Attribute change on `target`
    pub fn attributes(target: N, name: impl Into<String>) -> Self {
        Self {
            kind: MutationKind::Attributes {
                name: Some(name.into()),
            },
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
        }
    }

    /// Text change on the text node `target`
    pub fn character_data(target: N) -> Self {
        Self {
            kind: MutationKind::CharacterData,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
        }
    }

    /// Check if this is a child list change
    pub fn is_child_list(&self) -> bool {
        self.kind == MutationKind::ChildList
    }

    /// Name of the changed attribute, if this is an attribute change
    pub fn attribute_name(&self) -> Option<&str> {
        match &self.kind {
            MutationKind::Attributes { name } => name.as_deref(),
            _ => None,
        }
    }
}

/// Records delivered together, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch<N> {
    records: Vec<MutationRecord<N>>,
}

impl<N> Default for MutationBatch<N> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<N> MutationBatch<N> {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record (records are kept in arrival order)
    pub fn push(&mut self, record: MutationRecord<N>) {
        self.records.push(record);
    }

    /// Records in arrival order
    pub fn records(&self) -> &[MutationRecord<N>] {
        &self.records
    }

    /// Records with the most recently arrived first
    pub fn newest_first(&self) -> impl Iterator<Item = &MutationRecord<N>> {
        self.records.iter().rev()
    }

    /// Keep only the records matching `keep`
    pub fn retain(&mut self, keep: impl FnMut(&MutationRecord<N>) -> bool) {
        self.records.retain(keep);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<N> From<Vec<MutationRecord<N>>> for MutationBatch<N> {
    fn from(records: Vec<MutationRecord<N>>) -> Self {
        Self { records }
    }
}

/// Wait until `selector` matches somewhere in the document
///
/// Polls every `poll_interval` until `timeout` elapses. Returns `None` if the
/// element never appeared; callers treat that as structural absence.
pub async fn wait_for_element<T: DocumentTree>(
    tree: &T,
    selector: &Selector,
    poll_interval: Duration,
    timeout: Duration,
) -> Option<T::Node> {
    let deadline = Instant::now() + timeout;
    let document = tree.document();

    loop {
        if let Some(node) = selector.query_first(tree, &document) {
            return Some(node);
        }
        if Instant::now() >= deadline {
            debug!("Gave up waiting for '{}' after {:?}", selector, timeout);
            return None;
        }
        sleep(poll_interval).await;
    }
}
