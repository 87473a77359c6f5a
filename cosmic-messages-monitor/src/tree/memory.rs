//! In-memory document tree
//!
//! A cloneable handle over an arena of nodes behind an `RwLock`. Clones share
//! the same document, so a test (or the replay tool) can mutate the tree while
//! a monitor task reads it.

use super::{DocumentTree, MutationRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Handle to a node of a [`MemoryTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Arena {
    nodes: Vec<NodeData>,
}

impl Arena {
    fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.0)
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.node_mut(id)?.parent.take()?;
        if let Some(parent_data) = self.node_mut(parent) {
            parent_data.children.retain(|child| *child != id);
        }
        Some(parent)
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).and_then(|data| data.parent);
        }
        false
    }
}

/// Serializable description of a subtree
///
/// ```rust
/// use cosmic_messages_monitor::NodeSpec;
///
/// let row = NodeSpec::element("div")
///     .attr("role", "row")
///     .child(NodeSpec::element("span").text_child("Alice"));
///
/// let json = serde_json::to_string(&row).unwrap();
/// let parsed: NodeSpec = serde_json::from_str(&json).unwrap();
/// assert_eq!(parsed, row);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Text {
        text: String,
    },
    Element {
        tag: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attrs: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<NodeSpec>,
    },
}

impl NodeSpec {
    /// Element with no attributes or children
    pub fn element(tag: impl Into<String>) -> Self {
        NodeSpec::Element {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Text node
    pub fn text(text: impl Into<String>) -> Self {
        NodeSpec::Text { text: text.into() }
    }

    /// Add an attribute (ignored on text nodes)
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let NodeSpec::Element { attrs, .. } = &mut self {
            attrs.insert(name.into(), value.into());
        }
        self
    }

    /// Append a child (ignored on text nodes)
    pub fn child(mut self, child: NodeSpec) -> Self {
        if let NodeSpec::Element { children, .. } = &mut self {
            children.push(child);
        }
        self
    }

    /// Append a text child
    pub fn text_child(self, text: impl Into<String>) -> Self {
        self.child(NodeSpec::text(text))
    }
}

/// Thread-safe in-memory document
#[derive(Debug, Clone)]
pub struct MemoryTree {
    inner: Arc<RwLock<Arena>>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// Create an empty document
    pub fn new() -> Self {
        let mut arena = Arena { nodes: Vec::new() };
        arena.insert(NodeKind::Element {
            tag: "#document".to_string(),
            attributes: BTreeMap::new(),
        });
        Self {
            inner: Arc::new(RwLock::new(arena)),
        }
    }

    /// Create a tree whose document holds `spec` as its only child
    pub fn from_spec(spec: &NodeSpec) -> Self {
        let tree = Self::new();
        let node = tree.build(spec);
        tree.append_child(&tree.document(), &node);
        tree
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a detached element
    pub fn create_element<K, V>(
        &self,
        tag: impl Into<String>,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> NodeId
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.write().insert(NodeKind::Element {
            tag: tag.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Create a detached text node
    pub fn create_text(&self, text: impl Into<String>) -> NodeId {
        self.write().insert(NodeKind::Text(text.into()))
    }

    /// Build a detached subtree from a spec, returning its root
    pub fn build(&self, spec: &NodeSpec) -> NodeId {
        let mut arena = self.write();
        Self::build_into(&mut arena, spec)
    }

    fn build_into(arena: &mut Arena, spec: &NodeSpec) -> NodeId {
        match spec {
            NodeSpec::Text { text } => arena.insert(NodeKind::Text(text.clone())),
            NodeSpec::Element {
                tag,
                attrs,
                children,
            } => {
                let id = arena.insert(NodeKind::Element {
                    tag: tag.clone(),
                    attributes: attrs.clone(),
                });
                for child in children {
                    let child_id = Self::build_into(arena, child);
                    if let Some(data) = arena.node_mut(child_id) {
                        data.parent = Some(id);
                    }
                    if let Some(data) = arena.node_mut(id) {
                        data.children.push(child_id);
                    }
                }
                id
            }
        }
    }

    /// Append `child` to `parent`, moving it if it is attached elsewhere
    pub fn append_child(&self, parent: &NodeId, child: &NodeId) -> MutationRecord<NodeId> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference` (or at the end)
    ///
    /// Inserting a node into its own subtree is refused and reported as an
    /// empty child list record.
    pub fn insert_before(
        &self,
        parent: &NodeId,
        child: &NodeId,
        reference: Option<&NodeId>,
    ) -> MutationRecord<NodeId> {
        let mut arena = self.write();
        if arena.is_ancestor_or_self(*child, *parent) {
            return MutationRecord::child_list(*parent, Vec::new(), Vec::new());
        }

        arena.detach(*child);
        if let Some(data) = arena.node_mut(*child) {
            data.parent = Some(*parent);
        }
        if let Some(parent_data) = arena.node_mut(*parent) {
            let position = reference
                .and_then(|reference| parent_data.children.iter().position(|c| c == reference))
                .unwrap_or(parent_data.children.len());
            parent_data.children.insert(position, *child);
        }

        MutationRecord::child_list(*parent, vec![*child], Vec::new())
    }

    /// Detach `node`; `None` if it had no parent
    pub fn remove(&self, node: &NodeId) -> Option<MutationRecord<NodeId>> {
        let parent = self.write().detach(*node)?;
        Some(MutationRecord::child_list(parent, Vec::new(), vec![*node]))
    }

    /// Replace the text of a node
    ///
    /// On a text node this is a character data change. On an element every
    /// child is replaced by one text node, which is a child list change.
    pub fn set_text(&self, node: &NodeId, text: impl Into<String>) -> MutationRecord<NodeId> {
        let text = text.into();
        let mut arena = self.write();

        if let Some(NodeData {
            kind: NodeKind::Text(current),
            ..
        }) = arena.node_mut(*node)
        {
            *current = text;
            return MutationRecord::character_data(*node);
        }

        let removed = arena
            .node(*node)
            .map(|data| data.children.clone())
            .unwrap_or_default();
        for child in &removed {
            arena.detach(*child);
        }
        let text_node = arena.insert(NodeKind::Text(text));
        if let Some(data) = arena.node_mut(text_node) {
            data.parent = Some(*node);
        }
        if let Some(data) = arena.node_mut(*node) {
            data.children.push(text_node);
        }

        MutationRecord::child_list(*node, vec![text_node], removed)
    }

    /// Set an attribute and report it as an attribute change
    pub fn write_attribute(
        &self,
        node: &NodeId,
        name: &str,
        value: impl Into<String>,
    ) -> MutationRecord<NodeId> {
        if let Some(NodeData {
            kind: NodeKind::Element { attributes, .. },
            ..
        }) = self.write().node_mut(*node)
        {
            attributes.insert(name.to_string(), value.into());
        }
        MutationRecord::attributes(*node, name)
    }

    /// Remove an attribute and report it as an attribute change
    pub fn clear_attribute(&self, node: &NodeId, name: &str) -> MutationRecord<NodeId> {
        if let Some(NodeData {
            kind: NodeKind::Element { attributes, .. },
            ..
        }) = self.write().node_mut(*node)
        {
            attributes.remove(name);
        }
        MutationRecord::attributes(*node, name)
    }
}

impl DocumentTree for MemoryTree {
    type Node = NodeId;

    fn document(&self) -> NodeId {
        NodeId(0)
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.read().node(*node).and_then(|data| data.parent)
    }

    fn children(&self, node: &NodeId) -> Vec<NodeId> {
        self.read()
            .node(*node)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    fn tag(&self, node: &NodeId) -> Option<String> {
        match &self.read().node(*node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            NodeKind::Text(_) => None,
        }
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        match &self.read().node(*node)?.kind {
            NodeKind::Element { attributes, .. } => attributes.get(name).cloned(),
            NodeKind::Text(_) => None,
        }
    }

    fn set_attribute(&self, node: &NodeId, name: &str, value: &str) {
        self.write_attribute(node, name, value);
    }

    fn own_text(&self, node: &NodeId) -> Option<String> {
        match &self.read().node(*node)?.kind {
            NodeKind::Text(text) => Some(text.clone()),
            NodeKind::Element { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MutationKind;

    #[test]
    fn test_build_and_read() {
        let tree = MemoryTree::from_spec(
            &NodeSpec::element("div")
                .attr("role", "row")
                .text_child("Alice"),
        );
        let document = tree.document();
        let row = tree.children(&document)[0];

        assert_eq!(tree.tag(&row).as_deref(), Some("div"));
        assert_eq!(tree.attribute(&row, "role").as_deref(), Some("row"));
        assert_eq!(tree.text_content(&row), "Alice");
        assert_eq!(tree.parent(&row), Some(document));
    }

    #[test]
    fn test_append_moves_node() {
        let tree = MemoryTree::new();
        let document = tree.document();
        let a = tree.create_element("div", [("id", "a")]);
        let b = tree.create_element("div", [("id", "b")]);
        let item = tree.create_text("x");
        tree.append_child(&document, &a);
        tree.append_child(&document, &b);
        tree.append_child(&a, &item);

        let record = tree.append_child(&b, &item);
        assert_eq!(record.kind, MutationKind::ChildList);
        assert_eq!(record.target, b);
        assert_eq!(record.added_nodes, vec![item]);
        assert!(tree.children(&a).is_empty());
        assert_eq!(tree.children(&b), vec![item]);
    }

    #[test]
    fn test_insert_before_reorders() {
        let tree = MemoryTree::new();
        let document = tree.document();
        let first = tree.create_element("li", Vec::<(String, String)>::new());
        let second = tree.create_element("li", Vec::<(String, String)>::new());
        tree.append_child(&document, &first);
        tree.append_child(&document, &second);

        tree.insert_before(&document, &second, Some(&first));
        assert_eq!(tree.children(&document), vec![second, first]);
    }

    #[test]
    fn test_insert_into_own_subtree_is_refused() {
        let tree = MemoryTree::new();
        let outer = tree.build(&NodeSpec::element("div").child(NodeSpec::element("span")));
        let inner = tree.children(&outer)[0];

        let record = tree.append_child(&inner, &outer);
        assert!(record.added_nodes.is_empty());
        assert_eq!(tree.parent(&inner), Some(outer));
    }

    #[test]
    fn test_remove_reports_parent() {
        let tree = MemoryTree::from_spec(&NodeSpec::element("ul").child(NodeSpec::element("li")));
        let list = tree.children(&tree.document())[0];
        let item = tree.children(&list)[0];

        let record = tree.remove(&item).unwrap();
        assert_eq!(record.target, list);
        assert_eq!(record.removed_nodes, vec![item]);
        assert!(tree.remove(&item).is_none());
    }

    #[test]
    fn test_set_text_on_text_and_element() {
        let tree = MemoryTree::from_spec(&NodeSpec::element("span").text_child("old"));
        let span = tree.children(&tree.document())[0];
        let text = tree.children(&span)[0];

        let record = tree.set_text(&text, "new");
        assert_eq!(record.kind, MutationKind::CharacterData);
        assert_eq!(tree.text_content(&span), "new");

        let record = tree.set_text(&span, "newer");
        assert_eq!(record.kind, MutationKind::ChildList);
        assert_eq!(record.removed_nodes, vec![text]);
        assert_eq!(tree.text_content(&span), "newer");
    }

    #[test]
    fn test_attribute_mutators() {
        let tree = MemoryTree::from_spec(&NodeSpec::element("div"));
        let div = tree.children(&tree.document())[0];

        let record = tree.write_attribute(&div, "class", "unread");
        assert_eq!(record.attribute_name(), Some("class"));
        assert_eq!(tree.attribute(&div, "class").as_deref(), Some("unread"));

        tree.clear_attribute(&div, "class");
        assert!(tree.attribute(&div, "class").is_none());
    }

    #[test]
    fn test_clones_share_document() {
        let tree = MemoryTree::new();
        let other = tree.clone();
        let node = other.create_element("div", [("id", "shared")]);
        other.append_child(&other.document(), &node);

        assert_eq!(tree.children(&tree.document()), vec![node]);
    }

    #[test]
    fn test_node_spec_json_shape() {
        let json = r#"{"tag":"div","attrs":{"role":"row"},"children":[{"text":"Alice"}]}"#;
        let spec: NodeSpec = serde_json::from_str(json).unwrap();
        assert_eq!(
            spec,
            NodeSpec::element("div").attr("role", "row").text_child("Alice")
        );
    }
}
