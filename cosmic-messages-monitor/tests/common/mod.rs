//! Shared fixtures for the integration tests

#![allow(dead_code)]

use cosmic_messages_monitor::{
    ChannelPublisher, DocumentTree, MemoryTree, Monitor, MonitorConfig, NodeId, NodeSpec, Outbound,
    PassthroughRenderer, Selector,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One conversation row in the markup the default selector table expects
pub fn row(href: &str, title: &str, body: &str, unread: bool) -> NodeSpec {
    let mut content = NodeSpec::element("div")
        .child(
            NodeSpec::element("img")
                .attr("src", format!("https://cdn.example/{}.jpg", title.to_lowercase()))
                .attr("alt", title),
        )
        .child(
            NodeSpec::element("span")
                .attr("dir", "auto")
                .child(NodeSpec::element("span").text_child(title)),
        )
        .child(
            NodeSpec::element("span")
                .attr("dir", "auto")
                .child(NodeSpec::element("span").text_child(body)),
        );
    if unread {
        content = content.child(unread_marker());
    }
    NodeSpec::element("div").attr("role", "row").child(
        NodeSpec::element("div").attr("role", "gridcell").child(
            NodeSpec::element("a")
                .attr("role", "link")
                .attr("href", href)
                .child(content),
        ),
    )
}

pub fn unread_marker() -> NodeSpec {
    NodeSpec::element("span")
        .attr("class", "sr-only")
        .text_child("Unread message:")
}

/// Page with a sidebar holding `rows` followed by the trailing spinner
pub fn page(rows: Vec<NodeSpec>) -> NodeSpec {
    let mut group = NodeSpec::element("div").attr("role", "rowgroup");
    for row in rows {
        group = group.child(row);
    }
    group = group.child(NodeSpec::element("div").attr("class", "spinner"));

    NodeSpec::element("body")
        .child(NodeSpec::element("header").text_child("Chats"))
        .child(
            NodeSpec::element("div")
                .attr("role", "navigation")
                .child(NodeSpec::element("div").attr("role", "grid").child(group)),
        )
}

pub fn find(tree: &MemoryTree, selector: &str) -> NodeId {
    find_all(tree, selector)
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("nothing matches {}", selector))
}

pub fn find_all(tree: &MemoryTree, selector: &str) -> Vec<NodeId> {
    Selector::parse(selector)
        .unwrap()
        .query_all(tree, &tree.document())
}

/// Row whose permalink is `href`
pub fn row_for(tree: &MemoryTree, href: &str) -> NodeId {
    let link = find(tree, &format!("[role=link][href=\"{}\"]", href));
    let mut node = link;
    while tree.attribute(&node, "role").as_deref() != Some("row") {
        node = tree.parent(&node).unwrap();
    }
    node
}

/// Text node holding the message preview of a row
pub fn body_text(tree: &MemoryTree, row: &NodeId) -> NodeId {
    let slot = Selector::parse("span[dir=auto] > span")
        .unwrap()
        .query_all(tree, row)[1];
    tree.children(&slot)[0]
}

/// Route monitor logs through the test harness, shown for failing tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cosmic_messages_monitor=debug")
        .with_test_writer()
        .try_init();
}

pub fn monitor_with(
    tree: &MemoryTree,
    config: MonitorConfig,
) -> (Monitor<MemoryTree>, mpsc::UnboundedReceiver<Outbound>) {
    init_logging();
    let (publisher, outbound) = ChannelPublisher::new();
    let monitor = Monitor::new(
        tree.clone(),
        config,
        Arc::new(PassthroughRenderer),
        Arc::new(publisher),
    )
    .unwrap();
    (monitor, outbound)
}

pub fn monitor(tree: &MemoryTree) -> (Monitor<MemoryTree>, mpsc::UnboundedReceiver<Outbound>) {
    monitor_with(tree, MonitorConfig::default())
}

pub fn drain(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut messages = Vec::new();
    while let Ok(message) = outbound.try_recv() {
        messages.push(message);
    }
    messages
}

pub fn notifications(messages: &[Outbound]) -> Vec<cosmic_messages_monitor::NotificationEvent> {
    messages
        .iter()
        .filter_map(|message| match message {
            Outbound::Notification(event) => Some(event.clone()),
            _ => None,
        })
        .collect()
}

pub fn badges(messages: &[Outbound]) -> Vec<u32> {
    messages
        .iter()
        .filter_map(|message| match message {
            Outbound::UpdateTrayIcon(count) => Some(*count),
            _ => None,
        })
        .collect()
}

pub fn conversation_lists(messages: &[Outbound]) -> Vec<Vec<String>> {
    messages
        .iter()
        .filter_map(|message| match message {
            Outbound::Conversations(list) => {
                Some(list.iter().map(|c| c.label.clone()).collect())
            }
            _ => None,
        })
        .collect()
}
