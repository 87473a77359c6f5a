//! Monitor Task Tests
//!
//! Runs the monitor on its own task with a paused clock:
//! - deferred sidebar lookup at start-up
//! - badge timer and periodic list reconciliation
//! - shutdown and channel closure

mod common;

use common::*;
use cosmic_messages_monitor::{event_channel, DocumentTree, MemoryTree, MonitorConfig, NodeSpec};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_waits_for_sidebar_then_publishes() {
    let tree = MemoryTree::from_spec(&NodeSpec::element("body"));
    let (monitor, mut outbound) = monitor(&tree);
    let (handle, events) = event_channel();
    let task = monitor.spawn(events);

    let writer = tree.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(700)).await;
        let body = find(&writer, "body");
        let page = writer.build(&page(vec![row("/t/1/", "Alice", "Hi", true)]));
        let nav = writer.element_children(&page)[1];
        writer.append_child(&body, &nav);
    });

    let first = outbound.recv().await.unwrap();
    assert_eq!(
        conversation_lists(&[first]),
        vec![vec!["Alice".to_string()]]
    );
    assert_eq!(badges(&[outbound.recv().await.unwrap()]), vec![1]);

    handle.shutdown().unwrap();
    let stats = task.await.unwrap();
    assert_eq!(stats.rebuilds, 1);
    assert_eq!(stats.badge_evaluations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_reevaluates_badge() {
    let tree = MemoryTree::from_spec(&page(vec![row("/t/1/", "Alice", "Hi", true)]));
    let mut config = MonitorConfig::default();
    config.timing.list_refresh_ticks = 0;
    let (monitor, mut outbound) = monitor_with(&tree, config);
    let (handle, events) = event_channel();
    let task = monitor.spawn(events);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(badges(&drain(&mut outbound)), vec![1]);

    // The row is read without any mutation reaching the monitor
    let marker = find(&tree, ".sr-only");
    tree.remove(&marker);

    sleep(Duration::from_millis(3500)).await;
    assert_eq!(badges(&drain(&mut outbound)), vec![1, 1, 0]);

    handle.shutdown().unwrap();
    let stats = task.await.unwrap();
    assert_eq!(stats.timer_ticks, 3);
    assert_eq!(stats.rebuilds, 1);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_list_reconciliation() {
    let tree = MemoryTree::from_spec(&page(vec![row("/t/1/", "Alice", "Hi", false)]));
    let mut config = MonitorConfig::default();
    config.timing.list_refresh_ticks = 2;
    let (monitor, mut outbound) = monitor_with(&tree, config);
    let (handle, events) = event_channel();
    let task = monitor.spawn(events);

    sleep(Duration::from_millis(100)).await;
    drain(&mut outbound);

    // A row added behind the observer's back
    let group = find(&tree, "[role=rowgroup]");
    let alice = row_for(&tree, "/t/1/");
    let bob = tree.build(&row("/t/2/", "Bob", "Yo", false));
    tree.insert_before(&group, &bob, Some(&alice));

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(
        conversation_lists(&drain(&mut outbound)),
        vec![vec!["Bob".to_string(), "Alice".to_string()]]
    );

    drop(handle);
    let stats = task.await.unwrap();
    assert_eq!(stats.rebuilds, 2);
}

#[tokio::test(start_paused = true)]
async fn test_events_through_handle() {
    let tree = MemoryTree::from_spec(&page(vec![row("/t/2/", "Bob", "Later", false)]));
    let (monitor, mut outbound) = monitor(&tree);
    let (handle, events) = event_channel();
    let task = monitor.spawn(events);

    let group = find(&tree, "[role=rowgroup]");
    let bob = row_for(&tree, "/t/2/");
    let alice = tree.build(&row("/t/1/", "Alice", "Hi", true));
    let record = tree.insert_before(&group, &alice, Some(&bob));

    handle.mutations(vec![record.clone()]).unwrap();
    handle.mutations(vec![record]).unwrap();
    handle.visibility_changed(false).unwrap();
    handle.shutdown().unwrap();

    let stats = task.await.unwrap();
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.notifications_emitted, 1);
    assert_eq!(stats.duplicates_suppressed, 1);

    let events = notifications(&drain(&mut outbound));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "Alice");
    assert!(handle.reconcile().is_err());
}
