//! Monitor Actor
//!
//! [`Monitor`] is the single owner of all mutable monitoring state
//! (notification memory, badge state, the cached sidebar root). Everything
//! that can change that state arrives as a [`MonitorEvent`] on one channel
//! and is handled by one task, so state transitions never overlap.
//!
//! ## Triggers
//!
//! | Trigger                         | List rebuild | Dedup | Badge |
//! |---------------------------------|:------------:|:-----:|:-----:|
//! | structural batch (in sidebar)   | yes          |       |       |
//! | content batch (in grid)         |              | yes   |       |
//! | batch touching the grid         |              |       | yes   |
//! | badge timer                     | every Nth    |       | yes   |
//! | focus gained / page visible     |              |       | yes   |
//! | reconcile                       | yes          |       | yes   |
//!
//! Within one batch the list is rebuilt first (it fills the icon cache the
//! deduplicator reads), then notifications, then the badge.

use crate::badge::{BadgeStabilizer, BadgeState};
use crate::config::MonitorConfig;
use crate::conversation::{Conversation, ConversationExtractor};
use crate::conversation_list::ConversationListBuilder;
use crate::dedup::{NotificationDeduplicator, NotificationState};
use crate::error::{MonitorError, Result};
use crate::icon::{IconRenderer, IconResolver};
use crate::publish::{Outbound, Publisher};
use crate::queries::StructuralQueries;
use crate::tree::{wait_for_element, DocumentTree, MutationBatch};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Inbound event for the monitor task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent<N> {
    /// Records delivered together by the mutation observer
    Mutations(MutationBatch<N>),
    /// The window gained focus
    FocusGained,
    /// The page became visible (`true`) or hidden (`false`)
    VisibilityChanged(bool),
    /// Full rebuild plus badge evaluation
    Reconcile,
    /// Stop the monitor
    Shutdown,
}

/// Cloneable sender side of the monitor's event channel
#[derive(Debug)]
pub struct MonitorHandle<N> {
    sender: mpsc::UnboundedSender<MonitorEvent<N>>,
}

impl<N> Clone for MonitorHandle<N> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Create a monitor event channel
pub fn event_channel<N>() -> (MonitorHandle<N>, mpsc::UnboundedReceiver<MonitorEvent<N>>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (MonitorHandle { sender }, receiver)
}

impl<N> MonitorHandle<N> {
    /// Send an event
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ChannelClosed`] once the monitor has stopped.
    pub fn send(&self, event: MonitorEvent<N>) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| MonitorError::ChannelClosed)
    }

    pub fn mutations(&self, batch: impl Into<MutationBatch<N>>) -> Result<()> {
        self.send(MonitorEvent::Mutations(batch.into()))
    }

    pub fn focus_gained(&self) -> Result<()> {
        self.send(MonitorEvent::FocusGained)
    }

    pub fn visibility_changed(&self, visible: bool) -> Result<()> {
        self.send(MonitorEvent::VisibilityChanged(visible))
    }

    pub fn reconcile(&self) -> Result<()> {
        self.send(MonitorEvent::Reconcile)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(MonitorEvent::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Counters kept by a monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub batches: u64,
    pub rebuilds: u64,
    pub notifications_emitted: u64,
    pub duplicates_suppressed: u64,
    pub badge_evaluations: u64,
    pub timer_ticks: u64,
}

/// How a mutation batch is routed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchClass {
    /// Sidebar structure changed: rebuild the list
    pub structural: bool,
    /// Something inside the grid changed: run notification dedup
    pub content: bool,
    /// The grid or its rows changed: evaluate the badge
    pub touches_grid: bool,
}

impl BatchClass {
    /// Classify a batch against the current sidebar root
    pub fn classify<T: DocumentTree>(
        tree: &T,
        queries: &StructuralQueries,
        root: Option<&T::Node>,
        batch: &MutationBatch<T::Node>,
    ) -> Self {
        let grid = root.and_then(|root| queries.grid.query_first(tree, root));
        let mut class = Self::default();

        for record in batch.records() {
            // An added node may be the (new) sidebar or grid itself
            let added_contains = |node: &T::Node| {
                record
                    .added_nodes
                    .iter()
                    .any(|added| tree.contains(added, node))
            };
            let inside_root = root
                .is_some_and(|root| tree.contains(root, &record.target) || added_contains(root));
            let inside_grid = grid
                .as_ref()
                .is_some_and(|grid| tree.contains(grid, &record.target));

            if record.is_child_list() || record.attribute_name().is_some() {
                class.structural |= match root {
                    Some(_) => inside_root,
                    None => record.is_child_list(),
                };
            }

            class.content |= inside_grid;

            class.touches_grid |= match &grid {
                Some(grid) => {
                    inside_grid
                        || added_contains(grid)
                        || (record.is_child_list()
                            && inside_root
                            && tree.contains(&record.target, grid))
                }
                None => record.is_child_list() && inside_root,
            };
        }

        class
    }

    pub fn is_empty(&self) -> bool {
        !(self.structural || self.content || self.touches_grid)
    }
}

/// Conversation sidebar monitor
pub struct Monitor<T: DocumentTree> {
    tree: T,
    config: MonitorConfig,
    queries: Arc<StructuralQueries>,
    list_builder: ConversationListBuilder,
    deduplicator: NotificationDeduplicator,
    stabilizer: BadgeStabilizer,
    publisher: Arc<dyn Publisher>,
    notifications: NotificationState,
    badge: BadgeState,
    sidebar_root: Option<T::Node>,
    stats: MonitorStats,
}

impl<T: DocumentTree> std::fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("sidebar_root", &self.sidebar_root)
            .field("badge", &self.badge)
            .field("notified", &self.notifications.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<T: DocumentTree> Monitor<T> {
    /// Create a monitor over `tree`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or its selector table is invalid.
    pub fn new(
        tree: T,
        config: MonitorConfig,
        renderer: Arc<dyn IconRenderer>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        config.validate()?;
        let queries = Arc::new(config.compile_queries()?);

        let icons = IconResolver::new(renderer, queries.clone(), config.icons.clone());
        let extractor = ConversationExtractor::new(queries.clone(), icons);
        let list_builder = ConversationListBuilder::new(queries.clone(), extractor);
        let deduplicator = NotificationDeduplicator::new(
            queries.clone(),
            config.notifications.placeholder_body.clone(),
            config.notifications.silent,
        );
        let stabilizer =
            BadgeStabilizer::new(queries.clone(), config.timing.zero_confirmation_threshold);

        Ok(Self {
            tree,
            config,
            queries,
            list_builder,
            deduplicator,
            stabilizer,
            publisher,
            notifications: NotificationState::new(),
            badge: BadgeState::default(),
            sidebar_root: None,
            stats: MonitorStats::default(),
        })
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn badge_state(&self) -> BadgeState {
        self.badge
    }

    pub fn notification_state(&self) -> &NotificationState {
        &self.notifications
    }

    /// Sidebar root, revalidating the cached one
    ///
    /// A cached root that was detached or no longer matches is dropped and
    /// looked up again.
    pub fn locate_sidebar_root(&mut self) -> Option<T::Node> {
        if let Some(root) = &self.sidebar_root {
            if self.tree.is_attached(root) && self.queries.sidebar_root.matches(&self.tree, root) {
                return Some(root.clone());
            }
            debug!("Cached sidebar root is stale, looking it up again");
            self.sidebar_root = None;
        }

        let root = self
            .queries
            .sidebar_root
            .query_first(&self.tree, &self.tree.document());
        if root.is_some() {
            debug!("Found sidebar root '{}'", self.queries.sidebar_root);
        }
        self.sidebar_root = root.clone();
        root
    }

    /// Rebuild and publish the conversation list
    ///
    /// Nothing is published while the sidebar root is missing.
    pub async fn rebuild_conversations(&mut self) -> Vec<Conversation> {
        let root = self.locate_sidebar_root();
        let conversations = self.list_builder.build(&self.tree, root.as_ref()).await;
        self.stats.rebuilds += 1;

        if root.is_some() {
            self.publisher
                .publish(Outbound::Conversations(conversations.clone()));
        }
        conversations
    }

    /// Run notification dedup over a batch and publish the results
    ///
    /// Returns the number of notifications published.
    pub fn process_notifications(&mut self, batch: &MutationBatch<T::Node>) -> usize {
        if !self.config.notifications.enabled {
            return 0;
        }

        let outcome = self
            .deduplicator
            .process_batch(&self.tree, batch, &mut self.notifications);
        self.stats.duplicates_suppressed += outcome.suppressed as u64;

        let emitted = outcome.events.len();
        for event in outcome.events {
            info!("Notifying '{}' (id {})", event.title, event.id);
            self.publisher.publish(Outbound::Notification(event));
        }
        self.stats.notifications_emitted += emitted as u64;
        emitted
    }

    /// Evaluate and publish the badge
    pub fn evaluate_badge(&mut self) -> u32 {
        let scope = self
            .locate_sidebar_root()
            .unwrap_or_else(|| self.tree.document());
        let shown = self.stabilizer.evaluate(
            &self.tree,
            &scope,
            &mut self.badge,
            &mut self.notifications,
        );
        self.stats.badge_evaluations += 1;
        self.publisher.publish(Outbound::UpdateTrayIcon(shown));
        shown
    }

    /// Route one mutation batch
    pub async fn handle_batch(&mut self, mut batch: MutationBatch<T::Node>) {
        self.stats.batches += 1;

        let queries = self.queries.clone();
        batch.retain(|record| queries.observes_attribute(record.attribute_name()));
        if batch.is_empty() {
            trace!("Batch held only unobserved attribute changes");
            return;
        }

        let root = self.locate_sidebar_root();
        let class = BatchClass::classify(&self.tree, &self.queries, root.as_ref(), &batch);
        trace!("Batch of {} records classified as {:?}", batch.len(), class);

        if class.structural {
            self.rebuild_conversations().await;
        }
        if class.content {
            self.process_notifications(&batch);
        }
        if class.touches_grid {
            self.evaluate_badge();
        }
    }

    /// Badge timer tick, with the periodic list reconciliation
    pub async fn on_timer_tick(&mut self) {
        self.stats.timer_ticks += 1;
        if self
            .config
            .timing
            .is_list_refresh_tick(self.stats.timer_ticks)
        {
            debug!("Periodic conversation list reconciliation");
            self.rebuild_conversations().await;
        }
        self.evaluate_badge();
    }

    /// Handle one event; `false` means stop
    pub async fn handle_event(&mut self, event: MonitorEvent<T::Node>) -> bool {
        match event {
            MonitorEvent::Mutations(batch) => self.handle_batch(batch).await,
            MonitorEvent::FocusGained => {
                debug!("Window focused, re-evaluating badge");
                self.evaluate_badge();
            }
            MonitorEvent::VisibilityChanged(true) => {
                debug!("Page visible, re-evaluating badge");
                self.evaluate_badge();
            }
            MonitorEvent::VisibilityChanged(false) => {}
            MonitorEvent::Reconcile => {
                self.rebuild_conversations().await;
                self.evaluate_badge();
            }
            MonitorEvent::Shutdown => return false,
        }
        true
    }

    /// Wait for the sidebar, then publish the initial list and badge
    pub async fn start(&mut self) {
        let timing = &self.config.timing;
        let root = wait_for_element(
            &self.tree,
            &self.queries.sidebar_root,
            timing.root_poll_interval(),
            timing.root_wait_timeout(),
        )
        .await;

        match &root {
            Some(_) => info!("Sidebar root found, starting monitor"),
            None => warn!(
                "Sidebar root '{}' did not appear within {:?}, starting without it",
                self.queries.sidebar_root,
                self.config.timing.root_wait_timeout()
            ),
        }
        self.sidebar_root = root;

        self.rebuild_conversations().await;
        self.evaluate_badge();
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<MonitorEvent<T::Node>>,
    ) -> MonitorStats {
        self.start().await;

        let period = self.config.timing.badge_interval();
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if !self.handle_event(event).await {
                                info!("Monitor shutting down");
                                break;
                            }
                        }
                        None => {
                            info!("Event channel closed, stopping monitor");
                            break;
                        }
                    }
                }
                _ = timer.tick() => {
                    self.on_timer_tick().await;
                }
            }
        }

        info!(
            "Monitor stopped: {} batches, {} notifications, {} duplicates suppressed",
            self.stats.batches, self.stats.notifications_emitted, self.stats.duplicates_suppressed
        );
        self.stats
    }
}

impl<T> Monitor<T>
where
    T: DocumentTree + 'static,
    T::Node: 'static,
{
    /// Run the monitor on its own task
    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<MonitorEvent<T::Node>>,
    ) -> JoinHandle<MonitorStats> {
        tokio::spawn(self.run(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icon::PassthroughRenderer;
    use crate::publish::ChannelPublisher;
    use crate::queries::tests::row_spec;
    use crate::queries::SelectorTable;
    use crate::tree::{MemoryTree, MutationRecord, NodeId, NodeSpec};

    fn sidebar_spec() -> NodeSpec {
        NodeSpec::element("body").child(
            NodeSpec::element("div").attr("role", "navigation").child(
                NodeSpec::element("div").attr("role", "grid").child(
                    NodeSpec::element("div")
                        .attr("role", "rowgroup")
                        .child(row_spec("/t/1/", "Alice", "Hi", false))
                        .child(NodeSpec::element("div").attr("class", "trailer")),
                ),
            ),
        )
    }

    fn monitor(
        tree: &MemoryTree,
    ) -> (Monitor<MemoryTree>, mpsc::UnboundedReceiver<Outbound>) {
        let (publisher, outbound) = ChannelPublisher::new();
        let monitor = Monitor::new(
            tree.clone(),
            MonitorConfig::default(),
            Arc::new(PassthroughRenderer),
            Arc::new(publisher),
        )
        .unwrap();
        (monitor, outbound)
    }

    fn find(tree: &MemoryTree, selector: &str) -> NodeId {
        crate::selector::Selector::parse(selector)
            .unwrap()
            .query_first(tree, &tree.document())
            .unwrap()
    }

    fn drain(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut messages = Vec::new();
        while let Ok(message) = outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = MonitorConfig::default();
        config.selectors = SelectorTable {
            grid: "[role=".to_string(),
            ..Default::default()
        };
        let (publisher, _outbound) = ChannelPublisher::new();
        let result = Monitor::new(
            MemoryTree::new(),
            config,
            Arc::new(PassthroughRenderer),
            Arc::new(publisher),
        );
        assert!(result.unwrap_err().is_configuration_error());
    }

    #[test]
    fn test_classification() {
        let tree = MemoryTree::from_spec(&sidebar_spec());
        let queries = SelectorTable::default().compile().unwrap();
        let root = find(&tree, "[role=navigation]");
        let group = find(&tree, "[role=rowgroup]");
        let body = find(&tree, "body");

        // Row inserted into the list
        let row = tree.build(&row_spec("/t/2/", "Bob", "Yo", true));
        let batch = MutationBatch::from(vec![tree.insert_before(&group, &row, None)]);
        let class = BatchClass::classify(&tree, &queries, Some(&root), &batch);
        assert!(class.structural && class.content && class.touches_grid);

        // Change outside the sidebar
        let banner = tree.build(&NodeSpec::element("div"));
        let batch = MutationBatch::from(vec![tree.append_child(&body, &banner)]);
        let class = BatchClass::classify(&tree, &queries, Some(&root), &batch);
        assert!(class.is_empty());

        // Sidebar re-rendered above the grid
        let batch: MutationBatch<NodeId> =
            vec![MutationRecord::child_list(root, vec![], vec![])].into();
        let class = BatchClass::classify(&tree, &queries, Some(&root), &batch);
        assert!(class.structural && class.touches_grid && !class.content);

        // No root yet: any child list change may have created it
        let batch = MutationBatch::from(vec![tree.append_child(&body, &banner)]);
        let class = BatchClass::classify(&tree, &queries, None, &batch);
        assert!(class.structural && !class.content && !class.touches_grid);
    }

    #[tokio::test]
    async fn test_unobserved_attribute_batches_ignored() {
        let tree = MemoryTree::from_spec(&sidebar_spec());
        let (mut monitor, mut outbound) = monitor(&tree);
        let row = find(&tree, "[role=row]");

        monitor
            .handle_batch(vec![tree.write_attribute(&row, "read", "icon://x")].into())
            .await;
        assert!(drain(&mut outbound).is_empty());
        assert_eq!(monitor.stats().batches, 1);
        assert_eq!(monitor.stats().rebuilds, 0);
    }

    #[tokio::test]
    async fn test_cached_root_revalidated() {
        let tree = MemoryTree::from_spec(&sidebar_spec());
        let (mut monitor, _outbound) = monitor(&tree);

        let first = monitor.locate_sidebar_root().unwrap();
        tree.remove(&first);
        assert_eq!(monitor.locate_sidebar_root(), None);

        let replacement = tree.build(&NodeSpec::element("nav").attr("role", "navigation"));
        tree.append_child(&tree.document(), &replacement);
        assert_eq!(monitor.locate_sidebar_root(), Some(replacement));
    }

    #[tokio::test]
    async fn test_rebuild_without_root_publishes_nothing() {
        let tree = MemoryTree::new();
        let (mut monitor, mut outbound) = monitor(&tree);

        assert!(monitor.rebuild_conversations().await.is_empty());
        assert!(drain(&mut outbound).is_empty());

        assert_eq!(monitor.evaluate_badge(), 0);
        assert_eq!(drain(&mut outbound), vec![Outbound::UpdateTrayIcon(0)]);
    }

    #[tokio::test]
    async fn test_events() {
        let tree = MemoryTree::from_spec(&sidebar_spec());
        let (mut monitor, mut outbound) = monitor(&tree);

        assert!(monitor.handle_event(MonitorEvent::FocusGained).await);
        assert!(monitor.handle_event(MonitorEvent::VisibilityChanged(false)).await);
        assert!(monitor.handle_event(MonitorEvent::VisibilityChanged(true)).await);
        assert_eq!(
            drain(&mut outbound),
            vec![Outbound::UpdateTrayIcon(0), Outbound::UpdateTrayIcon(0)]
        );

        assert!(monitor.handle_event(MonitorEvent::Reconcile).await);
        let messages = drain(&mut outbound);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic(), "conversations");
        assert_eq!(messages[1], Outbound::UpdateTrayIcon(0));

        assert!(!monitor.handle_event(MonitorEvent::Shutdown).await);
    }

    #[tokio::test]
    async fn test_notifications_disabled() {
        let tree = MemoryTree::from_spec(&sidebar_spec());
        let mut config = MonitorConfig::default();
        config.notifications.enabled = false;
        let (publisher, mut outbound) = ChannelPublisher::new();
        let mut monitor = Monitor::new(
            tree.clone(),
            config,
            Arc::new(PassthroughRenderer),
            Arc::new(publisher),
        )
        .unwrap();
        monitor.rebuild_conversations().await;

        let group = find(&tree, "[role=rowgroup]");
        let row = tree.build(&row_spec("/t/2/", "Bob", "Yo", true));
        let trailer = find(&tree, ".trailer");
        monitor
            .handle_batch(vec![tree.insert_before(&group, &row, Some(&trailer))].into())
            .await;

        assert!(drain(&mut outbound)
            .iter()
            .all(|message| message.topic() != "notification"));
        assert!(monitor.notification_state().is_empty());
    }

    #[tokio::test]
    async fn test_handle_send_after_stop() {
        let (handle, events) = event_channel::<NodeId>();
        drop(events);
        assert!(handle.is_closed());
        assert!(matches!(handle.focus_gained(), Err(MonitorError::ChannelClosed)));
    }
}
