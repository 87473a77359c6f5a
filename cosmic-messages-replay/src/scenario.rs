//! Trace Replay
//!
//! A trace is a JSON document: the initial page as a node tree, followed by a
//! list of steps. Tree steps mutate the page and queue the mutation records
//! they cause; `flush` hands the queued records to the monitor as one batch,
//! the way a mutation observer delivers them. The remaining steps fire the
//! monitor's other triggers.
//!
//! ```json
//! {
//!   "document": { "tag": "body", "children": [] },
//!   "steps": [
//!     { "op": "append", "parent": "[role=rowgroup]", "node": { "tag": "div" } },
//!     { "op": "flush" },
//!     { "op": "tick", "count": 3 }
//!   ]
//! }
//! ```
//!
//! Targets are selectors resolved against the whole document; the first match
//! is used.

use anyhow::{anyhow, Context, Result};
use cosmic_messages_monitor::{
    ChannelPublisher, DocumentTree, MemoryTree, Monitor, MonitorConfig, MonitorEvent,
    MonitorStats, MutationRecord, NodeId, NodeSpec, Outbound, PassthroughRenderer, Selector,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Recorded sidebar session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    /// Initial page content, placed under the document node
    pub document: NodeSpec,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One replay step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Append {
        parent: String,
        node: NodeSpec,
    },
    InsertBefore {
        parent: String,
        before: String,
        node: NodeSpec,
    },
    Remove {
        target: String,
    },
    SetText {
        target: String,
        text: String,
    },
    SetAttribute {
        target: String,
        name: String,
        value: String,
    },
    RemoveAttribute {
        target: String,
        name: String,
    },
    /// Deliver the queued records as one batch
    Flush,
    Focus,
    Visibility {
        visible: bool,
    },
    /// Fire the badge timer `count` times
    Tick {
        #[serde(default = "default_tick_count")]
        count: u32,
    },
    Reconcile,
}

fn default_tick_count() -> u32 {
    1
}

impl Trace {
    /// Parse a trace from JSON text
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse trace")
    }
}

/// Drives a monitor through a trace
pub struct Replayer {
    tree: MemoryTree,
    monitor: Monitor<MemoryTree>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    pending: Vec<MutationRecord<NodeId>>,
}

impl Replayer {
    /// Build the initial page and a monitor over it
    pub fn new(document: &NodeSpec, mut config: MonitorConfig) -> Result<Self> {
        // The page cannot change while the monitor starts
        config.timing.root_wait_timeout_ms = 0;

        let tree = MemoryTree::from_spec(document);
        let (publisher, outbound) = ChannelPublisher::new();
        let monitor = Monitor::new(
            tree.clone(),
            config,
            Arc::new(PassthroughRenderer),
            Arc::new(publisher),
        )
        .context("Invalid monitor configuration")?;

        Ok(Self {
            tree,
            monitor,
            outbound,
            pending: Vec::new(),
        })
    }

    pub fn stats(&self) -> MonitorStats {
        self.monitor.stats()
    }

    /// Run the monitor's start-up pass
    pub async fn start(&mut self) -> Vec<Outbound> {
        self.monitor.start().await;
        self.drain()
    }

    /// Apply one step and return what the monitor published
    pub async fn apply(&mut self, step: &Step) -> Result<Vec<Outbound>> {
        match step {
            Step::Append { parent, node } => {
                let parent = self.resolve(parent)?;
                let node = self.tree.build(node);
                let record = self.tree.append_child(&parent, &node);
                self.pending.push(record);
            }
            Step::InsertBefore {
                parent,
                before,
                node,
            } => {
                let parent = self.resolve(parent)?;
                let before = self.resolve(before)?;
                let node = self.tree.build(node);
                let record = self.tree.insert_before(&parent, &node, Some(&before));
                self.pending.push(record);
            }
            Step::Remove { target } => {
                let target = self.resolve(target)?;
                if let Some(record) = self.tree.remove(&target) {
                    self.pending.push(record);
                }
            }
            Step::SetText { target, text } => {
                let target = self.resolve(target)?;
                let record = self.tree.set_text(&target, text.as_str());
                self.pending.push(record);
            }
            Step::SetAttribute {
                target,
                name,
                value,
            } => {
                let target = self.resolve(target)?;
                let record = self.tree.write_attribute(&target, name, value.as_str());
                self.pending.push(record);
            }
            Step::RemoveAttribute { target, name } => {
                let target = self.resolve(target)?;
                let record = self.tree.clear_attribute(&target, name);
                self.pending.push(record);
            }
            Step::Flush => self.flush().await,
            Step::Focus => {
                self.monitor.handle_event(MonitorEvent::FocusGained).await;
            }
            Step::Visibility { visible } => {
                self.monitor
                    .handle_event(MonitorEvent::VisibilityChanged(*visible))
                    .await;
            }
            Step::Tick { count } => {
                for _ in 0..*count {
                    self.monitor.on_timer_tick().await;
                }
            }
            Step::Reconcile => {
                self.monitor.handle_event(MonitorEvent::Reconcile).await;
            }
        }
        Ok(self.drain())
    }

    /// Deliver queued records, if any
    pub async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        debug!("Delivering batch of {} records", batch.len());
        self.monitor.handle_batch(batch.into()).await;
    }

    /// Deliver leftovers and return the final statistics
    pub async fn finish(&mut self) -> (Vec<Outbound>, MonitorStats) {
        if !self.pending.is_empty() {
            info!("Flushing {} records left at end of trace", self.pending.len());
            self.flush().await;
        }
        (self.drain(), self.stats())
    }

    fn resolve(&self, selector: &str) -> Result<NodeId> {
        let parsed = Selector::parse(selector)
            .map_err(|reason| anyhow!("Invalid target selector '{}': {}", selector, reason))?;
        parsed
            .query_first(&self.tree, &self.tree.document())
            .with_context(|| format!("No node matches target '{}'", selector))
    }

    fn drain(&mut self) -> Vec<Outbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Replay a whole trace, handing every published message to `sink`
pub async fn replay<F>(trace: &Trace, config: MonitorConfig, mut sink: F) -> Result<MonitorStats>
where
    F: FnMut(&Outbound) -> Result<()>,
{
    let mut replayer = Replayer::new(&trace.document, config)?;

    for message in replayer.start().await {
        sink(&message)?;
    }

    for (index, step) in trace.steps.iter().enumerate() {
        let messages = replayer
            .apply(step)
            .await
            .with_context(|| format!("Step {} failed", index + 1))?;
        for message in &messages {
            sink(message)?;
        }
    }

    let (messages, stats) = replayer.finish().await;
    for message in &messages {
        sink(message)?;
    }
    Ok(stats)
}
