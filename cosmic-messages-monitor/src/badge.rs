//! Badge Stabilization
//!
//! Debounces the unread count shown on the tray badge. Rises are applied
//! immediately. A drop to zero is only trusted after a run of consecutive
//! zero readings, because the host page briefly removes its unread markers
//! while re-rendering (on focus changes, for instance).

use crate::dedup::NotificationState;
use crate::queries::StructuralQueries;
use crate::tree::DocumentTree;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Debounced badge state
///
/// `shown_count` only ever falls straight to zero, and only once
/// `consecutive_zero_readings` reached the confirmation threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeState {
    pub shown_count: u32,
    pub consecutive_zero_readings: u32,
}

/// What one reading did to the badge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeTransition {
    /// Non-zero reading applied
    Raised(u32),
    /// Zero reading seen, badge held until confirmed
    ZeroPending { readings: u32 },
    /// Enough zero readings, badge cleared
    ConfirmedZero,
    /// Zero reading while already at zero
    Idle,
}

/// Turns instantaneous unread counts into a debounced badge value
#[derive(Debug, Clone)]
pub struct BadgeStabilizer {
    queries: Arc<StructuralQueries>,
    threshold: u32,
}

impl BadgeStabilizer {
    pub fn new(queries: Arc<StructuralQueries>, threshold: u32) -> Self {
        Self {
            queries,
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Apply one instantaneous reading
    pub fn observe(&self, state: &mut BadgeState, count: u32) -> BadgeTransition {
        if count > 0 {
            state.shown_count = count;
            state.consecutive_zero_readings = 0;
            return BadgeTransition::Raised(count);
        }
        if state.shown_count == 0 {
            return BadgeTransition::Idle;
        }

        state.consecutive_zero_readings += 1;
        if state.consecutive_zero_readings >= self.threshold {
            state.shown_count = 0;
            state.consecutive_zero_readings = 0;
            BadgeTransition::ConfirmedZero
        } else {
            BadgeTransition::ZeroPending {
                readings: state.consecutive_zero_readings,
            }
        }
    }

    /// Number of unread rows under the conversations grid
    ///
    /// The grid is looked up beneath `scope`. No grid means zero.
    pub fn count_unread<T: DocumentTree>(&self, tree: &T, scope: &T::Node) -> u32 {
        let Some(grid) = self.queries.grid.query_first(tree, scope) else {
            return 0;
        };
        let count = self
            .queries
            .row
            .query_all(tree, &grid)
            .iter()
            .filter(|row| self.queries.is_unread(tree, row))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Read the tree, update the badge and return the value to publish
    ///
    /// A confirmed zero also forgets every notified body, so a repeated
    /// message after the user caught up notifies again.
    pub fn evaluate<T: DocumentTree>(
        &self,
        tree: &T,
        scope: &T::Node,
        badge: &mut BadgeState,
        notifications: &mut NotificationState,
    ) -> u32 {
        let count = self.count_unread(tree, scope);
        match self.observe(badge, count) {
            BadgeTransition::ConfirmedZero => {
                info!(
                    "Badge cleared, forgetting {} notified conversations",
                    notifications.len()
                );
                notifications.clear();
            }
            BadgeTransition::ZeroPending { readings } => {
                debug!("Zero unread reading {}/{}", readings, self.threshold);
            }
            BadgeTransition::Raised(_) | BadgeTransition::Idle => {}
        }
        badge.shown_count
    }
}
