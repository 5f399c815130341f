//! Consolidation options, metrics and previews.

use crate::memory::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Options for one consolidation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationOptions {
    /// Nodes accessed within this many hours are reinforced. `0` disables
    /// reinforcement.
    pub reinforce_window_hours: f64,
    /// Boost applied to reinforced nodes.
    pub reinforce_boost: f32,
    /// Hand nodes to the archival sink before pruning them.
    pub archive: bool,
    /// Reference time; `None` means the wall clock at call time.
    #[serde(skip)]
    pub now: Option<DateTime<Utc>>,
}

impl Default for ConsolidationOptions {
    fn default() -> Self {
        Self {
            reinforce_window_hours: 24.0,
            reinforce_boost: 0.1,
            archive: false,
            now: None,
        }
    }
}

impl ConsolidationOptions {
    /// Options with reinforcement disabled and archival off.
    pub fn decay_only() -> Self {
        Self {
            reinforce_window_hours: 0.0,
            ..Default::default()
        }
    }

    /// Pin the reference time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

/// Counters reported by a consolidation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationMetrics {
    /// Nodes whose relevance was decayed.
    pub decayed_count: u64,
    /// Nodes boosted for recent access.
    pub reinforced_count: u64,
    /// Nodes handed to the archival sink successfully.
    pub archived_count: u64,
    /// Nodes removed for falling below the prune threshold.
    pub pruned_count: u64,
    /// Nodes removed to bring a type back under quota.
    pub evicted_count: u64,
    /// Wall time of the pass.
    pub duration_ms: u64,
    /// Nodes left after the pass.
    pub total_nodes: u64,
    /// Mean relevance after the pass, `0.0` for an empty graph.
    pub average_relevance: f32,
}

/// Inputs to `should_consolidate`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleCheck {
    /// When the previous pass ran, if ever.
    pub last_consolidation: Option<DateTime<Utc>>,
    /// Overrides the graph's `size_threshold`.
    pub size_threshold: Option<usize>,
    /// Overrides the graph's `min_interval_minutes`.
    pub min_interval_minutes: Option<u64>,
    /// Reference time; `None` means the wall clock.
    pub now: Option<DateTime<Utc>>,
}

/// Overrides for `preview`. Unset fields use the graph configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreviewOptions {
    /// Decay rate to simulate.
    pub decay_rate: Option<f32>,
    /// Prune threshold to compare against.
    pub prune_threshold: Option<f32>,
}

/// A node that would fall below the prune threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneCandidate {
    /// Node id.
    pub id: NodeId,
    /// Relevance before the simulated decay.
    pub current_relevance: f32,
    /// Relevance after the simulated decay.
    pub projected_relevance: f32,
}

/// Non-mutating summary of what a consolidation pass would prune.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationPreview {
    /// Current node count.
    pub node_count: u64,
    /// Number of nodes below the prune threshold after simulated decay.
    pub below_threshold_count: u64,
    /// Those nodes, ascending by projected relevance.
    pub below_threshold: Vec<PruneCandidate>,
    /// Mean relevance now.
    pub average_relevance_before: f32,
    /// Mean relevance after simulated decay.
    pub average_relevance_after: f32,
}
