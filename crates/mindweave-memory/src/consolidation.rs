//! Memory consolidation: decay, reinforcement, archival, pruning and quota
//! eviction over a graph snapshot.
//!
//! A pass applies the five steps once, in that order, and returns a new
//! snapshot. The input graph is never modified. A pass whose reference time
//! is not later than the graph's previous pass skips decay and
//! reinforcement, so repeating a pass at the same instant changes nothing.

use crate::archive::ArchiveSink;
use crate::events::{EventSink, NoopSink};
use crate::graph::Graph;
use crate::quota;
use crate::similarity::average_relevance;
use chrono::{DateTime, Duration, Utc};
use mindweave_types::agent::AgentId;
use mindweave_types::config::validate_options;
use mindweave_types::consolidation::{
    ConsolidationMetrics, ConsolidationOptions, ConsolidationPreview, PreviewOptions,
    PruneCandidate, ScheduleCheck,
};
use mindweave_types::error::{MindweaveError, MindweaveResult};
use mindweave_types::event::{MemoryEvent, MemoryEventPayload};
use mindweave_types::memory::{check_unit, clamp_relevance, Node, NodeId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Memory consolidation engine.
#[derive(Clone)]
pub struct ConsolidationEngine {
    archive: Option<Arc<dyn ArchiveSink>>,
    events: Arc<dyn EventSink>,
}

impl Default for ConsolidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsolidationEngine {
    /// Engine without an archive that emits nothing.
    pub fn new() -> Self {
        Self {
            archive: None,
            events: Arc::new(NoopSink),
        }
    }

    /// Hand pruned nodes to this sink when a pass runs with `archive: true`.
    pub fn with_archive(mut self, archive: Arc<dyn ArchiveSink>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Emit pass events to this sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Run one consolidation pass.
    pub fn consolidate(
        &self,
        agent_id: &AgentId,
        graph: &Graph,
        options: &ConsolidationOptions,
    ) -> MindweaveResult<(Graph, ConsolidationMetrics)> {
        if agent_id != graph.agent_id() {
            return Err(MindweaveError::InvalidInput(format!(
                "graph belongs to agent {}, not {agent_id}",
                graph.agent_id()
            )));
        }
        graph.validate()?;
        validate_options(options)?;

        let start = std::time::Instant::now();
        let now = options.now.unwrap_or_else(Utc::now);
        let config = graph.config().clone();
        let mut next = graph.clone();
        let mut metrics = ConsolidationMetrics::default();

        let repeat = graph.last_consolidated_at().is_some_and(|last| now <= last);
        if repeat {
            debug!(agent = %agent_id, "Pass at or before previous consolidation, skipping decay");
        } else {
            metrics.decayed_count = decay(&mut next, config.decay_rate);
            metrics.reinforced_count = reinforce_recent(&mut next, options, now);
        }

        let doomed: Vec<NodeId> = candidates_for_pruning(&next, config.prune_threshold)
            .into_iter()
            .map(|n| n.id.clone())
            .collect();

        if options.archive && !doomed.is_empty() {
            metrics.archived_count = self.archive_nodes(agent_id, &next, &doomed);
        }

        let pruned: HashSet<NodeId> = doomed.iter().cloned().collect();
        next.remove_nodes(&pruned);
        metrics.pruned_count = doomed.len() as u64;

        let evicted = quota::over_quota_victims(&config, next.nodes());
        let evicted_set: HashSet<NodeId> = evicted.iter().cloned().collect();
        next.remove_nodes(&evicted_set);
        metrics.evicted_count = evicted.len() as u64;

        next.mark_consolidated(now);
        metrics.total_nodes = next.node_count() as u64;
        metrics.average_relevance = average_relevance(next.nodes());
        metrics.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            agent = %agent_id,
            decayed = metrics.decayed_count,
            reinforced = metrics.reinforced_count,
            archived = metrics.archived_count,
            pruned = metrics.pruned_count,
            evicted = metrics.evicted_count,
            total = metrics.total_nodes,
            "Consolidation complete"
        );
        self.emit_pass(agent_id, &metrics, doomed, evicted);

        Ok((next, metrics))
    }

    fn archive_nodes(&self, agent_id: &AgentId, graph: &Graph, ids: &[NodeId]) -> u64 {
        let Some(ref archive) = self.archive else {
            warn!(agent = %agent_id, "Archival requested but no archive configured");
            return 0;
        };
        let mut archived = 0;
        for id in ids {
            let Ok(node) = graph.get_node(id) else {
                continue;
            };
            match archive.archive(agent_id, node) {
                Ok(()) => archived += 1,
                Err(e) => {
                    warn!(agent = %agent_id, node_id = %id, error = %e, "Failed to archive node, pruning anyway");
                }
            }
        }
        archived
    }

    fn emit_pass(
        &self,
        agent_id: &AgentId,
        metrics: &ConsolidationMetrics,
        pruned: Vec<NodeId>,
        evicted: Vec<NodeId>,
    ) {
        let emit = |payload: MemoryEventPayload| {
            self.events
                .emit(MemoryEvent::new(agent_id.clone(), payload));
        };
        if metrics.decayed_count > 0 {
            emit(MemoryEventPayload::NodesDecayed {
                count: metrics.decayed_count,
            });
        }
        if metrics.reinforced_count > 0 {
            emit(MemoryEventPayload::NodesReinforced {
                count: metrics.reinforced_count,
            });
        }
        if metrics.archived_count > 0 {
            emit(MemoryEventPayload::NodesArchived {
                count: metrics.archived_count,
            });
        }
        if !pruned.is_empty() {
            emit(MemoryEventPayload::NodesPruned { node_ids: pruned });
        }
        if !evicted.is_empty() {
            emit(MemoryEventPayload::NodesEvicted { node_ids: evicted });
        }
        emit(MemoryEventPayload::ConsolidationCompleted {
            total_nodes: metrics.total_nodes,
            duration_ms: metrics.duration_ms,
        });
    }
}

/// Run one pass with no archive and no event sink.
pub fn consolidate(
    agent_id: &AgentId,
    graph: &Graph,
    options: &ConsolidationOptions,
) -> MindweaveResult<(Graph, ConsolidationMetrics)> {
    ConsolidationEngine::new().consolidate(agent_id, graph, options)
}

fn decay(graph: &mut Graph, rate: f32) -> u64 {
    let mut count = 0;
    for node in graph.nodes_mut().values_mut().filter(|n| !n.pinned) {
        node.set_relevance(node.relevance - rate);
        count += 1;
    }
    count
}

fn reinforce_recent(graph: &mut Graph, options: &ConsolidationOptions, now: DateTime<Utc>) -> u64 {
    if options.reinforce_window_hours <= 0.0 {
        return 0;
    }
    let window = Duration::milliseconds((options.reinforce_window_hours * 3_600_000.0) as i64);
    let cutoff = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut count = 0;
    for node in graph
        .nodes_mut()
        .values_mut()
        .filter(|n| n.last_accessed_at >= cutoff)
    {
        node.set_relevance(node.relevance + options.reinforce_boost);
        count += 1;
    }
    count
}

/// Whether a pass is due: the graph outgrew its size threshold, or the last
/// pass is older than the minimum interval.
///
/// `check.last_consolidation` falls back to the graph's own record.
pub fn should_consolidate(graph: &Graph, check: &ScheduleCheck) -> bool {
    let size_threshold = check.size_threshold.unwrap_or(graph.config().size_threshold);
    if graph.node_count() > size_threshold {
        return true;
    }
    let Some(last) = check.last_consolidation.or(graph.last_consolidated_at()) else {
        return false;
    };
    let interval = check
        .min_interval_minutes
        .unwrap_or(graph.config().min_interval_minutes);
    let now = check.now.unwrap_or_else(Utc::now);
    now - last > Duration::minutes(interval.min(u32::MAX as u64) as i64)
}

/// Non-pinned nodes strictly below `threshold`, lowest relevance first.
pub fn candidates_for_pruning(graph: &Graph, threshold: f32) -> Vec<&Node> {
    let mut out: Vec<&Node> = graph
        .nodes()
        .filter(|n| !n.pinned && n.relevance < threshold)
        .collect();
    out.sort_by(|a, b| quota::eviction_order(a, b));
    out
}

/// Summarise what a decay pass would push below the prune threshold,
/// without touching the graph.
pub fn preview(graph: &Graph, options: &PreviewOptions) -> MindweaveResult<ConsolidationPreview> {
    let decay_rate = options.decay_rate.unwrap_or(graph.config().decay_rate);
    let threshold = options
        .prune_threshold
        .unwrap_or(graph.config().prune_threshold);
    check_unit("decay_rate", decay_rate)?;
    check_unit("prune_threshold", threshold)?;

    let projected = |n: &Node| {
        if n.pinned {
            n.relevance
        } else {
            clamp_relevance(n.relevance - decay_rate)
        }
    };

    let mut below_threshold: Vec<PruneCandidate> = graph
        .nodes()
        .filter(|n| !n.pinned)
        .filter_map(|n| {
            let after = projected(n);
            (after < threshold).then(|| PruneCandidate {
                id: n.id.clone(),
                current_relevance: n.relevance,
                projected_relevance: after,
            })
        })
        .collect();
    below_threshold.sort_by(|a, b| {
        a.projected_relevance
            .partial_cmp(&b.projected_relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let count = graph.node_count();
    let average_relevance_after = if count == 0 {
        0.0
    } else {
        (graph.nodes().map(|n| projected(n) as f64).sum::<f64>() / count as f64) as f32
    };

    Ok(ConsolidationPreview {
        node_count: count as u64,
        below_threshold_count: below_threshold.len() as u64,
        below_threshold,
        average_relevance_before: average_relevance(graph.nodes()),
        average_relevance_after,
    })
}
