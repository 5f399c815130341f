//! End-to-end: build an agent graph, consolidate it with archival, then mirror
//! what survives into a dual-mode semantic index and read it back after a
//! restart.

use chrono::{Duration, Utc};
use mindweave_memory::consolidation::should_consolidate;
use mindweave_memory::query::NodeQuery;
use mindweave_memory::{
    ArchiveSink, ConsolidationEngine, Graph, GraphStore, HashEmbeddingDriver, MemoryEventBus,
    PersistentVectorStore, SemanticIndex, SqliteArchive, SqliteVectorStore,
};
use mindweave_types::agent::AgentId;
use mindweave_types::config::IndexSettings;
use mindweave_types::consolidation::{ConsolidationOptions, ScheduleCheck};
use mindweave_types::event::MemoryEventPayload;
use mindweave_types::index::{
    BackendMode, EntryMetadata, IndexOptions, RecallOptions, SyncOptions, WarmOptions,
};
use mindweave_types::memory::{AddOutcome, NewNode, NodeType, RelationType};
use std::sync::Arc;

fn dual_settings() -> IndexSettings {
    IndexSettings {
        backend: BackendMode::Dual,
        max_entries: 100,
        default_threshold: 0.3,
        default_limit: 10,
    }
}

#[tokio::test]
async fn test_graph_consolidation_and_index_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let agent = AgentId::from("agent-42");
    let bus = Arc::new(MemoryEventBus::new());
    let store = GraphStore::default().with_events(bus.clone());

    // Build the graph.
    let graph = Graph::new(agent.clone());
    let (graph, fact) = store
        .add_node(
            &graph,
            NewNode::new(NodeType::Fact, "Paris is the capital of France").with_relevance(0.15),
        )
        .unwrap();
    let (graph, skill) = store
        .add_node(
            &graph,
            NewNode::new(NodeType::Skill, "Writes idiomatic async Rust").with_relevance(0.9),
        )
        .unwrap();
    let (graph, stale) = store
        .add_node(
            &graph,
            NewNode::new(NodeType::Observation, "Weather was cloudy on Tuesday")
                .with_relevance(0.12),
        )
        .unwrap();
    let (graph, _) = store
        .add_node(
            &graph,
            NewNode::new(NodeType::Goal, "Ship the release").pinned(),
        )
        .unwrap();
    let (graph, _) = store
        .link(&graph, fact.id(), skill.id(), RelationType::RelatesTo)
        .unwrap();
    let (graph, _) = store
        .link(&graph, stale.id(), fact.id(), RelationType::Supports)
        .unwrap();
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.edges().len(), 2);

    // Same content reinforces instead of inserting.
    let (graph, dup) = store
        .add_node(
            &graph,
            NewNode::new(NodeType::Fact, "paris is the capital of france"),
        )
        .unwrap();
    assert!(matches!(dup, AddOutcome::Reinforced(ref id) if id == fact.id()));
    assert_eq!(graph.node_count(), 4);
    assert!((graph.get_node(fact.id()).unwrap().relevance - 0.25).abs() < 1e-5);

    // Consolidate with archival.
    let archive = Arc::new(SqliteArchive::open(&dir.path().join("archive.db")).unwrap());
    let engine = ConsolidationEngine::new()
        .with_archive(archive.clone() as Arc<dyn ArchiveSink>)
        .with_events(bus.clone());
    let now = Utc::now() + Duration::minutes(1);
    let options = ConsolidationOptions {
        archive: true,
        ..ConsolidationOptions::decay_only()
    }
    .at(now);
    let (graph, metrics) = engine.consolidate(&agent, &graph, &options).unwrap();

    assert_eq!(metrics.decayed_count, 3);
    assert_eq!(metrics.pruned_count, 1);
    assert_eq!(metrics.archived_count, 1);
    assert_eq!(metrics.total_nodes, 3);
    assert!(!graph.contains(stale.id()));
    assert_eq!(graph.edges().len(), 1);
    assert_eq!(archive.count(&agent).unwrap(), 1);
    assert_eq!(
        archive.list(&agent).unwrap()[0].content,
        "Weather was cloudy on Tuesday"
    );
    assert_eq!(graph.last_consolidated_at(), Some(now));
    assert!(bus
        .history(50)
        .iter()
        .any(|e| matches!(e.payload, MemoryEventPayload::ConsolidationCompleted { .. })));

    // A second pass at the same instant changes nothing.
    let (again, repeat) = engine.consolidate(&agent, &graph, &options).unwrap();
    assert_eq!(repeat.decayed_count, 0);
    assert_eq!(again.nodes().count(), graph.nodes().count());

    let check = ScheduleCheck {
        now: Some(now + Duration::minutes(5)),
        ..Default::default()
    };
    assert!(!should_consolidate(&graph, &check));

    // Index what survived into a dual-mode index backed by SQLite.
    let db_path = dir.path().join("vectors.db");
    let vectors = Arc::new(SqliteVectorStore::open(&db_path).unwrap());
    let index = SemanticIndex::new(
        agent.clone(),
        dual_settings(),
        Arc::new(HashEmbeddingDriver::default()),
        Some(vectors.clone()),
    )
    .unwrap()
    .with_events(bus.clone());

    let surviving: Vec<_> = graph
        .query(&NodeQuery::new())
        .into_iter()
        .map(|n| (n.content.clone(), n.node_type.clone()))
        .collect();
    for (content, node_type) in &surviving {
        index
            .index(
                content,
                EntryMetadata::typed(node_type.clone()),
                IndexOptions::default(),
            )
            .await
            .unwrap();
    }
    let report = index.sync_to_persistent(SyncOptions::default()).await.unwrap();
    assert_eq!(report.failed_batches, 0);
    assert_eq!(vectors.count(&agent).await.unwrap(), surviving.len() as u64);
    drop(index);
    drop(vectors);

    // Restart: a fresh index warms its cache from disk.
    let reopened = Arc::new(SqliteVectorStore::open(&db_path).unwrap());
    let index = SemanticIndex::new(
        agent.clone(),
        dual_settings(),
        Arc::new(HashEmbeddingDriver::default()),
        Some(reopened),
    )
    .unwrap();
    let loaded = index.warm_cache(WarmOptions::default()).await.unwrap();
    assert_eq!(loaded, surviving.len());

    let hits = index
        .recall("Writes idiomatic async Rust", &RecallOptions::default())
        .await
        .unwrap();
    assert_eq!(hits[0].content, "Writes idiomatic async Rust");
    assert_eq!(hits[0].metadata.memory_type, Some(NodeType::Skill));
}
