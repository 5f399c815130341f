//! SQLite schema creation and migration.
//!
//! Creates the tables used by the persistent vector store and the archive.

use rusqlite::Connection;

/// Current schema version.
const SCHEMA_VERSION: u32 = 2;

/// Run all migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Get the current schema version from the database.
fn get_schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "user_version", version)
}

/// Version 1: vector records, one row per distinct content per agent.
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS vector_records (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            memory_type TEXT,
            source TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            indexed_at TEXT NOT NULL,
            UNIQUE (agent_id, content_hash)
        );
        CREATE INDEX IF NOT EXISTS idx_vector_agent ON vector_records(agent_id);
        CREATE INDEX IF NOT EXISTS idx_vector_agent_type ON vector_records(agent_id, memory_type);
        CREATE INDEX IF NOT EXISTS idx_vector_indexed_at ON vector_records(agent_id, indexed_at);
        ",
    )?;
    Ok(())
}

/// Version 2: archived graph nodes.
fn migrate_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS archived_nodes (
            agent_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            node_type TEXT NOT NULL,
            relevance REAL NOT NULL,
            snapshot BLOB NOT NULL,
            archived_at TEXT NOT NULL,
            PRIMARY KEY (agent_id, node_id)
        );
        CREATE INDEX IF NOT EXISTS idx_archived_agent_time ON archived_nodes(agent_id, archived_at);
        ",
    )?;
    Ok(())
}
