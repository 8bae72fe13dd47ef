use rusqlite::Connection;

use crate::errors::GraphError;

/// Creates the element tables and the schema catalog if they are missing.
pub fn ensure_schema(conn: &Connection) -> Result<(), GraphError> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS graph_nodes (
            id    INTEGER PRIMARY KEY,
            label TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS graph_edges (
            id      INTEGER PRIMARY KEY,
            from_id INTEGER NOT NULL,
            to_id   INTEGER NOT NULL,
            label   TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS graph_properties (
            element_kind TEXT NOT NULL,
            element_id   INTEGER NOT NULL,
            key          TEXT NOT NULL,
            value        TEXT NOT NULL,
            PRIMARY KEY (element_kind, element_id, key)
        );
        CREATE TABLE IF NOT EXISTS schema_property_keys (
            name       TEXT PRIMARY KEY,
            value_type TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS schema_indices (
            name         TEXT PRIMARY KEY,
            element_kind TEXT NOT NULL,
            is_unique    INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS schema_index_keys (
            index_name TEXT NOT NULL REFERENCES schema_indices(name),
            key_name   TEXT NOT NULL REFERENCES schema_property_keys(name),
            PRIMARY KEY (index_name, key_name)
        );
        CREATE TABLE IF NOT EXISTS graph_index_entries (
            index_name TEXT NOT NULL REFERENCES schema_indices(name),
            entry      TEXT NOT NULL,
            element_id INTEGER NOT NULL,
            PRIMARY KEY (index_name, entry, element_id)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_from ON graph_edges(from_id);
        CREATE INDEX IF NOT EXISTS idx_edges_to ON graph_edges(to_id);
        CREATE INDEX IF NOT EXISTS idx_props_key_value ON graph_properties(element_kind, key, value);
        CREATE INDEX IF NOT EXISTS idx_index_entries_element ON graph_index_entries(element_id);
        "#,
    )
    .map_err(|e| GraphError::unavailable(format!("schema setup failed: {e}")))?;
    Ok(())
}
