//! Schema-aware backend on SQLite.
//!
//! Property keys are typed and every write is checked against the catalog.
//! Composite indices live in `graph_index_entries`, maintained on commit for
//! every touched element and back-filled when an index is created. The
//! connection mutex is the engine's own lock: it is held while a read runs or
//! a commit is applied, never for a transaction's whole lifetime.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use crate::{
    backend::{GraphBackend, PropertyKey, SchemaManager, SchemaTransaction},
    cache::{IndexCache, IndexDef},
    capabilities::Capabilities,
    config::{AUTO_CREATE_KEYS_KEY, GraphConfig, SQLITE_PATH_KEY},
    errors::GraphError,
    schema::ensure_schema,
    staging::{CommittedStore, StagedTransaction, WriteSet},
    types::{ElementKind, ElementRef, GraphEdge, GraphNode, Properties, PropertyValue, ValueType},
};

const CAPABILITIES: Capabilities = Capabilities {
    prefer_big_transactions: true,
    needs_draining: false,
    supports_unique_index: true,
};

pub struct SqlStore {
    conn: Mutex<Option<Connection>>,
    next_id: AtomicI64,
    auto_create_keys: bool,
    indices: IndexCache,
}

impl SqlStore {
    fn open(config: &GraphConfig) -> Result<Self, GraphError> {
        let conn = match config.sqlite_path() {
            Some(path) => Connection::open(&path).map_err(|e| {
                GraphError::unavailable(format!("cannot open {}: {e}", path.display()))
            })?,
            None => Connection::open_in_memory()
                .map_err(|e| GraphError::unavailable(e.to_string()))?,
        };
        ensure_schema(&conn)?;
        let max_id: i64 = conn
            .query_row(
                "SELECT MAX(id) FROM (SELECT MAX(id) AS id FROM graph_nodes \
                 UNION ALL SELECT MAX(id) AS id FROM graph_edges)",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .map_err(|e| GraphError::unavailable(e.to_string()))?
            .unwrap_or(0);
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            next_id: AtomicI64::new(max_id + 1),
            auto_create_keys: config.auto_create_keys()?,
            indices: IndexCache::new(),
        })
    }

    fn with_conn<R>(
        &self,
        work: impl FnOnce(&Connection) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        let guard = self.conn.lock();
        let conn = (*guard).as_ref().ok_or_else(closed)?;
        work(conn)
    }

    fn indices_for(
        &self,
        conn: &Connection,
        kind: ElementKind,
    ) -> Result<Arc<Vec<IndexDef>>, GraphError> {
        if let Some(cached) = self.indices.get(kind) {
            return Ok(cached);
        }
        let defs = Arc::new(load_index_defs(conn, kind)?);
        self.indices.insert(kind, Arc::clone(&defs));
        Ok(defs)
    }

    /// Commit-time key check; auto-creates undeclared keys when allowed.
    fn resolve_key(
        &self,
        conn: &Connection,
        key: &str,
        value: &PropertyValue,
    ) -> Result<(), GraphError> {
        match declared_type(conn, key)? {
            Some(expected) if expected != value.value_type() => Err(GraphError::PropertyType {
                property: key.to_string(),
                expected,
                actual: value.value_type(),
            }),
            Some(_) => Ok(()),
            None if self.auto_create_keys => {
                conn.execute(
                    "INSERT INTO schema_property_keys(name, value_type) VALUES(?1, ?2)",
                    params![key, value.value_type().as_str()],
                )
                .map_err(|e| GraphError::query(e.to_string()))?;
                debug!(property = key, value_type = %value.value_type(), "auto-created property key");
                Ok(())
            }
            None => Err(undeclared(key)),
        }
    }

    /// Rebuilds the index entries of every touched element. All stale
    /// entries go first, so a value moving between elements of one commit
    /// is never checked against an entry that is about to be replaced.
    fn reindex(&self, conn: &Connection, touched: &BTreeSet<ElementRef>) -> Result<(), GraphError> {
        for kind in [ElementKind::Node, ElementKind::Edge] {
            let defs = self.indices_for(conn, kind)?;
            if defs.is_empty() {
                continue;
            }
            let ids: Vec<i64> = touched
                .iter()
                .filter(|element| element.kind() == kind)
                .map(|element| element.id())
                .collect();
            for def in defs.iter() {
                for id in &ids {
                    conn.execute(
                        "DELETE FROM graph_index_entries WHERE index_name=?1 AND element_id=?2",
                        params![def.name, id],
                    )
                    .map_err(|e| GraphError::query(e.to_string()))?;
                }
            }
            for id in &ids {
                let props = load_properties(conn, kind, *id)?;
                for def in defs.iter() {
                    insert_index_entry(conn, def, *id, &props)?;
                }
            }
        }
        Ok(())
    }
}

impl CommittedStore for SqlStore {
    fn backend_name(&self) -> &'static str {
        SqliteBackend::NAME
    }

    fn allocate_id(&self) -> Result<i64, GraphError> {
        self.with_conn(|_| Ok(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn load_node(&self, id: i64) -> Result<Option<GraphNode>, GraphError> {
        self.with_conn(|conn| {
            let label: Option<String> = conn
                .query_row("SELECT label FROM graph_nodes WHERE id=?1", params![id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(|e| GraphError::query(e.to_string()))?;
            match label {
                Some(label) => Ok(Some(GraphNode {
                    id,
                    label,
                    properties: load_properties(conn, ElementKind::Node, id)?,
                })),
                None => Ok(None),
            }
        })
    }

    fn load_edge(&self, id: i64) -> Result<Option<GraphEdge>, GraphError> {
        self.with_conn(|conn| {
            let row: Option<(i64, i64, String)> = conn
                .query_row(
                    "SELECT from_id, to_id, label FROM graph_edges WHERE id=?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| GraphError::query(e.to_string()))?;
            match row {
                Some((from_id, to_id, label)) => Ok(Some(GraphEdge {
                    id,
                    from_id,
                    to_id,
                    label,
                    properties: load_properties(conn, ElementKind::Edge, id)?,
                })),
                None => Ok(None),
            }
        })
    }

    fn candidates(
        &self,
        kind: ElementKind,
        filter: &[(&str, PropertyValue)],
    ) -> Result<BTreeSet<i64>, GraphError> {
        self.with_conn(|conn| {
            if filter.is_empty() {
                let sql = match kind {
                    ElementKind::Node => "SELECT id FROM graph_nodes",
                    ElementKind::Edge => "SELECT id FROM graph_edges",
                };
                return collect_ids(conn, sql, params![]);
            }
            let mut wanted: BTreeMap<&str, &PropertyValue> = BTreeMap::new();
            for (key, value) in filter {
                wanted.insert(*key, value);
            }
            let defs = self.indices_for(conn, kind)?;
            let exact = defs
                .iter()
                .find(|def| def.keys.iter().map(String::as_str).eq(wanted.keys().copied()));
            if let Some(def) = exact {
                let entry = encode_entry(wanted.values().copied())?;
                return collect_ids(
                    conn,
                    "SELECT element_id FROM graph_index_entries WHERE index_name=?1 AND entry=?2",
                    params![def.name, entry],
                );
            }
            let mut result: Option<BTreeSet<i64>> = None;
            for (key, value) in wanted {
                let ids = collect_ids(
                    conn,
                    "SELECT element_id FROM graph_properties \
                     WHERE element_kind=?1 AND key=?2 AND value=?3",
                    params![kind.as_str(), key, encode_value(value)?],
                )?;
                result = Some(match result {
                    Some(acc) => acc.intersection(&ids).copied().collect(),
                    None => ids,
                });
            }
            Ok(result.unwrap_or_default())
        })
    }

    fn check_property(
        &self,
        _kind: ElementKind,
        key: &str,
        value: &PropertyValue,
    ) -> Result<(), GraphError> {
        finite(key, value)?;
        self.with_conn(|conn| match declared_type(conn, key)? {
            Some(expected) if expected != value.value_type() => Err(GraphError::PropertyType {
                property: key.to_string(),
                expected,
                actual: value.value_type(),
            }),
            None if !self.auto_create_keys => Err(undeclared(key)),
            _ => Ok(()),
        })
    }

    fn apply(&self, writes: WriteSet) -> Result<(), GraphError> {
        let mut guard = self.conn.lock();
        let conn = (*guard).as_mut().ok_or_else(closed)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| GraphError::query(e.to_string()))?;

        for (_, key, value) in writes.written_properties() {
            self.resolve_key(&tx, key, value)?;
        }
        for node in writes.nodes.values() {
            tx.execute(
                "INSERT INTO graph_nodes(id, label) VALUES(?1, ?2)",
                params![node.id, node.label],
            )
            .map_err(|e| GraphError::query(e.to_string()))?;
            store_properties(&tx, ElementKind::Node, node.id, &node.properties)?;
        }
        for edge in writes.edges.values() {
            if !node_exists(&tx, edge.from_id)? || !node_exists(&tx, edge.to_id)? {
                return Err(GraphError::invalid_input(format!(
                    "edge {} endpoints must reference existing nodes",
                    edge.id
                )));
            }
            tx.execute(
                "INSERT INTO graph_edges(id, from_id, to_id, label) VALUES(?1, ?2, ?3, ?4)",
                params![edge.id, edge.from_id, edge.to_id, edge.label],
            )
            .map_err(|e| GraphError::query(e.to_string()))?;
            store_properties(&tx, ElementKind::Edge, edge.id, &edge.properties)?;
        }
        for (element, props) in &writes.updates {
            if !element_exists(&tx, *element)? {
                return Err(GraphError::not_found(element.to_string()));
            }
            store_properties(&tx, element.kind(), element.id(), props)?;
        }
        self.reindex(&tx, &writes.touched())?;
        tx.commit().map_err(|e| GraphError::query(e.to_string()))
    }
}

impl SchemaManager for SqlStore {
    fn schema_transaction<R>(
        &self,
        work: impl FnOnce(&mut dyn SchemaTransaction) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        let mut guard = self.conn.lock();
        let conn = (*guard).as_mut().ok_or_else(closed)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| GraphError::query(e.to_string()))?;
        let result = work(&mut SqlSchemaTransaction { conn: &*tx });
        // Cached definitions may have been loaded mid-transaction.
        self.indices.clear();
        let value = result?;
        tx.commit().map_err(|e| GraphError::query(e.to_string()))?;
        Ok(value)
    }
}

struct SqlSchemaTransaction<'c> {
    conn: &'c Connection,
}

impl SchemaTransaction for SqlSchemaTransaction<'_> {
    fn index_names(&mut self) -> Result<BTreeSet<String>, GraphError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM schema_indices")
            .map_err(|e| GraphError::query(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| GraphError::query(e.to_string()))?;
        let mut names = BTreeSet::new();
        for name in rows {
            names.insert(name.map_err(|e| GraphError::query(e.to_string()))?);
        }
        Ok(names)
    }

    fn unique_index_names(&mut self) -> Result<BTreeSet<String>, GraphError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM schema_indices WHERE is_unique <> 0")
            .map_err(|e| GraphError::query(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| GraphError::query(e.to_string()))?;
        let mut names = BTreeSet::new();
        for name in rows {
            names.insert(name.map_err(|e| GraphError::query(e.to_string()))?);
        }
        Ok(names)
    }

    fn property_keys(&mut self) -> Result<BTreeMap<String, ValueType>, GraphError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, value_type FROM schema_property_keys")
            .map_err(|e| GraphError::query(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| GraphError::query(e.to_string()))?;
        let mut keys = BTreeMap::new();
        for row in rows {
            let (name, value_type) = row.map_err(|e| GraphError::query(e.to_string()))?;
            keys.insert(name, value_type.parse()?);
        }
        Ok(keys)
    }

    fn property_key(&mut self, name: &str) -> Result<Option<PropertyKey>, GraphError> {
        Ok(declared_type(self.conn, name)?.map(|value_type| PropertyKey {
            name: name.to_string(),
            value_type,
        }))
    }

    fn create_property_key(
        &mut self,
        name: &str,
        value_type: ValueType,
    ) -> Result<PropertyKey, GraphError> {
        self.conn
            .execute(
                "INSERT INTO schema_property_keys(name, value_type) VALUES(?1, ?2)",
                params![name, value_type.as_str()],
            )
            .map_err(|e| GraphError::query(e.to_string()))?;
        Ok(PropertyKey {
            name: name.to_string(),
            value_type,
        })
    }

    fn create_composite_index(
        &mut self,
        name: &str,
        kind: ElementKind,
        keys: &[PropertyKey],
        unique: bool,
    ) -> Result<(), GraphError> {
        if keys.is_empty() {
            return Err(GraphError::invalid_input(format!("index {name} has no keys")));
        }
        self.conn
            .execute(
                "INSERT INTO schema_indices(name, element_kind, is_unique) VALUES(?1, ?2, ?3)",
                params![name, kind.as_str(), unique],
            )
            .map_err(|e| GraphError::query(e.to_string()))?;
        for key in keys {
            self.conn
                .execute(
                    "INSERT INTO schema_index_keys(index_name, key_name) VALUES(?1, ?2)",
                    params![name, key.name],
                )
                .map_err(|e| GraphError::query(e.to_string()))?;
        }

        let mut sorted: Vec<String> = keys.iter().map(|k| k.name.clone()).collect();
        sorted.sort();
        let def = IndexDef {
            name: name.to_string(),
            keys: sorted,
            unique,
        };
        let sql = match kind {
            ElementKind::Node => "SELECT id FROM graph_nodes ORDER BY id",
            ElementKind::Edge => "SELECT id FROM graph_edges ORDER BY id",
        };
        let mut backfilled = 0usize;
        for id in collect_ids(self.conn, sql, params![])? {
            let props = load_properties(self.conn, kind, id)?;
            if insert_index_entry(self.conn, &def, id, &props)? {
                backfilled += 1;
            }
        }
        debug!(index = name, backfilled, "back-filled composite index");
        Ok(())
    }
}

pub struct SqliteBackend {
    store: Arc<SqlStore>,
}

impl SqliteBackend {
    pub fn in_memory() -> Result<Self, GraphError> {
        Self::open(&GraphConfig::sqlite_in_memory())
    }

    pub fn store(&self) -> &SqlStore {
        &self.store
    }
}

impl GraphBackend for SqliteBackend {
    type Tx = StagedTransaction<SqlStore>;
    type Schema = SqlStore;

    const NAME: &'static str = "sqlite";

    fn open(config: &GraphConfig) -> Result<Self, GraphError> {
        config.log_unknown(&[SQLITE_PATH_KEY, AUTO_CREATE_KEYS_KEY]);
        Ok(Self {
            store: Arc::new(SqlStore::open(config)?),
        })
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn begin_native(&self) -> Result<Self::Tx, GraphError> {
        self.store.with_conn(|_| Ok(()))?;
        Ok(StagedTransaction::new(Arc::clone(&self.store)))
    }

    fn schema(&self) -> Option<&Self::Schema> {
        Some(&*self.store)
    }

    fn shutdown(&self) -> Result<(), GraphError> {
        let conn = self.store.conn.lock().take();
        if let Some(conn) = conn {
            conn.close()
                .map_err(|(_, e)| GraphError::unavailable(e.to_string()))?;
        }
        self.store.indices.clear();
        Ok(())
    }
}

fn closed() -> GraphError {
    GraphError::unavailable("sqlite backend has been shut down")
}

fn undeclared(key: &str) -> GraphError {
    GraphError::invalid_input(format!("property key `{key}` is not declared"))
}

/// JSON has no NaN or infinity; serde_json would write them as `null`.
fn finite(key: &str, value: &PropertyValue) -> Result<(), GraphError> {
    match value {
        PropertyValue::Double(v) if !v.is_finite() => Err(GraphError::invalid_input(format!(
            "property `{key}` holds non-finite double {v}"
        ))),
        _ => Ok(()),
    }
}

fn encode_value(value: &PropertyValue) -> Result<String, GraphError> {
    finite("value", value)?;
    serde_json::to_string(value).map_err(|e| GraphError::invalid_input(e.to_string()))
}

fn decode_value(raw: &str) -> Result<PropertyValue, GraphError> {
    serde_json::from_str(raw).map_err(|e| GraphError::query(format!("corrupt property value: {e}")))
}

/// Values in sorted key order, so one entry string per value tuple.
fn encode_entry<'a>(values: impl Iterator<Item = &'a PropertyValue>) -> Result<String, GraphError> {
    let values: Vec<&PropertyValue> = values.collect();
    serde_json::to_string(&values).map_err(|e| GraphError::invalid_input(e.to_string()))
}

fn declared_type(conn: &Connection, key: &str) -> Result<Option<ValueType>, GraphError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_type FROM schema_property_keys WHERE name=?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| GraphError::query(e.to_string()))?;
    raw.map(|value_type| value_type.parse()).transpose()
}

fn load_index_defs(conn: &Connection, kind: ElementKind) -> Result<Vec<IndexDef>, GraphError> {
    let mut stmt = conn
        .prepare(
            "SELECT i.name, i.is_unique, k.key_name FROM schema_indices i \
             JOIN schema_index_keys k ON k.index_name = i.name \
             WHERE i.element_kind=?1 ORDER BY i.name, k.key_name",
        )
        .map_err(|e| GraphError::query(e.to_string()))?;
    let rows = stmt
        .query_map(params![kind.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| GraphError::query(e.to_string()))?;
    let mut defs: Vec<IndexDef> = Vec::new();
    for row in rows {
        let (name, unique, key) = row.map_err(|e| GraphError::query(e.to_string()))?;
        match defs.last_mut() {
            Some(def) if def.name == name => def.keys.push(key),
            _ => defs.push(IndexDef {
                name,
                keys: vec![key],
                unique,
            }),
        }
    }
    Ok(defs)
}

fn load_properties(conn: &Connection, kind: ElementKind, id: i64) -> Result<Properties, GraphError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT key, value FROM graph_properties WHERE element_kind=?1 AND element_id=?2",
        )
        .map_err(|e| GraphError::query(e.to_string()))?;
    let rows = stmt
        .query_map(params![kind.as_str(), id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| GraphError::query(e.to_string()))?;
    let mut props = Properties::new();
    for row in rows {
        let (key, raw) = row.map_err(|e| GraphError::query(e.to_string()))?;
        props.insert(key, decode_value(&raw)?);
    }
    Ok(props)
}

fn store_properties(
    conn: &Connection,
    kind: ElementKind,
    id: i64,
    props: &Properties,
) -> Result<(), GraphError> {
    for (key, value) in props {
        conn.execute(
            "INSERT OR REPLACE INTO graph_properties(element_kind, element_id, key, value) \
             VALUES(?1, ?2, ?3, ?4)",
            params![kind.as_str(), id, key, encode_value(value)?],
        )
        .map_err(|e| GraphError::query(e.to_string()))?;
    }
    Ok(())
}

/// Writes the entry for `id` if it carries every indexed key. Returns whether
/// an entry was written.
fn insert_index_entry(
    conn: &Connection,
    def: &IndexDef,
    id: i64,
    props: &Properties,
) -> Result<bool, GraphError> {
    let mut values = Vec::with_capacity(def.keys.len());
    for key in &def.keys {
        match props.get(key) {
            Some(value) => values.push(value),
            None => return Ok(false),
        }
    }
    let entry = encode_entry(values.into_iter())?;
    if def.unique {
        let taken: Option<i64> = conn
            .query_row(
                "SELECT element_id FROM graph_index_entries \
                 WHERE index_name=?1 AND entry=?2 AND element_id<>?3 LIMIT 1",
                params![def.name, entry, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GraphError::query(e.to_string()))?;
        if taken.is_some() {
            return Err(GraphError::UniqueViolation {
                index: def.name.clone(),
                entry,
            });
        }
    }
    conn.execute(
        "INSERT OR IGNORE INTO graph_index_entries(index_name, entry, element_id) VALUES(?1, ?2, ?3)",
        params![def.name, entry, id],
    )
    .map_err(|e| GraphError::query(e.to_string()))?;
    Ok(true)
}

fn collect_ids(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<BTreeSet<i64>, GraphError> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| GraphError::query(e.to_string()))?;
    let rows = stmt
        .query_map(params, |row| row.get(0))
        .map_err(|e| GraphError::query(e.to_string()))?;
    let mut ids = BTreeSet::new();
    for id in rows {
        ids.insert(id.map_err(|e| GraphError::query(e.to_string()))?);
    }
    Ok(ids)
}

fn node_exists(conn: &Connection, id: i64) -> Result<bool, GraphError> {
    element_exists(conn, ElementRef::Node(id))
}

fn element_exists(conn: &Connection, element: ElementRef) -> Result<bool, GraphError> {
    let sql = match element {
        ElementRef::Node(_) => "SELECT 1 FROM graph_nodes WHERE id=?1",
        ElementRef::Edge(_) => "SELECT 1 FROM graph_edges WHERE id=?1",
    };
    let exists: Option<i64> = conn
        .query_row(sql, params![element.id()], |row| row.get(0))
        .optional()
        .map_err(|e| GraphError::query(e.to_string()))?;
    Ok(exists.is_some())
}
