#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use graphbridge::{
    Capabilities, EdgeSpec, ElementKind, ElementRef, GraphBackend, GraphConfig, GraphEdge,
    GraphError, GraphNode, GraphOps, NativeTransaction, NodeSpec, PropertyValue, SchemaManager,
    SchemaTransaction, ValueType, backend::PropertyKey,
};

/// Counts every native primitive the adapter invokes.
#[derive(Default)]
pub struct Calls {
    pub native_begins: AtomicUsize,
    pub native_commits: AtomicUsize,
    pub native_rollbacks: AtomicUsize,
    pub schema_transactions: AtomicUsize,
    pub schema_mutations: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordedSchema {
    pub property_keys: BTreeMap<String, ValueType>,
    /// index name -> (kind, key names, unique)
    pub indices: BTreeMap<String, (ElementKind, Vec<String>, bool)>,
}

pub struct RecordingSchema {
    calls: Arc<Calls>,
    state: Mutex<RecordedSchema>,
    pub fail_index_creation: bool,
}

impl RecordingSchema {
    pub fn state(&self) -> RecordedSchema {
        self.state.lock().unwrap().clone()
    }
}

impl SchemaManager for RecordingSchema {
    fn schema_transaction<R>(
        &self,
        work: impl FnOnce(&mut dyn SchemaTransaction) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        self.calls.schema_transactions.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let mut tx = RecordingSchemaTx {
            working: state.clone(),
            calls: &self.calls,
            fail_index_creation: self.fail_index_creation,
        };
        let value = work(&mut tx)?;
        *state = tx.working;
        Ok(value)
    }
}

struct RecordingSchemaTx<'a> {
    working: RecordedSchema,
    calls: &'a Calls,
    fail_index_creation: bool,
}

impl SchemaTransaction for RecordingSchemaTx<'_> {
    fn index_names(&mut self) -> Result<BTreeSet<String>, GraphError> {
        Ok(self.working.indices.keys().cloned().collect())
    }

    fn unique_index_names(&mut self) -> Result<BTreeSet<String>, GraphError> {
        Ok(self
            .working
            .indices
            .iter()
            .filter(|(_, (_, _, unique))| *unique)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn property_keys(&mut self) -> Result<BTreeMap<String, ValueType>, GraphError> {
        Ok(self.working.property_keys.clone())
    }

    fn property_key(&mut self, name: &str) -> Result<Option<PropertyKey>, GraphError> {
        Ok(self
            .working
            .property_keys
            .get(name)
            .map(|value_type| PropertyKey {
                name: name.to_string(),
                value_type: *value_type,
            }))
    }

    fn create_property_key(
        &mut self,
        name: &str,
        value_type: ValueType,
    ) -> Result<PropertyKey, GraphError> {
        self.calls.schema_mutations.fetch_add(1, Ordering::SeqCst);
        self.working
            .property_keys
            .insert(name.to_string(), value_type);
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
        self.calls.schema_mutations.fetch_add(1, Ordering::SeqCst);
        if self.fail_index_creation {
            return Err(GraphError::query("index build rejected"));
        }
        let keys = keys.iter().map(|k| k.name.clone()).collect();
        self.working
            .indices
            .insert(name.to_string(), (kind, keys, unique));
        Ok(())
    }
}

pub struct RecordingTx {
    calls: Arc<Calls>,
    next_id: i64,
}

impl GraphOps for RecordingTx {
    fn insert_node(&mut self, _node: NodeSpec) -> Result<i64, GraphError> {
        self.next_id += 1;
        Ok(self.next_id)
    }

    fn insert_edge(&mut self, _edge: EdgeSpec) -> Result<i64, GraphError> {
        self.next_id += 1;
        Ok(self.next_id)
    }

    fn set_property(
        &mut self,
        _element: ElementRef,
        _key: &str,
        _value: PropertyValue,
    ) -> Result<(), GraphError> {
        Ok(())
    }

    fn node(&self, _id: i64) -> Result<Option<GraphNode>, GraphError> {
        Ok(None)
    }

    fn edge(&self, _id: i64) -> Result<Option<GraphEdge>, GraphError> {
        Ok(None)
    }

    fn find(
        &self,
        _kind: ElementKind,
        _filter: &[(&str, PropertyValue)],
    ) -> Result<Vec<i64>, GraphError> {
        Ok(Vec::new())
    }
}

impl NativeTransaction for RecordingTx {
    fn commit(self) -> Result<(), GraphError> {
        self.calls.native_commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(self) -> Result<(), GraphError> {
        self.calls.native_rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct RecordingBackend {
    pub calls: Arc<Calls>,
    pub capabilities: Capabilities,
    /// Present when the backend claims schema support.
    pub schema: Option<RecordingSchema>,
}

impl RecordingBackend {
    pub fn without_schema() -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            capabilities: Capabilities::NONE,
            schema: None,
        }
    }

    pub fn with_schema(capabilities: Capabilities) -> Self {
        let calls = Arc::new(Calls::default());
        Self {
            schema: Some(RecordingSchema {
                calls: Arc::clone(&calls),
                state: Mutex::new(RecordedSchema::default()),
                fail_index_creation: false,
            }),
            calls,
            capabilities,
        }
    }

    pub fn failing_index_creation(mut self) -> Self {
        if let Some(schema) = self.schema.as_mut() {
            schema.fail_index_creation = true;
        }
        self
    }
}

impl GraphBackend for RecordingBackend {
    type Tx = RecordingTx;
    type Schema = RecordingSchema;

    const NAME: &'static str = "recording";

    fn open(_config: &GraphConfig) -> Result<Self, GraphError> {
        Ok(Self::without_schema())
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn begin_native(&self) -> Result<Self::Tx, GraphError> {
        self.calls.native_begins.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingTx {
            calls: Arc::clone(&self.calls),
            next_id: 0,
        })
    }

    fn schema(&self) -> Option<&Self::Schema> {
        self.schema.as_ref()
    }

    fn shutdown(&self) -> Result<(), GraphError> {
        Ok(())
    }
}
