//! Index and property-key reconciliation.
//!
//! [`ensure_indices`] brings a backend's schema in line with a list of
//! [`IndexSpec`]s. It reads a snapshot, builds a complete plan, validates the
//! plan against the snapshot and only then mutates, all inside one schema
//! transaction. A conflict therefore never leaves a half-built schema behind.
//! Running it again with the same specs performs no mutations, and it never
//! drops indices that were not requested.
//!
//! Concurrent calls against one handle are not supported: the snapshot is a
//! point-in-time read and reconciliation is meant to run once at startup.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    backend::{GraphBackend, PropertyKey, SchemaManager, SchemaTransaction},
    capabilities::Capabilities,
    errors::GraphError,
    index_spec::IndexSpec,
    types::{ElementKind, ValueType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    pub index_names: BTreeSet<String>,
    pub unique_indices: BTreeSet<String>,
    pub property_keys: BTreeMap<String, ValueType>,
}

impl SchemaSnapshot {
    pub fn read(tx: &mut dyn SchemaTransaction) -> Result<Self, GraphError> {
        Ok(Self {
            index_names: tx.index_names()?,
            unique_indices: tx.unique_index_names()?,
            property_keys: tx.property_keys()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created_property_keys: Vec<String>,
    pub created_indices: Vec<String>,
    pub already_present: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created_property_keys.is_empty() && self.created_indices.is_empty()
    }
}

pub fn ensure_indices<B: GraphBackend>(
    backend: &B,
    specs: &[IndexSpec],
) -> Result<ReconcileReport, GraphError> {
    let Some(schema) = backend.schema() else {
        // No schema, no indices: there is nothing to converge.
        debug!(
            backend = B::NAME,
            requested = specs.len(),
            "backend has no schema support; skipping index reconciliation"
        );
        return Ok(ReconcileReport::default());
    };
    let capabilities = backend.capabilities();
    schema.schema_transaction(|tx| {
        let snapshot = SchemaSnapshot::read(tx)?;
        let plan = SchemaPlan::build(&snapshot, specs, capabilities)?;
        if plan.indices.is_empty() {
            debug!(
                backend = B::NAME,
                present = plan.already_present.len(),
                "schema already satisfies requested indices"
            );
            return Ok(ReconcileReport {
                already_present: plan.already_present,
                ..ReconcileReport::default()
            });
        }
        plan.apply(tx)
    })
}

pub fn read_snapshot<B: GraphBackend>(backend: &B) -> Result<Option<SchemaSnapshot>, GraphError> {
    match backend.schema() {
        Some(schema) => schema
            .schema_transaction(|tx| SchemaSnapshot::read(tx))
            .map(Some),
        None => Ok(None),
    }
}

struct PlannedIndex {
    name: String,
    kind: ElementKind,
    keys: Vec<String>,
    unique: bool,
}

#[derive(Default)]
struct SchemaPlan {
    new_keys: BTreeMap<String, ValueType>,
    reused_keys: BTreeSet<String>,
    indices: Vec<PlannedIndex>,
    already_present: Vec<String>,
}

impl SchemaPlan {
    /// Validates every request before anything is written.
    fn build(
        snapshot: &SchemaSnapshot,
        specs: &[IndexSpec],
        capabilities: Capabilities,
    ) -> Result<Self, GraphError> {
        let mut plan = SchemaPlan::default();
        let mut requested: BTreeMap<&str, ValueType> = BTreeMap::new();
        let mut seen = BTreeSet::new();

        for spec in specs {
            if spec.properties().is_empty() {
                return Err(GraphError::invalid_input(format!(
                    "{} index spec declares no properties",
                    spec.kind()
                )));
            }
            for (property, &value_type) in spec.properties() {
                if let Some(&earlier) = requested.get(property.as_str()) {
                    if earlier != value_type {
                        return Err(GraphError::SchemaConflict {
                            property: property.clone(),
                            expected: earlier,
                            actual: value_type,
                        });
                    }
                }
                requested.insert(property.as_str(), value_type);
                // Checked for satisfied indices too: a type mismatch against
                // the live schema is a configuration error either way.
                if let Some(&actual) = snapshot.property_keys.get(property) {
                    if actual != value_type {
                        return Err(GraphError::SchemaConflict {
                            property: property.clone(),
                            expected: value_type,
                            actual,
                        });
                    }
                }
            }

            let name = spec.canonical_name();
            if !seen.insert(name.clone()) {
                continue;
            }
            if snapshot.index_names.contains(&name) {
                let existing_unique = snapshot.unique_indices.contains(&name);
                if existing_unique != spec.is_unique() {
                    warn!(
                        index = name.as_str(),
                        requested_unique = spec.is_unique(),
                        existing_unique,
                        "index exists with different uniqueness; keeping the existing index"
                    );
                }
                plan.already_present.push(name);
                continue;
            }
            for (property, &value_type) in spec.properties() {
                if snapshot.property_keys.contains_key(property) {
                    plan.reused_keys.insert(property.clone());
                } else {
                    plan.new_keys.insert(property.clone(), value_type);
                }
            }
            let unique = spec.is_unique() && capabilities.supports_unique_index;
            if spec.is_unique() && !unique {
                warn!(
                    index = name.as_str(),
                    "backend lacks unique index support; creating a non-unique index"
                );
            }
            plan.indices.push(PlannedIndex {
                name,
                kind: spec.kind(),
                keys: spec.properties().keys().cloned().collect(),
                unique,
            });
        }
        Ok(plan)
    }

    /// Property keys first, then the composite indices that reference them.
    fn apply(self, tx: &mut dyn SchemaTransaction) -> Result<ReconcileReport, GraphError> {
        let mut resolved: BTreeMap<String, PropertyKey> = BTreeMap::new();
        for name in &self.reused_keys {
            let key = tx
                .property_key(name)
                .map_err(|e| e.context(format!("resolving property key `{name}`")))?
                .ok_or_else(|| {
                    GraphError::query(format!(
                        "property key `{name}` disappeared during reconciliation"
                    ))
                })?;
            resolved.insert(name.clone(), key);
        }

        let mut report = ReconcileReport {
            already_present: self.already_present,
            ..ReconcileReport::default()
        };
        for (name, value_type) in &self.new_keys {
            let key = tx
                .create_property_key(name, *value_type)
                .map_err(|e| e.context(format!("creating property key `{name}`")))?;
            info!(property = name.as_str(), value_type = %value_type, "created property key");
            resolved.insert(name.clone(), key);
            report.created_property_keys.push(name.clone());
        }

        for index in &self.indices {
            let keys = index
                .keys
                .iter()
                .map(|name| {
                    resolved.get(name).cloned().ok_or_else(|| {
                        GraphError::query(format!(
                            "index {} references unresolved property key `{name}`",
                            index.name
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            tx.create_composite_index(&index.name, index.kind, &keys, index.unique)
                .map_err(|e| e.context(format!("creating index {}", index.name)))?;
            info!(index = index.name.as_str(), unique = index.unique, "created composite index");
            report.created_indices.push(index.name.clone());
        }
        Ok(report)
    }
}
