use std::{
    sync::{Arc, mpsc},
    thread,
};

use graphbridge::{
    EdgeSpec, ElementKind, ElementRef, GraphConfig, GraphError, GraphHandle, GraphOps, IndexSpec,
    NodeSpec, PropertyValue, SqliteBackend, ValueType,
};

fn sqlite() -> GraphHandle<SqliteBackend> {
    GraphHandle::instantiate(&GraphConfig::sqlite_in_memory()).expect("sqlite backend")
}

fn resource(eid: &str) -> NodeSpec {
    NodeSpec::new("Resource")
        .with("__type", "resource")
        .with("__eid", eid)
}

#[test]
fn test_sqlite_capabilities() {
    let caps = sqlite().capabilities();
    assert!(caps.prefer_big_transactions);
    assert!(!caps.needs_draining);
    assert!(caps.supports_unique_index);
}

#[test]
fn test_reads_see_own_staged_writes() {
    let graph = sqlite();
    graph
        .transact(|tx| {
            let a = tx.insert_node(resource("a"))?;
            let b = tx.insert_node(resource("b"))?;
            let e = tx.insert_edge(EdgeSpec::new(a, b, "contains").with("__weight", 3i64))?;
            let node = tx.node(a)?.expect("staged node");
            assert_eq!(node.label, "Resource");
            let edge = tx.edge(e)?.expect("staged edge");
            assert_eq!((edge.from_id, edge.to_id), (a, b));
            assert_eq!(
                tx.find(ElementKind::Node, &[("__eid", "b".into())])?,
                vec![b]
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_committed_elements_are_visible_to_later_transactions() {
    let graph = sqlite();
    let (a, e) = graph
        .transact(|tx| {
            let a = tx.insert_node(resource("a"))?;
            let b = tx.insert_node(resource("b"))?;
            let e = tx.insert_edge(EdgeSpec::new(a, b, "contains"))?;
            Ok((a, e))
        })
        .unwrap();
    graph
        .transact(|tx| {
            let node = tx.node(a)?.unwrap();
            assert_eq!(
                node.properties.get("__eid"),
                Some(&PropertyValue::from("a"))
            );
            assert_eq!(tx.edge(e)?.unwrap().label, "contains");
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_rollback_leaves_no_trace() {
    let graph = sqlite();
    graph.begin().unwrap();
    graph
        .with_transaction(|tx| tx.insert_node(resource("ghost")))
        .unwrap();
    graph.rollback().unwrap();
    let found = graph
        .transact(|tx| tx.find(ElementKind::Node, &[]))
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_uncommitted_writes_are_invisible_to_other_threads() {
    let graph = sqlite();
    graph.begin().unwrap();
    let id = graph
        .with_transaction(|tx| tx.insert_node(resource("pending")))
        .unwrap();
    thread::scope(|s| {
        s.spawn(|| {
            let seen = graph.transact(|tx| tx.node(id)).unwrap();
            assert!(seen.is_none());
        });
    });
    graph.commit().unwrap();
    assert!(graph.transact(|tx| tx.node(id)).unwrap().is_some());
}

#[test]
fn test_declared_key_rejects_wrong_type() {
    let graph = sqlite();
    graph
        .ensure_indices(&[IndexSpec::node().property("count", ValueType::Integer)])
        .unwrap();
    let err = graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Counter").with("count", 5i64)))
        .unwrap_err();
    match err {
        GraphError::PropertyType {
            property,
            expected,
            actual,
        } => {
            assert_eq!(property, "count");
            assert_eq!(expected, ValueType::Integer);
            assert_eq!(actual, ValueType::Long);
        }
        other => panic!("expected property type error, got {other:?}"),
    }
    graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Counter").with("count", 5i32)))
        .unwrap();
}

#[test]
fn test_undeclared_keys_are_created_on_commit() {
    let graph = sqlite();
    graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Host").with("uptime", 1.5)))
        .unwrap();
    let snapshot = graph.schema_snapshot().unwrap().unwrap();
    assert_eq!(snapshot.property_keys["uptime"], ValueType::Double);

    let err = graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Host").with("uptime", "long")))
        .unwrap_err();
    assert!(matches!(err, GraphError::PropertyType { .. }));
}

#[test]
fn test_undeclared_keys_rejected_when_auto_create_disabled() {
    let config = GraphConfig::sqlite_in_memory().set("schema.auto-create-keys", "false");
    let graph: GraphHandle<SqliteBackend> = GraphHandle::instantiate(&config).unwrap();
    let err = graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Host").with("name", "db-1")))
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidInput(_)));

    graph
        .ensure_indices(&[IndexSpec::node().property("name", ValueType::String)])
        .unwrap();
    graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Host").with("name", "db-1")))
        .unwrap();
}

#[test]
fn test_find_through_composite_index() {
    let graph = sqlite();
    graph
        .ensure_indices(&[IndexSpec::node()
            .property("__type", ValueType::String)
            .property("__eid", ValueType::String)])
        .unwrap();
    let ids = graph
        .transact(|tx| {
            let mut ids = Vec::new();
            for eid in ["r1", "r2", "r3"] {
                ids.push(tx.insert_node(resource(eid))?);
            }
            tx.insert_node(NodeSpec::new("Feed").with("__type", "feed").with("__eid", "r2"))?;
            Ok(ids)
        })
        .unwrap();
    let found = graph
        .transact(|tx| {
            tx.find(
                ElementKind::Node,
                &[("__eid", "r2".into()), ("__type", "resource".into())],
            )
        })
        .unwrap();
    assert_eq!(found, vec![ids[1]]);

    let by_type = graph
        .transact(|tx| tx.find(ElementKind::Node, &[("__type", "resource".into())]))
        .unwrap();
    assert_eq!(by_type, ids);
}

#[test]
fn test_index_tracks_property_updates() {
    let graph = sqlite();
    graph
        .ensure_indices(&[IndexSpec::node().property("status", ValueType::String)])
        .unwrap();
    let id = graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Agent").with("status", "up")))
        .unwrap();
    graph
        .transact(|tx| tx.set_property(ElementRef::Node(id), "status", "down".into()))
        .unwrap();
    let (up, down) = graph
        .transact(|tx| {
            Ok((
                tx.find(ElementKind::Node, &[("status", "up".into())])?,
                tx.find(ElementKind::Node, &[("status", "down".into())])?,
            ))
        })
        .unwrap();
    assert!(up.is_empty());
    assert_eq!(down, vec![id]);
}

#[test]
fn test_staged_update_changes_find_results() {
    let graph = sqlite();
    let id = graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Agent").with("status", "up")))
        .unwrap();
    graph.begin().unwrap();
    graph
        .with_transaction(|tx| {
            tx.set_property(ElementRef::Node(id), "status", "down".into())?;
            assert!(tx.find(ElementKind::Node, &[("status", "up".into())])?.is_empty());
            assert_eq!(
                tx.find(ElementKind::Node, &[("status", "down".into())])?,
                vec![id]
            );
            Ok(())
        })
        .unwrap();
    graph.rollback().unwrap();
}

#[test]
fn test_unique_index_rejects_duplicate_on_commit() {
    let graph = sqlite();
    graph
        .ensure_indices(&[IndexSpec::node().property("__cp", ValueType::String).unique()])
        .unwrap();
    graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Resource").with("__cp", "/t;a/r;x")))
        .unwrap();
    let err = graph
        .transact(|tx| {
            tx.insert_node(NodeSpec::new("Resource").with("__cp", "/t;a/r;y"))?;
            tx.insert_node(NodeSpec::new("Resource").with("__cp", "/t;a/r;x"))
        })
        .unwrap_err();
    assert!(matches!(err, GraphError::UniqueViolation { ref index, .. } if index == "node(__cp)"));

    // The whole write set was rejected, including the non-conflicting node.
    let all = graph
        .transact(|tx| tx.find(ElementKind::Node, &[]))
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn test_new_index_is_backfilled() {
    let graph = sqlite();
    let ids = graph
        .transact(|tx| {
            Ok(vec![
                tx.insert_node(NodeSpec::new("Host").with("zone", "eu"))?,
                tx.insert_node(NodeSpec::new("Host").with("zone", "us"))?,
                tx.insert_node(NodeSpec::new("Host").with("zone", "eu"))?,
            ])
        })
        .unwrap();
    let report = graph
        .ensure_indices(&[IndexSpec::node().property("zone", ValueType::String)])
        .unwrap();
    assert!(report.created_property_keys.is_empty());
    let eu = graph
        .transact(|tx| tx.find(ElementKind::Node, &[("zone", "eu".into())]))
        .unwrap();
    assert_eq!(eu, vec![ids[0], ids[2]]);
}

#[test]
fn test_unique_index_over_duplicates_is_not_created() {
    let graph = sqlite();
    graph
        .transact(|tx| {
            tx.insert_node(NodeSpec::new("Host").with("serial", "A1"))?;
            tx.insert_node(NodeSpec::new("Host").with("serial", "A1"))
        })
        .unwrap();
    let err = graph
        .ensure_indices(&[IndexSpec::node().property("serial", ValueType::String).unique()])
        .unwrap_err();
    assert!(matches!(err, GraphError::UniqueViolation { .. }));
    let snapshot = graph.schema_snapshot().unwrap().unwrap();
    assert!(snapshot.index_names.is_empty());
}

#[test]
fn test_edges_require_existing_endpoints() {
    let graph = sqlite();
    let err = graph
        .transact(|tx| tx.insert_edge(EdgeSpec::new(41, 42, "contains")))
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidInput(_)));
}

#[test]
fn test_set_property_on_missing_element_is_not_found() {
    let graph = sqlite();
    let err = graph
        .transact(|tx| tx.set_property(ElementRef::Node(999), "name", "x".into()))
        .unwrap_err();
    assert!(matches!(err, GraphError::NotFound(_)));
}

#[test]
fn test_data_and_ids_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    let first = {
        let graph: GraphHandle<SqliteBackend> =
            GraphHandle::instantiate(&GraphConfig::sqlite(&path)).unwrap();
        let id = graph.transact(|tx| tx.insert_node(resource("kept"))).unwrap();
        graph.shutdown().unwrap();
        id
    };
    let graph: GraphHandle<SqliteBackend> =
        GraphHandle::instantiate(&GraphConfig::sqlite(&path)).unwrap();
    let node = graph.transact(|tx| tx.node(first)).unwrap().unwrap();
    assert_eq!(node.properties["__eid"], PropertyValue::from("kept"));
    let second = graph.transact(|tx| tx.insert_node(resource("next"))).unwrap();
    assert!(second > first);
}

#[test]
fn test_operations_after_shutdown_fail() {
    let graph = sqlite();
    graph.shutdown().unwrap();
    assert!(matches!(
        graph.schema_snapshot(),
        Err(GraphError::BackendUnavailable(_))
    ));
    assert!(matches!(graph.drain(), Err(GraphError::BackendUnavailable(_))));
}

#[test]
fn test_doubles_round_trip_and_non_finite_are_rejected() {
    let graph = sqlite();
    let id = graph
        .transact(|tx| tx.insert_node(NodeSpec::new("Host").with("load", 0.75)))
        .unwrap();
    let node = graph.transact(|tx| tx.node(id)).unwrap().unwrap();
    assert_eq!(node.properties["load"], PropertyValue::Double(0.75));

    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let err = graph
            .transact(|tx| tx.insert_node(NodeSpec::new("Host").with("load", bad)))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidInput(_)), "{bad}: {err:?}");
        let err = graph
            .transact(|tx| tx.set_property(ElementRef::Node(id), "load", bad.into()))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidInput(_)), "{bad}: {err:?}");
    }
    let node = graph.transact(|tx| tx.node(id)).unwrap().unwrap();
    assert_eq!(node.properties["load"], PropertyValue::Double(0.75));
}

#[test]
fn test_unique_values_can_shift_between_elements_in_one_commit() {
    let graph = sqlite();
    graph
        .ensure_indices(&[IndexSpec::node().property("serial", ValueType::Long).unique()])
        .unwrap();
    let (a, b) = graph
        .transact(|tx| {
            let a = tx.insert_node(NodeSpec::new("Device").with("serial", 1i64))?;
            let b = tx.insert_node(NodeSpec::new("Device").with("serial", 2i64))?;
            Ok((a, b))
        })
        .unwrap();
    graph
        .transact(|tx| {
            tx.set_property(ElementRef::Node(a), "serial", 2i64.into())?;
            tx.set_property(ElementRef::Node(b), "serial", 3i64.into())
        })
        .unwrap();
    let (one, two, three) = graph
        .transact(|tx| {
            Ok((
                tx.find(ElementKind::Node, &[("serial", 1i64.into())])?,
                tx.find(ElementKind::Node, &[("serial", 2i64.into())])?,
                tx.find(ElementKind::Node, &[("serial", 3i64.into())])?,
            ))
        })
        .unwrap();
    assert!(one.is_empty());
    assert_eq!(two, vec![a]);
    assert_eq!(three, vec![b]);

    // A genuine clash in the final state is still rejected.
    let err = graph
        .transact(|tx| tx.set_property(ElementRef::Node(b), "serial", 2i64.into()))
        .unwrap_err();
    assert!(matches!(err, GraphError::UniqueViolation { .. }));
}

#[cfg(target_os = "linux")]
fn open_fds_to(path: &std::path::Path) -> usize {
    let target = std::fs::canonicalize(path).unwrap();
    std::fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
        .filter(|link| *link == target)
        .count()
}

#[cfg(target_os = "linux")]
#[test]
fn test_dropping_last_handle_closes_database_despite_open_worker_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drop.db");
    let graph: Arc<GraphHandle<SqliteBackend>> =
        Arc::new(GraphHandle::instantiate(&GraphConfig::sqlite(&path)).unwrap());
    assert!(open_fds_to(&path) > 0);

    let (ready_tx, ready_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let worker = {
        let graph = Arc::clone(&graph);
        thread::spawn(move || {
            graph.begin().unwrap();
            graph
                .with_transaction(|tx| tx.insert_node(resource("pending")))
                .unwrap();
            drop(graph);
            ready_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
    };
    ready_rx.recv().unwrap();
    drop(graph);
    let still_open = open_fds_to(&path);
    release_tx.send(()).unwrap();
    worker.join().unwrap();
    assert_eq!(still_open, 0);
}
