use nodeslot_core::db::open_db;
use nodeslot_core::{
    ClassDef, ClassRegistry, NodeGraph, SlotValue, SqliteBackend, Store, StoreBackend, TypeTag,
};
use std::path::Path;

fn registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry
        .register(
            ClassDef::new("Project")
                .prototype_slots(|ctx| {
                    ctx.declare_slot("name", "")?
                        .set_is_stored(true)
                        .set_type_tag(TypeTag::Str);
                    Ok(())
                })
                .on_init(|ctx| {
                    let node = ctx.node();
                    ctx.graph().set_should_store(node, true)?;
                    ctx.graph().set_should_store_subnodes(node, true)
                }),
        )
        .unwrap();
    registry
        .register(
            ClassDef::new("Task")
                .prototype_slots(|ctx| {
                    ctx.declare_slot("done", false)?
                        .set_is_stored(true)
                        .set_type_tag(TypeTag::Bool);
                    ctx.declare_slot("tags", SlotValue::List(Vec::new()))?
                        .set_is_stored(true)
                        .set_type_tag(TypeTag::List);
                    Ok(())
                })
                .on_init(|ctx| {
                    let node = ctx.node();
                    ctx.graph().set_should_store(node, true)
                }),
        )
        .unwrap();
    registry
}

fn open_store(path: &Path) -> Store<SqliteBackend> {
    Store::new(SqliteBackend::open(path).unwrap()).unwrap()
}

#[test]
fn open_db_creates_node_records_table() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("nodes.db")).unwrap();

    let mut stmt = conn.prepare("PRAGMA table_info(node_records);").unwrap();
    let mut rows = stmt.query([]).unwrap();
    let mut columns = Vec::new();
    while let Some(row) = rows.next().unwrap() {
        let column_name: String = row.get(1).unwrap();
        columns.push(column_name);
    }
    for expected in ["id", "payload", "write_seq", "is_deleted"] {
        assert!(columns.contains(&expected.to_string()), "missing {expected}");
    }
}

#[tokio::test]
async fn tree_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.db");

    let first_seq = {
        let mut graph = NodeGraph::new(registry());
        let project = graph.create_node("Project").unwrap();
        graph.set_persist_id(project, "project").unwrap();
        graph.set_slot(project, "name", "Launch").unwrap();
        let task = graph.create_subnode(project, "Task").unwrap();
        graph.set_slot(task, "done", true).unwrap();
        graph
            .set_slot(
                task,
                "tags",
                vec![SlotValue::from("urgent"), SlotValue::from("q3")],
            )
            .unwrap();

        let mut store = open_store(&path);
        let report = store
            .persist(&mut graph, project)
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.written, 2);
        report.seq
    };

    let mut store = open_store(&path);
    let mut graph = NodeGraph::new(registry());
    let outcome = store.restore(&mut graph, "project").await.unwrap();

    assert!(outcome.failures.is_empty());
    assert_eq!(
        graph.slot(outcome.root, "name").unwrap(),
        &SlotValue::from("Launch")
    );
    let task = graph.subnodes(outcome.root).unwrap()[0];
    assert_eq!(graph.slot(task, "done").unwrap(), &SlotValue::Bool(true));
    assert_eq!(
        graph.slot(task, "tags").unwrap(),
        &SlotValue::List(vec![SlotValue::from("urgent"), SlotValue::from("q3")])
    );

    // Sequence numbers continue across sessions.
    graph.set_slot(task, "done", false).unwrap();
    let job = store.flush(&mut graph).unwrap();
    assert!(job.batch().seq > first_seq);
    assert_eq!(job.run().await.unwrap().written, 1);
}

#[tokio::test]
async fn removal_and_gc_soft_delete_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.db");
    let mut graph = NodeGraph::new(registry());
    let project = graph.create_node("Project").unwrap();
    graph.set_persist_id(project, "project").unwrap();
    let keep = graph.create_subnode(project, "Task").unwrap();
    let removed = graph.create_subnode(project, "Task").unwrap();
    let dropped_id = graph.persist_id(removed).unwrap().to_string();
    let mut store = open_store(&path);
    store
        .persist(&mut graph, project)
        .unwrap()
        .run()
        .await
        .unwrap();

    graph.remove_subnode(project, removed).unwrap();
    let report = store.flush(&mut graph).unwrap().run().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.written, 1);

    let live = store.with_backend(|backend| backend.ids()).unwrap().unwrap();
    let keep_id = graph.persist_id(keep).unwrap().to_string();
    let mut expected = vec!["project".to_string(), keep_id];
    expected.sort();
    assert_eq!(live, expected);

    let gc = store.collect_garbage(&[]).await.unwrap();
    assert!(gc.deleted.is_empty());

    let tombstoned: i64 = store
        .with_backend(|backend| {
            backend.connection().query_row(
                "SELECT is_deleted FROM node_records WHERE id = ?1;",
                [dropped_id.as_str()],
                |row| row.get(0),
            )
        })
        .unwrap()
        .unwrap();
    assert_eq!(tombstoned, 1);
}
