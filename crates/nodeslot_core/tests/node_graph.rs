use nodeslot_core::{
    ClassDef, ClassRegistry, NodeError, NodeGraph, NodeId, SlotValue, DID_CHANGE_SUBNODE_LIST,
};
use std::cell::RefCell;
use std::rc::Rc;

fn registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry.register(ClassDef::new("Workspace")).unwrap();
    registry.register(ClassDef::new("Folder")).unwrap();
    registry.register(ClassDef::new("Note")).unwrap();
    registry
        .register(ClassDef::new("Checklist").extends("Note"))
        .unwrap();
    registry
}

fn setup() -> NodeGraph {
    NodeGraph::new(registry())
}

#[test]
fn adding_owned_node_elsewhere_fails_and_keeps_owner() {
    let mut graph = setup();
    let first = graph.create_node("Folder").unwrap();
    let second = graph.create_node("Folder").unwrap();
    let note = graph.create_node("Note").unwrap();
    graph.add_subnode(first, note).unwrap();

    let err = graph.add_subnode(second, note).unwrap_err();

    assert_eq!(
        err,
        NodeError::AlreadyOwned {
            node: note,
            owner: first
        }
    );
    assert_eq!(graph.subnodes(first).unwrap(), &[note]);
    assert!(graph.subnodes(second).unwrap().is_empty());
    assert_eq!(graph.parent_node(note).unwrap(), Some(first));
}

#[test]
fn subnode_classes_restrict_children() {
    let mut graph = setup();
    let folder = graph.create_node("Folder").unwrap();
    graph.set_subnode_classes(folder, ["Note"]).unwrap();
    let checklist = graph.create_node("Checklist").unwrap();
    let nested = graph.create_node("Folder").unwrap();

    graph.add_subnode(folder, checklist).unwrap();
    let err = graph.add_subnode(folder, nested).unwrap_err();

    assert!(matches!(err, NodeError::InvalidSubnodeType { .. }));
    assert_eq!(graph.parent_node(nested).unwrap(), None);
    assert_eq!(graph.subnodes(folder).unwrap(), &[checklist]);
}

#[test]
fn subnode_proto_restricts_and_creates_children() {
    let mut graph = setup();
    let folder = graph.create_node("Folder").unwrap();
    graph.set_subnode_proto(folder, "Note").unwrap();

    assert_eq!(
        graph.add_new_subnode(folder).unwrap_err(),
        NodeError::AddNotPermitted(folder)
    );
    graph.set_can_add(folder, true).unwrap();
    let created = graph.add_new_subnode(folder).unwrap();
    assert_eq!(graph.class_name(created).unwrap(), "Note");

    let err = graph.create_subnode(folder, "Folder").unwrap_err();
    assert!(matches!(err, NodeError::InvalidSubnodeType { .. }));
    // The rejected node is not left behind.
    assert_eq!(graph.len(), 2);
}

#[test]
fn ancestor_cannot_become_subnode() {
    let mut graph = setup();
    let top = graph.create_node("Folder").unwrap();
    let middle = graph.create_subnode(top, "Folder").unwrap();
    let bottom = graph.create_subnode(middle, "Folder").unwrap();

    let err = graph.add_subnode(bottom, top).unwrap_err();
    assert!(matches!(err, NodeError::CycleDetected { .. }));
    assert_eq!(graph.owner_chain(bottom).unwrap(), vec![middle, top]);
}

#[test]
fn first_owner_chain_node_of_class_matches_subclasses() {
    let mut graph = setup();
    let workspace = graph.create_node("Workspace").unwrap();
    let folder = graph.create_subnode(workspace, "Folder").unwrap();
    let checklist = graph.create_subnode(folder, "Checklist").unwrap();
    let note = graph.create_node("Note").unwrap();
    graph.add_subnode(checklist, note).unwrap();

    assert_eq!(
        graph
            .first_owner_chain_node_of_class(note, "Workspace")
            .unwrap(),
        Some(workspace)
    );
    assert_eq!(
        graph.first_owner_chain_node_of_class(note, "Note").unwrap(),
        Some(checklist)
    );
    assert_eq!(
        graph
            .first_owner_chain_node_of_class(workspace, "Workspace")
            .unwrap(),
        None
    );
}

#[test]
fn reorder_requires_permission() {
    let mut graph = setup();
    let folder = graph.create_node("Folder").unwrap();
    let a = graph.create_subnode(folder, "Note").unwrap();
    let b = graph.create_subnode(folder, "Note").unwrap();
    let c = graph.create_subnode(folder, "Note").unwrap();

    assert_eq!(
        graph.move_subnode(folder, c, 0).unwrap_err(),
        NodeError::ReorderNotPermitted(folder)
    );
    graph.set_can_reorder_subnodes(folder, true).unwrap();
    graph.move_subnode(folder, c, 0).unwrap();
    assert_eq!(graph.subnodes(folder).unwrap(), &[c, a, b]);
}

#[test]
fn delete_requires_permission_and_destroys_subtree() {
    let mut graph = setup();
    let folder = graph.create_node("Folder").unwrap();
    let inner = graph.create_subnode(folder, "Folder").unwrap();
    let leaf = graph.create_subnode(inner, "Note").unwrap();

    assert_eq!(
        graph.delete_subnode(folder, inner).unwrap_err(),
        NodeError::DeleteNotPermitted(folder)
    );
    graph.set_can_delete(folder, true).unwrap();
    graph.delete_subnode(folder, inner).unwrap();

    assert!(graph.subnodes(folder).unwrap().is_empty());
    assert!(!graph.contains(inner));
    assert!(!graph.contains(leaf));
}

#[test]
fn removed_subtree_stays_alive_and_detached() {
    let mut graph = setup();
    let folder = graph.create_node("Folder").unwrap();
    let inner = graph.create_subnode(folder, "Folder").unwrap();
    let leaf = graph.create_subnode(inner, "Note").unwrap();

    graph.remove_subnode(folder, inner).unwrap();

    assert_eq!(graph.parent_node(inner).unwrap(), None);
    assert_eq!(graph.subnodes(inner).unwrap(), &[leaf]);
    assert!(matches!(
        graph.remove_subnode(folder, inner).unwrap_err(),
        NodeError::NotASubnode { .. }
    ));
}

#[test]
fn subnode_changes_are_posted() {
    let mut graph = setup();
    let folder = graph.create_node("Folder").unwrap();
    let counts: Rc<RefCell<Vec<(NodeId, SlotValue)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&counts);
    graph
        .bus()
        .observe_any(DID_CHANGE_SUBNODE_LIST, move |note| {
            sink.borrow_mut()
                .push((note.sender, note.payload.clone().unwrap_or_default()));
        });

    let note = graph.create_subnode(folder, "Note").unwrap();
    graph.remove_subnode(folder, note).unwrap();

    assert_eq!(
        *counts.borrow(),
        vec![(folder, SlotValue::Int(1)), (folder, SlotValue::Int(0))]
    );
}

#[test]
fn destroyed_handle_goes_stale() {
    let mut graph = setup();
    let note = graph.create_node("Note").unwrap();
    graph.destroy_node(note).unwrap();
    let reused = graph.create_node("Note").unwrap();

    assert_ne!(note, reused);
    assert_eq!(
        graph.class_name(note).unwrap_err(),
        NodeError::NodeNotFound(note)
    );
}
