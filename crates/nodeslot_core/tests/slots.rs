use nodeslot_core::{
    ClassDef, ClassRegistry, NodeError, NodeGraph, RuntimeConfig, SlotKey, SlotValue, TypeTag,
    DID_UPDATE_SLOT, TITLE_SLOT,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

const TITLE: SlotKey<String> = SlotKey::new(TITLE_SLOT);
const CELSIUS: SlotKey<f64> = SlotKey::new("celsius");
const FAHRENHEIT: SlotKey<f64> = SlotKey::new("fahrenheit");
const COUNT: SlotKey<i64> = SlotKey::new("count");

fn registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry
        .register(
            ClassDef::new("Thermometer")
                .prototype_slots(|ctx| {
                    ctx.declare_slot(TITLE_SLOT, "Thermometer")?;
                    ctx.declare_slot("celsius", 0.0)?
                        .set_is_stored(true)
                        .set_type_tag(TypeTag::Float)
                        .set_has_setter_hook(true);
                    ctx.declare_slot("fahrenheit", 32.0)?
                        .set_type_tag(TypeTag::Float)
                        .set_posts_change(false);
                    ctx.declare_slot("count", 0)?.set_type_tag(TypeTag::Int);
                    ctx.declare_slot("serial", SlotValue::Null)?
                        .set_type_tag(TypeTag::Str)
                        .set_read_only(true);
                    ctx.declare_slot("note", SlotValue::Null)?;
                    Ok(())
                })
                .on_init(|ctx| ctx.set_slot("serial", "T-1"))
                .on_slot_update("celsius", |graph, node, _old, new| {
                    let celsius = new.as_float().unwrap_or_default();
                    graph.set_slot(node, "fahrenheit", celsius * 9.0 / 5.0 + 32.0)
                }),
        )
        .unwrap();
    registry
}

#[test]
fn unset_slots_read_their_defaults() {
    let mut graph = NodeGraph::new(registry());
    let node = graph.create_node("Thermometer").unwrap();

    assert_eq!(graph.get(node, TITLE).unwrap(), "Thermometer");
    assert_eq!(graph.get(node, CELSIUS).unwrap(), 0.0);
    assert_eq!(graph.get(node, COUNT).unwrap(), 0);
    assert_eq!(graph.slot(node, "note").unwrap(), &SlotValue::Null);
}

#[test]
fn typed_keys_write_and_read_back() {
    let mut graph = NodeGraph::new(registry());
    let node = graph.create_node("Thermometer").unwrap();

    graph.set(node, TITLE, "Kitchen".to_string()).unwrap();
    graph.set(node, COUNT, 3).unwrap();

    assert_eq!(graph.title(node).unwrap(), "Kitchen");
    assert_eq!(graph.get(node, COUNT).unwrap(), 3);
}

#[test]
fn mistyped_value_is_rejected_and_state_kept() {
    let mut graph = NodeGraph::new(registry());
    let node = graph.create_node("Thermometer").unwrap();

    let err = graph.set_slot(node, "count", "three").unwrap_err();
    assert!(matches!(err, NodeError::TypeMismatch { .. }));
    assert_eq!(graph.get(node, COUNT).unwrap(), 0);

    // An Int is not coerced into a Float slot.
    assert!(graph.set_slot(node, "celsius", 4).is_err());
    // Null is accepted by every tag.
    graph.set_slot(node, "count", SlotValue::Null).unwrap();
}

#[test]
fn type_tags_can_be_left_unenforced() {
    let config = RuntimeConfig {
        enforce_type_tags: false,
        ..RuntimeConfig::default()
    };
    let mut graph = NodeGraph::with_config(registry(), &config);
    let node = graph.create_node("Thermometer").unwrap();

    graph.set_slot(node, "count", "three").unwrap();
    assert_eq!(graph.slot(node, "count").unwrap(), &SlotValue::from("three"));
}

#[test]
fn read_only_slot_is_writable_only_during_construction() {
    let mut graph = NodeGraph::new(registry());
    let node = graph.create_node("Thermometer").unwrap();
    assert_eq!(graph.slot(node, "serial").unwrap(), &SlotValue::from("T-1"));

    let err = graph.set_slot(node, "serial", "T-2").unwrap_err();
    assert!(matches!(err, NodeError::ReadOnlySlot { .. }));
}

#[test]
fn setter_hook_runs_after_change() {
    let mut graph = NodeGraph::new(registry());
    let node = graph.create_node("Thermometer").unwrap();

    graph.set(node, CELSIUS, 100.0).unwrap();
    assert_eq!(graph.get(node, FAHRENHEIT).unwrap(), 212.0);
    assert!(graph.is_dirty(node));
}

#[test]
fn changes_post_update_notifications() {
    let mut graph = NodeGraph::new(registry());
    let node = graph.create_node("Thermometer").unwrap();
    let seen: Rc<RefCell<Vec<SlotValue>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    graph.bus().observe(node, DID_UPDATE_SLOT, move |note| {
        sink.borrow_mut()
            .push(note.payload.clone().unwrap_or_default());
    });

    graph.set(node, CELSIUS, 10.0).unwrap();
    graph.set(node, CELSIUS, 10.0).unwrap();

    // `fahrenheit` does not post; the unchanged second write is a no-op.
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    let mut expected = BTreeMap::new();
    expected.insert("slot".to_string(), SlotValue::from("celsius"));
    expected.insert("old".to_string(), SlotValue::Float(0.0));
    expected.insert("new".to_string(), SlotValue::Float(10.0));
    assert_eq!(seen[0], SlotValue::Map(expected));
}

#[test]
fn undeclared_slot_is_unknown() {
    let mut graph = NodeGraph::new(registry());
    let node = graph.create_node("Thermometer").unwrap();

    assert!(matches!(
        graph.slot(node, "humidity").unwrap_err(),
        NodeError::UnknownSlot { .. }
    ));
    assert!(matches!(
        graph.set_slot(node, "humidity", 1).unwrap_err(),
        NodeError::UnknownSlot { .. }
    ));
}

#[test]
fn failing_setter_hook_undoes_the_write() {
    let mut registry = ClassRegistry::new();
    registry
        .register(
            ClassDef::new("Valve")
                .prototype_slots(|ctx| {
                    ctx.declare_slot("level", 0)?
                        .set_is_stored(true)
                        .set_type_tag(TypeTag::Int)
                        .set_has_setter_hook(true);
                    Ok(())
                })
                .on_slot_update("level", |_graph, _node, _old, new| {
                    if new.as_int().unwrap_or_default() < 0 {
                        return Err(NodeError::TypeMismatch {
                            slot: "level".to_string(),
                            expected: "non-negative int".to_string(),
                            actual: "negative int".to_string(),
                        });
                    }
                    Ok(())
                }),
        )
        .unwrap();
    let mut graph = NodeGraph::new(registry);
    let valve = graph.create_node("Valve").unwrap();
    let updates = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&updates);
    graph
        .bus()
        .observe(valve, DID_UPDATE_SLOT, move |_| *sink.borrow_mut() += 1);

    assert!(graph.set_slot(valve, "level", -1).is_err());
    assert_eq!(graph.slot(valve, "level").unwrap(), &SlotValue::Int(0));
    assert!(!graph.is_dirty(valve));
    assert_eq!(*updates.borrow(), 0);

    graph.set_slot(valve, "level", 4).unwrap();
    assert!(graph.set_slot(valve, "level", -2).is_err());
    assert_eq!(graph.slot(valve, "level").unwrap(), &SlotValue::Int(4));
    // The earlier successful write still needs flushing.
    assert!(graph.is_dirty(valve));
    assert_eq!(*updates.borrow(), 1);
}
