//! Node identifiers and per-node state.

use crate::class::SlotTable;
use crate::lifecycle::Phase;
use crate::model::value::SlotValue;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use uuid::Uuid;

/// Handle of a node inside one `NodeGraph`.
///
/// The generation makes handles of destroyed nodes stale instead of letting
/// them alias a node that later reuses the same arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Persistence and UI affordance flags of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Node is written by the store.
    pub should_store: bool,
    /// Subnode list is written by the store.
    pub should_store_subnodes: bool,
    pub can_delete: bool,
    pub can_add: bool,
    pub can_reorder_subnodes: bool,
}

pub(crate) struct Node {
    pub(crate) class_name: String,
    pub(crate) slots: Rc<SlotTable>,
    pub(crate) values: HashMap<String, SlotValue>,
    pub(crate) owner: Option<NodeId>,
    pub(crate) subnodes: Vec<NodeId>,
    pub(crate) flags: NodeFlags,
    pub(crate) subnode_classes: Vec<String>,
    pub(crate) subnode_proto: Option<String>,
    pub(crate) persist_id: String,
    pub(crate) is_persisted: bool,
    pub(crate) phase: Phase,
}

impl Node {
    pub(crate) fn new(class_name: &str, slots: Rc<SlotTable>) -> Self {
        Self {
            class_name: class_name.to_string(),
            slots,
            values: HashMap::new(),
            owner: None,
            subnodes: Vec::new(),
            flags: NodeFlags::default(),
            subnode_classes: Vec::new(),
            subnode_proto: None,
            persist_id: Uuid::new_v4().to_string(),
            is_persisted: false,
            phase: Phase::PrototypeInit,
        }
    }

    /// Current value of `name`, falling back to the declared default.
    pub(crate) fn value(&self, name: &str) -> Option<&SlotValue> {
        self.values
            .get(name)
            .or_else(|| self.slots.get(name).map(|slot| slot.default_value()))
    }
}
