//! Live node graph: slot values, ownership and dirty tracking.
//!
//! # Responsibility
//! - Own every constructed node in a generational arena.
//! - Validate and apply slot writes, then run setter hooks and post
//!   `didUpdateSlot`.
//! - Track which nodes need to be written by the store.
//!
//! # Invariants
//! - The subnode list is the only strong relation; owners are plain ids.
//! - A node has at most one owner.
//! - Dirty tracking is a set, so repeated mutations coalesce into one write.

use crate::class::{ClassRegistry, SlotTable};
use crate::config::RuntimeConfig;
use crate::lifecycle::{self, Phase};
use crate::model::slot::{Slot, SlotKey};
use crate::model::value::{FromSlotValue, SlotValue};
use crate::notify::{NotificationBus, DID_UPDATE_SLOT};
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

mod arena;
pub mod node;
mod tree;

use arena::NodeArena;
use node::Node;
pub use node::{NodeFlags, NodeId};

pub type GraphResult<T> = Result<T, NodeError>;

/// Errors raised by node construction, slot access and tree mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeError {
    /// Handle does not resolve to a live node.
    NodeNotFound(NodeId),
    /// Class is not registered.
    UnknownClass(String),
    /// Slot is not declared on the node's class chain.
    UnknownSlot { class: String, slot: String },
    /// Value does not satisfy the slot's type tag.
    TypeMismatch {
        slot: String,
        expected: String,
        actual: String,
    },
    /// Read-only slot written after construction.
    ReadOnlySlot { class: String, slot: String },
    /// A lifecycle phase failed; the node was discarded.
    InitializationFailure {
        class: String,
        phase: Phase,
        reason: String,
    },
    /// Node has not finished construction.
    NodeNotReady(NodeId),
    /// Node already belongs to another owner.
    AlreadyOwned { node: NodeId, owner: NodeId },
    /// Parent's subnode constraints reject the child's class.
    InvalidSubnodeType { parent: NodeId, class: String },
    /// Attaching would make a node its own ancestor.
    CycleDetected { node: NodeId, parent: NodeId },
    /// Node is not a subnode of the given parent.
    NotASubnode { parent: NodeId, node: NodeId },
    ReorderNotPermitted(NodeId),
    DeleteNotPermitted(NodeId),
    AddNotPermitted(NodeId),
    /// `add_new_subnode` without a configured subnode prototype.
    NoSubnodeProto(NodeId),
}

impl Display for NodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::UnknownClass(name) => write!(f, "class not registered: {name}"),
            Self::UnknownSlot { class, slot } => {
                write!(f, "class `{class}` declares no slot `{slot}`")
            }
            Self::TypeMismatch {
                slot,
                expected,
                actual,
            } => write!(f, "slot `{slot}` expects {expected}, got {actual}"),
            Self::ReadOnlySlot { class, slot } => {
                write!(f, "slot `{slot}` of class `{class}` is read-only")
            }
            Self::InitializationFailure {
                class,
                phase,
                reason,
            } => write!(f, "{class} failed during {phase}: {reason}"),
            Self::NodeNotReady(id) => write!(f, "node {id} has not finished construction"),
            Self::AlreadyOwned { node, owner } => {
                write!(f, "node {node} is already owned by {owner}")
            }
            Self::InvalidSubnodeType { parent, class } => {
                write!(f, "node {parent} does not accept subnodes of class `{class}`")
            }
            Self::CycleDetected { node, parent } => {
                write!(f, "adding {node} under {parent} would create a cycle")
            }
            Self::NotASubnode { parent, node } => {
                write!(f, "node {node} is not a subnode of {parent}")
            }
            Self::ReorderNotPermitted(id) => write!(f, "node {id} does not allow reordering"),
            Self::DeleteNotPermitted(id) => write!(f, "node {id} does not allow deletion"),
            Self::AddNotPermitted(id) => write!(f, "node {id} does not allow adding subnodes"),
            Self::NoSubnodeProto(id) => write!(f, "node {id} has no subnode prototype"),
        }
    }
}

impl Error for NodeError {}

/// Arena of live nodes bound to one class registry and notification bus.
pub struct NodeGraph {
    registry: Rc<ClassRegistry>,
    bus: NotificationBus,
    arena: NodeArena,
    enforce_type_tags: bool,
    dirty: BTreeSet<NodeId>,
    pending_deletes: BTreeSet<String>,
}

impl NodeGraph {
    pub fn new(registry: impl Into<Rc<ClassRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            bus: NotificationBus::new(),
            arena: NodeArena::default(),
            enforce_type_tags: true,
            dirty: BTreeSet::new(),
            pending_deletes: BTreeSet::new(),
        }
    }

    pub fn with_config(registry: impl Into<Rc<ClassRegistry>>, config: &RuntimeConfig) -> Self {
        let mut graph = Self::new(registry);
        graph.enforce_type_tags = config.enforce_type_tags;
        graph
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn registry_handle(&self) -> Rc<ClassRegistry> {
        Rc::clone(&self.registry)
    }

    /// Bus shared by every node of this graph.
    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn enforces_type_tags(&self) -> bool {
        self.enforce_type_tags
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some()
    }

    /// Live node ids, in arena order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.arena.ids().collect()
    }

    /// Constructs a `Ready` node of `class_name`.
    ///
    /// # Errors
    /// - `UnknownClass` when the class is not registered.
    /// - `InitializationFailure` when a lifecycle phase fails.
    pub fn create_node(&mut self, class_name: &str) -> GraphResult<NodeId> {
        let node = lifecycle::construct(self, class_name)?;
        debug!(
            "event=node_create module=graph status=ok class={} node={}",
            class_name, node
        );
        Ok(node)
    }

    pub fn class_name(&self, id: NodeId) -> GraphResult<&str> {
        Ok(&self.node(id)?.class_name)
    }

    pub fn phase(&self, id: NodeId) -> GraphResult<Phase> {
        Ok(self.node(id)?.phase)
    }

    /// Returns whether the node's class is `class_name` or descends from it.
    pub fn is_kind_of(&self, id: NodeId, class_name: &str) -> GraphResult<bool> {
        let class = &self.node(id)?.class_name;
        Ok(self.registry.is_kind_of(class, class_name))
    }

    pub fn slot_table(&self, id: NodeId) -> GraphResult<Rc<SlotTable>> {
        Ok(Rc::clone(&self.node(id)?.slots))
    }

    /// Current value of a slot; unset slots read as their declared default.
    pub fn slot(&self, id: NodeId, name: &str) -> GraphResult<&SlotValue> {
        let node = self.node(id)?;
        node.value(name).ok_or_else(|| NodeError::UnknownSlot {
            class: node.class_name.clone(),
            slot: name.to_string(),
        })
    }

    /// Typed read through a `SlotKey`.
    pub fn get<T: FromSlotValue>(&self, id: NodeId, key: SlotKey<T>) -> GraphResult<T> {
        let value = self.slot(id, key.name())?;
        T::from_slot_value(value).ok_or_else(|| NodeError::TypeMismatch {
            slot: key.name().to_string(),
            expected: std::any::type_name::<T>().to_string(),
            actual: value.kind_name().to_string(),
        })
    }

    /// Typed write through a `SlotKey`.
    pub fn set<T: Into<SlotValue>>(
        &mut self,
        id: NodeId,
        key: SlotKey<T>,
        value: T,
    ) -> GraphResult<()> {
        self.set_slot(id, key.name(), value)
    }

    /// Writes one slot.
    ///
    /// Unchanged values are ignored. On change the node is marked dirty when
    /// the slot is stored, the setter hook runs when the slot declares one,
    /// and `didUpdateSlot` is posted with `{slot, old, new}` once the node is
    /// `Ready`. A failing hook undoes the write and its dirty mark.
    ///
    /// # Errors
    /// - `UnknownSlot` when the class chain does not declare `name`.
    /// - `ReadOnlySlot` when writing a read-only slot of a `Ready` node.
    /// - `TypeMismatch` when the value violates the slot's type tag or holds
    ///   a non-finite float.
    /// - Whatever the setter hook returns.
    pub fn set_slot(
        &mut self,
        id: NodeId,
        name: &str,
        value: impl Into<SlotValue>,
    ) -> GraphResult<()> {
        let value = value.into();
        let enforce = self.enforce_type_tags;
        let node = self.node_mut(id)?;
        let Some(slot) = node.slots.get(name) else {
            return Err(NodeError::UnknownSlot {
                class: node.class_name.clone(),
                slot: name.to_string(),
            });
        };
        let ready = node.phase == Phase::Ready;
        if ready && slot.is_read_only() {
            return Err(NodeError::ReadOnlySlot {
                class: node.class_name.clone(),
                slot: name.to_string(),
            });
        }
        check_value(slot, name, &value, enforce)?;

        let stored = slot.is_stored();
        let hooked = slot.has_setter_hook();
        let posts = slot.posts_change();
        let old = node.value(name).cloned().unwrap_or_default();
        if old == value {
            return Ok(());
        }
        let previous = node.values.insert(name.to_string(), value.clone());
        let class_name = node.class_name.clone();

        trace!(
            "event=slot_set module=graph node={} class={} slot={} kind={}",
            id,
            class_name,
            name,
            value.kind_name()
        );
        let newly_dirty = stored && ready && self.dirty.insert(id);
        if hooked {
            if let Some(hook) = self.registry.slot_hook(&class_name, name) {
                if let Err(err) = hook(self, id, &old, &value) {
                    self.rollback_slot(id, name, previous, newly_dirty);
                    return Err(err);
                }
            }
        }
        if ready && posts {
            let mut payload = BTreeMap::new();
            payload.insert("slot".to_string(), SlotValue::from(name));
            payload.insert("old".to_string(), old);
            payload.insert("new".to_string(), value);
            self.bus
                .post(id, DID_UPDATE_SLOT, Some(SlotValue::Map(payload)));
        }
        Ok(())
    }

    pub fn title(&self, id: NodeId) -> GraphResult<String> {
        Ok(self
            .slot(id, crate::class::TITLE_SLOT)?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    pub fn subtitle(&self, id: NodeId) -> GraphResult<String> {
        Ok(self
            .slot(id, crate::class::SUBTITLE_SLOT)?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    pub fn flags(&self, id: NodeId) -> GraphResult<NodeFlags> {
        Ok(self.node(id)?.flags)
    }

    pub fn set_flags(&mut self, id: NodeId, flags: NodeFlags) -> GraphResult<()> {
        self.node_mut(id)?.flags = flags;
        Ok(())
    }

    /// Toggles whether the node is written to a store.
    ///
    /// Turning it off schedules the persisted records of the node and its
    /// subtree for deletion; turning it back on marks the subtree for
    /// writing. The owner is re-written either way so its subnode list
    /// follows.
    pub fn set_should_store(&mut self, id: NodeId, value: bool) -> GraphResult<()> {
        let node = self.node_mut(id)?;
        let changed = node.flags.should_store != value;
        node.flags.should_store = value;
        let owner = node.owner;
        if changed {
            let subtree = self.collect_subtree(id);
            if value {
                for node in subtree {
                    self.mark_dirty(node);
                }
            } else {
                self.unpersist(&subtree);
            }
            if let Some(owner) = owner {
                self.mark_dirty(owner);
            }
        } else if value {
            self.mark_dirty(id);
        }
        Ok(())
    }

    /// Toggles whether the node's subnodes are written with it.
    ///
    /// Turning it off schedules the previously persisted descendants for
    /// deletion; turning it on marks them for writing.
    pub fn set_should_store_subnodes(&mut self, id: NodeId, value: bool) -> GraphResult<()> {
        let node = self.node_mut(id)?;
        let changed = node.flags.should_store_subnodes != value;
        node.flags.should_store_subnodes = value;
        self.mark_dirty(id);
        if changed {
            let descendants: Vec<NodeId> = self.collect_subtree(id).into_iter().skip(1).collect();
            if value {
                for node in descendants {
                    self.mark_dirty(node);
                }
            } else {
                self.unpersist(&descendants);
            }
        }
        Ok(())
    }

    pub fn set_can_delete(&mut self, id: NodeId, value: bool) -> GraphResult<()> {
        self.node_mut(id)?.flags.can_delete = value;
        Ok(())
    }

    pub fn set_can_add(&mut self, id: NodeId, value: bool) -> GraphResult<()> {
        self.node_mut(id)?.flags.can_add = value;
        Ok(())
    }

    pub fn set_can_reorder_subnodes(&mut self, id: NodeId, value: bool) -> GraphResult<()> {
        self.node_mut(id)?.flags.can_reorder_subnodes = value;
        Ok(())
    }

    /// Stable identity used as the store key.
    pub fn persist_id(&self, id: NodeId) -> GraphResult<&str> {
        Ok(&self.node(id)?.persist_id)
    }

    /// Overrides the generated identity, e.g. for well-known roots.
    pub fn set_persist_id(&mut self, id: NodeId, persist_id: impl Into<String>) -> GraphResult<()> {
        let node = self.node_mut(id)?;
        node.persist_id = persist_id.into();
        node.is_persisted = false;
        self.mark_dirty(id);
        Ok(())
    }

    /// Whether the node's current state came from, or was written to, a store.
    pub fn is_persisted(&self, id: NodeId) -> GraphResult<bool> {
        Ok(self.node(id)?.is_persisted)
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.dirty.contains(&id)
    }

    /// Nodes with unwritten changes, in id order.
    pub fn dirty_nodes(&self) -> Vec<NodeId> {
        self.dirty.iter().copied().collect()
    }

    /// Persist ids scheduled for deletion by the next flush.
    pub fn pending_deletes(&self) -> Vec<String> {
        self.pending_deletes.iter().cloned().collect()
    }

    /// Schedules a `Ready` node for the next flush.
    pub fn mark_dirty(&mut self, id: NodeId) {
        if self
            .arena
            .get(id)
            .is_some_and(|node| node.phase == Phase::Ready)
        {
            self.dirty.insert(id);
        }
    }

    pub(crate) fn take_dirty(&mut self) -> BTreeSet<NodeId> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn take_pending_deletes(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.pending_deletes)
    }

    pub(crate) fn schedule_delete(&mut self, persist_id: String) {
        self.pending_deletes.insert(persist_id);
    }

    pub(crate) fn clear_dirty(&mut self, id: NodeId) {
        self.dirty.remove(&id);
    }

    pub(crate) fn mark_persisted(&mut self, id: NodeId) {
        if let Some(node) = self.arena.get_mut(id) {
            node.is_persisted = true;
            let persist_id = node.persist_id.clone();
            self.pending_deletes.remove(&persist_id);
        }
    }

    fn rollback_slot(
        &mut self,
        id: NodeId,
        name: &str,
        previous: Option<SlotValue>,
        newly_dirty: bool,
    ) {
        if let Some(node) = self.arena.get_mut(id) {
            match previous {
                Some(value) => {
                    node.values.insert(name.to_string(), value);
                }
                None => {
                    node.values.remove(name);
                }
            }
        }
        if newly_dirty {
            self.dirty.remove(&id);
        }
    }

    /// Applies a persisted value without hooks, notifications or dirty marking.
    ///
    /// Returns `Ok(false)` when the class no longer declares `name` as a
    /// stored slot.
    pub(crate) fn restore_slot(
        &mut self,
        id: NodeId,
        name: &str,
        value: SlotValue,
    ) -> GraphResult<bool> {
        let enforce = self.enforce_type_tags;
        let node = self.node_mut(id)?;
        let Some(slot) = node.slots.get(name).filter(|slot| slot.is_stored()) else {
            return Ok(false);
        };
        check_value(slot, name, &value, enforce)?;
        node.values.insert(name.to_string(), value);
        Ok(true)
    }

    pub(crate) fn allocate(&mut self, class_name: &str, slots: Rc<SlotTable>) -> NodeId {
        self.arena.insert(Node::new(class_name, slots))
    }

    /// Moves a node to `phase`; phases never move backwards.
    pub(crate) fn advance_phase(&mut self, id: NodeId, phase: Phase) -> GraphResult<()> {
        let node = self.node_mut(id)?;
        if phase < node.phase {
            return Err(NodeError::InitializationFailure {
                class: node.class_name.clone(),
                phase,
                reason: format!("cannot return to {phase} from {}", node.phase),
            });
        }
        node.phase = phase;
        Ok(())
    }

    /// Drops a node that failed construction together with anything it built.
    pub(crate) fn discard(&mut self, id: NodeId) {
        let subtree = self.collect_subtree(id);
        if let Some(owner) = self.arena.get(id).and_then(|node| node.owner) {
            if let Some(parent) = self.arena.get_mut(owner) {
                parent.subnodes.retain(|child| *child != id);
            }
        }
        for node in subtree {
            self.arena.remove(node);
            self.dirty.remove(&node);
            self.bus.unobserve_sender(node);
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> GraphResult<&Node> {
        self.arena.get(id).ok_or(NodeError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.arena.get_mut(id).ok_or(NodeError::NodeNotFound(id))
    }
}

fn check_value(slot: &Slot, name: &str, value: &SlotValue, enforce: bool) -> GraphResult<()> {
    if enforce && !slot.accepts(value) {
        return Err(NodeError::TypeMismatch {
            slot: name.to_string(),
            expected: slot
                .type_tag()
                .map_or("any", |tag| tag.name())
                .to_string(),
            actual: value.kind_name().to_string(),
        });
    }
    // Infinities and NaN cannot be written to a record and read back.
    if !value.is_finite() {
        return Err(NodeError::TypeMismatch {
            slot: name.to_string(),
            expected: "finite number".to_string(),
            actual: "non-finite float".to_string(),
        });
    }
    Ok(())
}
