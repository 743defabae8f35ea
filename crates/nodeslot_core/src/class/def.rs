//! Declarative class definitions.
//!
//! A `ClassDef` replaces subclassing: it names a parent and registers the
//! callbacks the lifecycle controller invokes per phase, base class first.

use crate::class::registry::BASE_CLASS;
use crate::class::slot_table::SlotTable;
use crate::class::ClassError;
use crate::graph::{GraphResult, NodeGraph, NodeId};
use crate::lifecycle::{InitContext, Phase};
use crate::model::slot::{Slot, SlotHandle};
use crate::model::value::SlotValue;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// Declares the slots of one class during the PrototypeInit phase.
pub type PrototypeFn = Rc<dyn Fn(&mut PrototypeContext<'_>) -> Result<(), ClassError>>;

/// Per-instance callback for the Init, FinalInit and DidInit phases.
pub type PhaseFn = Rc<dyn Fn(&mut InitContext<'_>) -> GraphResult<()>>;

/// Runs after a hooked slot changed: `(graph, node, old, new)`.
pub type SlotHook = Rc<dyn Fn(&mut NodeGraph, NodeId, &SlotValue, &SlotValue) -> GraphResult<()>>;

/// Slot declaration scope handed to prototype callbacks.
pub struct PrototypeContext<'a> {
    class_name: &'a str,
    table: &'a mut SlotTable,
}

impl<'a> PrototypeContext<'a> {
    pub(crate) fn new(class_name: &'a str, table: &'a mut SlotTable) -> Self {
        Self { class_name, table }
    }

    pub fn class_name(&self) -> &str {
        self.class_name
    }

    /// Declares (or refines) a slot and returns its configuration handle.
    pub fn declare_slot(
        &mut self,
        name: &str,
        default_value: impl Into<SlotValue>,
    ) -> Result<SlotHandle<'_>, ClassError> {
        self.table
            .declare(self.class_name, name, default_value.into())
    }

    /// Slot inherited from an ancestor or declared earlier in this class.
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.table.get(name)
    }
}

/// Definition of one node class.
#[derive(Clone)]
pub struct ClassDef {
    name: String,
    parent: Option<String>,
    prototype: Option<PrototypeFn>,
    init: Option<PhaseFn>,
    final_init: Option<PhaseFn>,
    did_init: Option<PhaseFn>,
    slot_hooks: BTreeMap<String, SlotHook>,
}

impl ClassDef {
    /// Creates a class deriving from the base `Node` class.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(BASE_CLASS.to_string()),
            prototype: None,
            init: None,
            final_init: None,
            did_init: None,
            slot_hooks: BTreeMap::new(),
        }
    }

    pub(crate) fn root(name: &str) -> Self {
        Self {
            parent: None,
            ..Self::new(name)
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn prototype_slots<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut PrototypeContext<'_>) -> Result<(), ClassError> + 'static,
    {
        self.prototype = Some(Rc::new(callback));
        self
    }

    pub fn on_init<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut InitContext<'_>) -> GraphResult<()> + 'static,
    {
        self.init = Some(Rc::new(callback));
        self
    }

    pub fn on_final_init<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut InitContext<'_>) -> GraphResult<()> + 'static,
    {
        self.final_init = Some(Rc::new(callback));
        self
    }

    pub fn on_did_init<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut InitContext<'_>) -> GraphResult<()> + 'static,
    {
        self.did_init = Some(Rc::new(callback));
        self
    }

    /// Registers the setter hook for `slot`.
    ///
    /// The hook only runs when the slot is declared with
    /// `set_has_setter_hook(true)`.
    pub fn on_slot_update<F>(mut self, slot: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut NodeGraph, NodeId, &SlotValue, &SlotValue) -> GraphResult<()> + 'static,
    {
        self.slot_hooks.insert(slot.into(), Rc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub(crate) fn prototype(&self) -> Option<&PrototypeFn> {
        self.prototype.as_ref()
    }

    pub(crate) fn phase_callback(&self, phase: Phase) -> Option<&PhaseFn> {
        match phase {
            Phase::Init => self.init.as_ref(),
            Phase::FinalInit => self.final_init.as_ref(),
            Phase::DidInit => self.did_init.as_ref(),
            Phase::PrototypeInit | Phase::Ready => None,
        }
    }

    pub(crate) fn slot_hook(&self, slot: &str) -> Option<&SlotHook> {
        self.slot_hooks.get(slot)
    }
}

impl Debug for ClassDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("has_prototype", &self.prototype.is_some())
            .field("has_init", &self.init.is_some())
            .field("has_final_init", &self.final_init.is_some())
            .field("has_did_init", &self.did_init.is_some())
            .field("slot_hooks", &self.slot_hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}
