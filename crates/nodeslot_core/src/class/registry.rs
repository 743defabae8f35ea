//! Class registry and memoized slot tables.
//!
//! # Responsibility
//! - Hold every class definition reachable by name.
//! - Resolve class chains base-first and prepare each class's slot table
//!   exactly once (the PrototypeInit phase).
//!
//! # Invariants
//! - A parent is registered before its children, so chains are acyclic.
//! - The base class `Node` is always present.
//! - After registration completes the registry is shared read-only.

use crate::class::def::{ClassDef, PhaseFn, PrototypeContext, SlotHook};
use crate::class::slot_table::SlotTable;
use crate::class::ClassError;
use crate::lifecycle::Phase;
use crate::model::slot::is_valid_identifier;
use crate::model::value::TypeTag;
use log::debug;
use once_cell::unsync::OnceCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Name of the class every other class descends from.
pub const BASE_CLASS: &str = "Node";
/// Display title slot declared by the base class.
pub const TITLE_SLOT: &str = "title";
/// Display subtitle slot declared by the base class.
pub const SUBTITLE_SLOT: &str = "subtitle";

struct ClassEntry {
    def: ClassDef,
    slot_table: OnceCell<Rc<SlotTable>>,
}

/// Registry of node classes.
pub struct ClassRegistry {
    classes: BTreeMap<String, ClassEntry>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// Creates a registry that already contains the base `Node` class.
    pub fn new() -> Self {
        let base = ClassDef::root(BASE_CLASS).prototype_slots(|ctx| {
            ctx.declare_slot(TITLE_SLOT, "")?
                .set_type_tag(TypeTag::Str);
            ctx.declare_slot(SUBTITLE_SLOT, "")?
                .set_type_tag(TypeTag::Str);
            Ok(())
        });

        let mut classes = BTreeMap::new();
        classes.insert(
            BASE_CLASS.to_string(),
            ClassEntry {
                def: base,
                slot_table: OnceCell::new(),
            },
        );
        Self { classes }
    }

    /// Registers one class definition.
    ///
    /// # Errors
    /// - `InvalidClassName` when the name is not an identifier.
    /// - `DuplicateClass` when the name is taken.
    /// - `UnknownParent` when the parent has not been registered yet.
    pub fn register(&mut self, def: ClassDef) -> Result<(), ClassError> {
        let name = def.name().to_string();
        if !is_valid_identifier(&name) {
            return Err(ClassError::InvalidClassName(name));
        }
        if self.classes.contains_key(&name) {
            return Err(ClassError::DuplicateClass(name));
        }
        if let Some(parent) = def.parent() {
            if !self.classes.contains_key(parent) {
                return Err(ClassError::UnknownParent {
                    class: name,
                    parent: parent.to_string(),
                });
            }
        }

        debug!(
            "event=class_register module=class status=ok class={} parent={}",
            name,
            def.parent().unwrap_or("-")
        );
        self.classes.insert(
            name,
            ClassEntry {
                def,
                slot_table: OnceCell::new(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name).map(|entry| &entry.def)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Returns the class chain of `name`, base class first.
    pub fn chain(&self, name: &str) -> Result<Vec<&ClassDef>, ClassError> {
        let mut chain = Vec::new();
        let mut cursor = Some(name);
        while let Some(current) = cursor {
            let def = self
                .get(current)
                .ok_or_else(|| ClassError::UnknownClass(current.to_string()))?;
            chain.push(def);
            cursor = def.parent();
        }
        chain.reverse();
        Ok(chain)
    }

    /// Returns whether `class` is `ancestor` or descends from it.
    pub fn is_kind_of(&self, class: &str, ancestor: &str) -> bool {
        let mut cursor = Some(class);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.get(current).and_then(ClassDef::parent);
        }
        false
    }

    /// Returns the effective slot table of `name`, preparing it on first use.
    ///
    /// Preparation copies the parent's table and runs this class's prototype
    /// callback on it; each class is prepared at most once.
    pub fn slot_table(&self, name: &str) -> Result<Rc<SlotTable>, ClassError> {
        let entry = self
            .classes
            .get(name)
            .ok_or_else(|| ClassError::UnknownClass(name.to_string()))?;
        entry
            .slot_table
            .get_or_try_init(|| self.prepare(&entry.def))
            .map(Rc::clone)
    }

    /// Returns whether the PrototypeInit phase already ran for `name`.
    pub fn is_prepared(&self, name: &str) -> bool {
        self.classes
            .get(name)
            .is_some_and(|entry| entry.slot_table.get().is_some())
    }

    /// Returns the setter hook for `slot`, most-derived definition first.
    pub fn slot_hook(&self, class: &str, slot: &str) -> Option<SlotHook> {
        let mut cursor = Some(class);
        while let Some(current) = cursor {
            let def = self.get(current)?;
            if let Some(hook) = def.slot_hook(slot) {
                return Some(Rc::clone(hook));
            }
            cursor = def.parent();
        }
        None
    }

    /// Collects the callbacks of `phase` along the chain, base class first.
    pub(crate) fn phase_callbacks(
        &self,
        name: &str,
        phase: Phase,
    ) -> Result<Vec<(String, PhaseFn)>, ClassError> {
        Ok(self
            .chain(name)?
            .into_iter()
            .filter_map(|def| {
                def.phase_callback(phase)
                    .map(|callback| (def.name().to_string(), Rc::clone(callback)))
            })
            .collect())
    }

    fn prepare(&self, def: &ClassDef) -> Result<Rc<SlotTable>, ClassError> {
        let mut table = match def.parent() {
            Some(parent) => SlotTable::clone(&*self.slot_table(parent)?),
            None => SlotTable::new(),
        };

        if let Some(prototype) = def.prototype() {
            let mut ctx = PrototypeContext::new(def.name(), &mut table);
            prototype(&mut ctx)?;
        }
        table.validate_defaults(def.name())?;

        debug!(
            "event=class_prepare module=class status=ok class={} slots={}",
            def.name(),
            table.len()
        );
        Ok(Rc::new(table))
    }
}
