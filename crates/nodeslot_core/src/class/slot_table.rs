//! Effective slot table of one class.
//!
//! # Invariants
//! - Slot names are unique within a table.
//! - Declaration order is preserved; re-declaring keeps the original position.

use crate::class::ClassError;
use crate::model::slot::{is_valid_identifier, Slot, SlotHandle};
use crate::model::value::SlotValue;
use std::collections::HashMap;

/// Ordered set of slots visible on a class, inherited ones first.
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    slots: Vec<Slot>,
    positions: HashMap<String, usize>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name` on behalf of `class`, or refines the existing slot.
    ///
    /// Re-declaration replaces the default and the declaring class but keeps
    /// flags configured by ancestors, so subclasses only restate what changes.
    pub(crate) fn declare(
        &mut self,
        class: &str,
        name: &str,
        default_value: SlotValue,
    ) -> Result<SlotHandle<'_>, ClassError> {
        if !is_valid_identifier(name) {
            return Err(ClassError::InvalidSlotName {
                class: class.to_string(),
                slot: name.to_string(),
            });
        }

        let position = match self.positions.get(name) {
            Some(&position) => {
                self.slots[position].redeclare(default_value, class);
                position
            }
            None => {
                self.slots.push(Slot::new(name, default_value, class));
                let position = self.slots.len() - 1;
                self.positions.insert(name.to_string(), position);
                position
            }
        };
        Ok(SlotHandle::new(&mut self.slots[position]))
    }

    /// Checks every default against its slot's type tag.
    pub(crate) fn validate_defaults(&self, class: &str) -> Result<(), ClassError> {
        for slot in &self.slots {
            let default = slot.default_value();
            let reason = if !slot.accepts(default) {
                format!(
                    "default of slot `{}` is {}, but the slot is typed {}",
                    slot.name(),
                    default.kind_name(),
                    slot.type_tag().map_or("any", |tag| tag.name())
                )
            } else if !default.is_finite() {
                format!("default of slot `{}` is not a finite number", slot.name())
            } else {
                continue;
            };
            return Err(ClassError::PrototypeFailed {
                class: class.to_string(),
                reason,
            });
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.positions.get(name).map(|&position| &self.slots[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Slots whose values are written by the store.
    pub fn stored_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|slot| slot.is_stored())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
