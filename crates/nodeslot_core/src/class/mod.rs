//! Class definitions, slot tables and the class registry.
//!
//! # Responsibility
//! - Replace inheritance with explicit parent links and ordered callbacks.
//! - Keep per-class slot declarations in one memoized table.
//!
//! # Invariants
//! - Slot declarations are idempotent per class chain.
//! - Class names and slot names are identifiers.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod def;
pub mod registry;
pub mod slot_table;

pub use def::{ClassDef, PhaseFn, PrototypeContext, PrototypeFn, SlotHook};
pub use registry::{ClassRegistry, BASE_CLASS, SUBTITLE_SLOT, TITLE_SLOT};
pub use slot_table::SlotTable;

/// Errors raised while registering classes or declaring slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassError {
    /// Class name is not an identifier.
    InvalidClassName(String),
    /// Slot name is not an identifier.
    InvalidSlotName { class: String, slot: String },
    /// Class name is already registered.
    DuplicateClass(String),
    /// Class name is not registered.
    UnknownClass(String),
    /// Parent class must be registered before its children.
    UnknownParent { class: String, parent: String },
    /// Prototype callback rejected the declaration.
    PrototypeFailed { class: String, reason: String },
}

impl Display for ClassError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidClassName(name) => write!(f, "invalid class name `{name}`"),
            Self::InvalidSlotName { class, slot } => {
                write!(f, "invalid slot name `{slot}` declared by class `{class}`")
            }
            Self::DuplicateClass(name) => write!(f, "class already registered: {name}"),
            Self::UnknownClass(name) => write!(f, "class not registered: {name}"),
            Self::UnknownParent { class, parent } => write!(
                f,
                "class `{class}` extends `{parent}`, which is not registered"
            ),
            Self::PrototypeFailed { class, reason } => {
                write!(f, "slot declaration failed for class `{class}`: {reason}")
            }
        }
    }
}

impl Error for ClassError {}
