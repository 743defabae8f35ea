//! Slot data model.
//!
//! # Responsibility
//! - Define slot values, type tags and slot definitions shared by the
//!   class registry, node graph and store.
//!
//! # Invariants
//! - Values are plain data: serializable, comparable, no node references.

pub mod slot;
pub mod value;
