//! Slot definitions and typed accessor keys.
//!
//! # Responsibility
//! - Describe one declared attribute: name, default, type tag and flags.
//! - Offer chained configuration right after declaration.
//!
//! # Invariants
//! - Slot names match `^[A-Za-z_][A-Za-z0-9_]*$`.
//! - A `Slot` is only mutated through `SlotHandle` while its class is
//!   being prepared; afterwards the owning table is shared read-only.

use crate::model::value::{SlotValue, TypeTag};
use once_cell::sync::Lazy;
use regex::Regex;
use std::marker::PhantomData;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns whether `name` is a valid slot or class identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Declared attribute of a node class.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    name: String,
    default_value: SlotValue,
    type_tag: Option<TypeTag>,
    is_stored: bool,
    has_setter_hook: bool,
    is_read_only: bool,
    posts_change: bool,
    declared_by: String,
}

impl Slot {
    pub(crate) fn new(name: &str, default_value: SlotValue, declared_by: &str) -> Self {
        Self {
            name: name.to_string(),
            default_value,
            type_tag: None,
            is_stored: false,
            has_setter_hook: false,
            is_read_only: false,
            posts_change: true,
            declared_by: declared_by.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &SlotValue {
        &self.default_value
    }

    pub fn type_tag(&self) -> Option<TypeTag> {
        self.type_tag
    }

    pub fn is_stored(&self) -> bool {
        self.is_stored
    }

    pub fn has_setter_hook(&self) -> bool {
        self.has_setter_hook
    }

    pub fn is_read_only(&self) -> bool {
        self.is_read_only
    }

    /// Whether a successful set posts `didUpdateSlot`.
    pub fn posts_change(&self) -> bool {
        self.posts_change
    }

    /// Class that declared (or last re-declared) this slot.
    pub fn declared_by(&self) -> &str {
        &self.declared_by
    }

    /// Returns whether `value` satisfies the declared type tag.
    ///
    /// Untyped slots accept any value.
    pub fn accepts(&self, value: &SlotValue) -> bool {
        self.type_tag.map_or(true, |tag| tag.accepts(value))
    }

    pub(crate) fn redeclare(&mut self, default_value: SlotValue, declared_by: &str) {
        self.default_value = default_value;
        self.declared_by = declared_by.to_string();
    }
}

/// Chained configuration handle returned by slot declaration.
///
/// ```ignore
/// ctx.declare_slot("title", "Untitled".into())?
///     .set_is_stored(true)
///     .set_type_tag(TypeTag::Str);
/// ```
pub struct SlotHandle<'a> {
    slot: &'a mut Slot,
}

impl<'a> SlotHandle<'a> {
    pub(crate) fn new(slot: &'a mut Slot) -> Self {
        Self { slot }
    }

    pub fn set_is_stored(self, value: bool) -> Self {
        self.slot.is_stored = value;
        self
    }

    pub fn set_type_tag(self, tag: TypeTag) -> Self {
        self.slot.type_tag = Some(tag);
        self
    }

    pub fn clear_type_tag(self) -> Self {
        self.slot.type_tag = None;
        self
    }

    pub fn set_has_setter_hook(self, value: bool) -> Self {
        self.slot.has_setter_hook = value;
        self
    }

    pub fn set_read_only(self, value: bool) -> Self {
        self.slot.is_read_only = value;
        self
    }

    pub fn set_posts_change(self, value: bool) -> Self {
        self.slot.posts_change = value;
        self
    }

    pub fn set_default_value(self, value: impl Into<SlotValue>) -> Self {
        self.slot.default_value = value.into();
        self
    }

    pub fn slot(&self) -> &Slot {
        &*self.slot
    }
}

/// Compile-time typed key for one slot.
///
/// Declared once per class module and used with `NodeGraph::get`/`set`
/// instead of stringly-typed access.
pub struct SlotKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SlotKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for SlotKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotKey<T> {}

impl<T> std::fmt::Debug for SlotKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SlotKey").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{is_valid_identifier, Slot, SlotHandle};
    use crate::model::value::{SlotValue, TypeTag};

    #[test]
    fn identifiers_follow_pattern() {
        assert!(is_valid_identifier("title"));
        assert!(is_valid_identifier("_hidden2"));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn handle_chains_configuration() {
        let mut slot = Slot::new("count", SlotValue::Int(0), "Counter");
        SlotHandle::new(&mut slot)
            .set_is_stored(true)
            .set_type_tag(TypeTag::Int)
            .set_read_only(true);

        assert!(slot.is_stored());
        assert!(slot.is_read_only());
        assert!(slot.posts_change());
        assert!(!slot.accepts(&SlotValue::from("x")));
        assert!(slot.accepts(&SlotValue::Int(4)));
    }
}
