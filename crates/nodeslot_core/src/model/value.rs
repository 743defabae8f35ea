//! Dynamic slot values and semantic type tags.
//!
//! # Responsibility
//! - Represent every value a slot can hold in one serializable shape.
//! - Check values against optional slot type tags without coercion.
//!
//! # Invariants
//! - `Null` is accepted by every type tag (an unset reference).
//! - Numeric kinds never convert implicitly: `Int` is not a `Float`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Value stored in one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SlotValue>),
    Map(BTreeMap<String, SlotValue>),
}

impl SlotValue {
    /// Stable lowercase name of the runtime kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Whether every float inside the value is finite. JSON has no
    /// representation for infinities or NaN.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(value) => value.is_finite(),
            Self::List(items) => items.iter().all(Self::is_finite),
            Self::Map(entries) => entries.values().all(Self::is_finite),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl Default for SlotValue {
    fn default() -> Self {
        Self::Null
    }
}

impl Display for SlotValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
            Self::List(items) => write!(f, "[{} items]", items.len()),
            Self::Map(entries) => write!(f, "{{{} entries}}", entries.len()),
        }
    }
}

impl From<bool> for SlotValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SlotValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SlotValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for SlotValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SlotValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for SlotValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<SlotValue>> for SlotValue {
    fn from(value: Vec<SlotValue>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, SlotValue>> for SlotValue {
    fn from(value: BTreeMap<String, SlotValue>) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<SlotValue>> From<Option<T>> for SlotValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Conversion used by typed slot accessors.
///
/// Returns `None` when the stored value has a different kind.
pub trait FromSlotValue: Sized {
    fn from_slot_value(value: &SlotValue) -> Option<Self>;
}

impl FromSlotValue for SlotValue {
    fn from_slot_value(value: &SlotValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromSlotValue for bool {
    fn from_slot_value(value: &SlotValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromSlotValue for i64 {
    fn from_slot_value(value: &SlotValue) -> Option<Self> {
        value.as_int()
    }
}

impl FromSlotValue for f64 {
    fn from_slot_value(value: &SlotValue) -> Option<Self> {
        value.as_float()
    }
}

impl FromSlotValue for String {
    fn from_slot_value(value: &SlotValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromSlotValue for Vec<SlotValue> {
    fn from_slot_value(value: &SlotValue) -> Option<Self> {
        match value {
            SlotValue::List(items) => Some(items.clone()),
            _ => None,
        }
    }
}

impl<T: FromSlotValue> FromSlotValue for Option<T> {
    fn from_slot_value(value: &SlotValue) -> Option<Self> {
        match value {
            SlotValue::Null => Some(None),
            other => T::from_slot_value(other).map(Some),
        }
    }
}

/// Declared semantic type of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
}

impl TypeTag {
    /// Returns whether `value` may be assigned to a slot with this tag.
    pub fn accepts(self, value: &SlotValue) -> bool {
        matches!(
            (self, value),
            (_, SlotValue::Null)
                | (Self::Bool, SlotValue::Bool(_))
                | (Self::Int, SlotValue::Int(_))
                | (Self::Float, SlotValue::Float(_))
                | (Self::Str, SlotValue::Str(_))
                | (Self::List, SlotValue::List(_))
                | (Self::Map, SlotValue::Map(_))
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Map => "map",
        }
    }
}

impl Display for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::{FromSlotValue, SlotValue, TypeTag};

    #[test]
    fn null_is_accepted_by_every_tag() {
        for tag in [
            TypeTag::Bool,
            TypeTag::Int,
            TypeTag::Float,
            TypeTag::Str,
            TypeTag::List,
            TypeTag::Map,
        ] {
            assert!(tag.accepts(&SlotValue::Null), "{tag} should accept null");
        }
    }

    #[test]
    fn numeric_kinds_do_not_coerce() {
        assert!(!TypeTag::Float.accepts(&SlotValue::Int(3)));
        assert!(!TypeTag::Int.accepts(&SlotValue::Float(3.0)));
        assert!(TypeTag::Int.accepts(&SlotValue::Int(3)));
    }

    #[test]
    fn option_conversion_maps_null_to_none() {
        let value = Option::<String>::from_slot_value(&SlotValue::Null);
        assert_eq!(value, Some(None));
        let value = Option::<String>::from_slot_value(&SlotValue::from("a"));
        assert_eq!(value, Some(Some("a".to_string())));
        assert_eq!(Option::<String>::from_slot_value(&SlotValue::Int(1)), None);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_string(&SlotValue::Int(7)).expect("serialize int");
        assert_eq!(json, r#"{"kind":"int","value":7}"#);
        let null = serde_json::to_string(&SlotValue::Null).expect("serialize null");
        assert_eq!(null, r#"{"kind":"null"}"#);
    }

    #[test]
    fn non_finite_floats_are_detected_when_nested() {
        assert!(SlotValue::Float(1.5).is_finite());
        assert!(SlotValue::from("text").is_finite());
        assert!(!SlotValue::Float(f64::NAN).is_finite());
        let nested = SlotValue::List(vec![
            SlotValue::Int(1),
            SlotValue::List(vec![SlotValue::Float(f64::NEG_INFINITY)]),
        ]);
        assert!(!nested.is_finite());
    }
}
