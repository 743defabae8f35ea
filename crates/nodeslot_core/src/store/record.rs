//! Persisted node layout.

use crate::model::value::SlotValue;
use crate::store::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One persisted node, keyed by its persist id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub class_name: String,
    /// Stored slots only.
    #[serde(default)]
    pub slot_values: BTreeMap<String, SlotValue>,
    /// Ordered subnode ids; absent when the node does not store subnodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnode_ids: Option<Vec<String>>,
}

impl NodeRecord {
    /// Encodes the record.
    ///
    /// # Errors
    /// - `Encode` when a slot value holds a non-finite float, which JSON
    ///   would write as `null`.
    pub fn to_json(&self) -> StoreResult<String> {
        if let Some((name, _)) = self
            .slot_values
            .iter()
            .find(|(_, value)| !value.is_finite())
        {
            return Err(StoreError::Encode {
                id: self.id.clone(),
                reason: format!("slot `{name}` holds a non-finite float"),
            });
        }
        serde_json::to_string(self).map_err(|err| StoreError::Encode {
            id: self.id.clone(),
            reason: err.to_string(),
        })
    }

    /// Parses the payload stored under `id`.
    ///
    /// # Errors
    /// - `Corruption` when the payload is not a record, names another id, or
    ///   has no class name.
    pub fn decode(id: &str, payload: &str) -> StoreResult<Self> {
        let record: Self =
            serde_json::from_str(payload).map_err(|err| StoreError::Corruption {
                id: id.to_string(),
                reason: format!("unreadable payload: {err}"),
            })?;
        if record.id != id {
            return Err(StoreError::Corruption {
                id: id.to_string(),
                reason: format!("payload belongs to `{}`", record.id),
            });
        }
        if record.class_name.trim().is_empty() {
            return Err(StoreError::Corruption {
                id: id.to_string(),
                reason: "missing class name".to_string(),
            });
        }
        Ok(record)
    }

    /// Subnode ids, empty when the record does not store subnodes.
    pub fn subnodes(&self) -> &[String] {
        self.subnode_ids.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::NodeRecord;
    use crate::model::value::SlotValue;
    use crate::store::StoreError;
    use std::collections::BTreeMap;

    #[test]
    fn decode_accepts_encoded_record() {
        let mut slot_values = BTreeMap::new();
        slot_values.insert("title".to_string(), SlotValue::from("Inbox"));
        let record = NodeRecord {
            id: "root".to_string(),
            class_name: "Folder".to_string(),
            slot_values,
            subnode_ids: Some(vec!["a".to_string()]),
        };
        let json = record.to_json().unwrap();
        assert_eq!(NodeRecord::decode("root", &json).unwrap(), record);
    }

    #[test]
    fn encode_rejects_non_finite_floats() {
        let mut slot_values = BTreeMap::new();
        slot_values.insert("ratio".to_string(), SlotValue::Float(f64::INFINITY));
        let record = NodeRecord {
            id: "gauge".to_string(),
            class_name: "Gauge".to_string(),
            slot_values,
            subnode_ids: None,
        };
        assert!(matches!(
            record.to_json().unwrap_err(),
            StoreError::Encode { ref id, .. } if id == "gauge"
        ));
    }

    #[test]
    fn decode_rejects_garbage_and_foreign_ids() {
        assert!(matches!(
            NodeRecord::decode("x", "{not json").unwrap_err(),
            StoreError::Corruption { .. }
        ));
        let foreign = r#"{"id":"y","class_name":"Folder"}"#;
        assert!(matches!(
            NodeRecord::decode("x", foreign).unwrap_err(),
            StoreError::Corruption { .. }
        ));
        let classless = r#"{"id":"x","class_name":" "}"#;
        assert!(matches!(
            NodeRecord::decode("x", classless).unwrap_err(),
            StoreError::Corruption { .. }
        ));
    }

    #[test]
    fn missing_subnode_list_reads_empty() {
        let record = NodeRecord::decode("x", r#"{"id":"x","class_name":"Item"}"#).unwrap();
        assert!(record.subnode_ids.is_none());
        assert!(record.subnodes().is_empty());
        assert!(record.slot_values.is_empty());
    }
}
