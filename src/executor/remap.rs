//! Identity remapping for one restore run

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;

/// The mapping from capture-time ids to the ids assigned during restore.
///
/// Shared by every worker of a restore run: writers insert a distinct key
/// exactly once, as each resource is created; readers translate attribute
/// values in later tiers. A plain read/write lock is enough under that
/// discipline. Captured data is never mutated in place; translation always
/// produces new values.
#[derive(Debug, Default)]
pub struct RemapTable {
    inner: RwLock<HashMap<String, String>>,
}

impl RemapTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly assigned id. Returns false if the key was already
    /// present; the first mapping always wins.
    pub fn insert(&self, source_id: impl Into<String>, new_id: impl Into<String>) -> bool {
        let mut map = self.inner.write();
        match map.entry(source_id.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(new_id.into());
                true
            }
        }
    }

    /// Look up the new id for a capture-time id.
    pub fn get(&self, source_id: &str) -> Option<String> {
        self.inner.read().get(source_id).cloned()
    }

    /// Number of mappings recorded so far.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the table has no mappings.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Translate every string occurrence of a mapped id inside a value,
    /// recursing through arrays and objects. Unmapped strings pass through
    /// untouched.
    pub fn translate_value(&self, value: &Value) -> Value {
        let map = self.inner.read();
        translate(&map, value)
    }

    /// Translate a whole attribute map.
    pub fn translate_attributes(
        &self,
        attributes: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, Value> {
        let map = self.inner.read();
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), translate(&map, v)))
            .collect()
    }

    /// Copy the table out, for reporting.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.inner.read().clone()
    }
}

fn translate(map: &HashMap<String, String>, value: &Value) -> Value {
    match value {
        Value::String(s) => match map.get(s) {
            Some(new_id) => Value::String(new_id.clone()),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| translate(map, v)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), translate(map, v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_write_wins() {
        let table = RemapTable::new();
        assert!(table.insert("vpc-1", "vpc-new"));
        assert!(!table.insert("vpc-1", "vpc-other"));
        assert_eq!(table.get("vpc-1").as_deref(), Some("vpc-new"));
    }

    #[test]
    fn test_translate_nested_values() {
        let table = RemapTable::new();
        table.insert("sg-1", "sg-new");

        let value = json!({
            "peers": ["sg-1", "sg-external"],
            "inner": { "groupId": "sg-1" },
            "count": 3
        });

        let translated = table.translate_value(&value);
        assert_eq!(
            translated,
            json!({
                "peers": ["sg-new", "sg-external"],
                "inner": { "groupId": "sg-new" },
                "count": 3
            })
        );
    }

    #[test]
    fn test_translate_attributes_leaves_unmapped_ids() {
        let table = RemapTable::new();
        table.insert("vpc-1", "vpc-new");

        let mut attrs = BTreeMap::new();
        attrs.insert("vpcId".to_string(), json!("vpc-1"));
        attrs.insert("peerVpcId".to_string(), json!("vpc-other-account"));

        let out = table.translate_attributes(&attrs);
        assert_eq!(out["vpcId"], json!("vpc-new"));
        assert_eq!(out["peerVpcId"], json!("vpc-other-account"));
    }
}
