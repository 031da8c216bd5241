//! JSON version 2 layout: collections group members by element name

use serde_json::Value;

use super::{DocumentAdapter, as_object};
use crate::{AgentError, Result};

/// Adapter for `jsonVersion` 2 documents.
///
/// A group holds an array of members, or a bare object when the agent wrote a
/// single member of that type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonV2;

impl DocumentAdapter for JsonV2 {
    fn version(&self) -> u32 {
        2
    }

    fn entries<'a>(&self, collection: &'a Value) -> Result<Vec<(&'a str, &'a Value)>> {
        let groups = as_object(collection, "version 2 collection")?;
        let mut entries = Vec::new();
        for (name, group) in groups {
            match group {
                Value::Array(members) => {
                    entries.extend(members.iter().map(|member| (name.as_str(), member)))
                }
                Value::Object(_) => entries.push((name.as_str(), group)),
                _ => {
                    return Err(AgentError::schema_error(format!(
                        "group {name} must be an array or object"
                    )));
                }
            }
        }
        Ok(entries)
    }

    fn component_streams<'a>(&self, device_stream: &'a Value) -> Result<Vec<&'a Value>> {
        match as_object(device_stream, "DeviceStream")?.get("ComponentStream") {
            None => Ok(Vec::new()),
            Some(Value::Array(streams)) => Ok(streams.iter().collect()),
            Some(stream @ Value::Object(_)) => Ok(vec![stream]),
            Some(_) => Err(AgentError::schema_error("ComponentStream must be an array")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_flatten_groups_in_order() {
        let collection = json!({"Linear": [{"id": "x"}, {"id": "y"}], "Rotary": [{"id": "c"}]});
        let entries = JsonV2.entries(&collection).unwrap();
        let ids: Vec<(&str, &str)> =
            entries.iter().map(|(n, v)| (*n, v["id"].as_str().unwrap())).collect();
        assert_eq!(ids, vec![("Linear", "x"), ("Linear", "y"), ("Rotary", "c")]);
    }

    #[test]
    fn single_member_group_may_be_an_object() {
        let collection = json!({"DataItem": {"id": "avail"}});
        let entries = JsonV2.entries(&collection).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "DataItem");
    }

    #[test]
    fn scalar_group_is_a_schema_error() {
        assert!(JsonV2.entries(&json!({"DataItem": 3})).is_err());
        assert!(JsonV2.entries(&json!([{"DataItem": {}}])).is_err());
    }
}
