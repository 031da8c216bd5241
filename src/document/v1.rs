//! JSON version 1 layout: collections are arrays of single-key objects

use serde_json::Value;

use super::{DocumentAdapter, as_object};
use crate::{AgentError, Result};

/// Adapter for `jsonVersion` 1 documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonV1;

impl DocumentAdapter for JsonV1 {
    fn version(&self) -> u32 {
        1
    }

    fn entries<'a>(&self, collection: &'a Value) -> Result<Vec<(&'a str, &'a Value)>> {
        match collection {
            Value::Array(items) => {
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    let obj = as_object(item, "collection member")?;
                    let mut fields = obj.iter();
                    match (fields.next(), fields.next()) {
                        (Some((name, value)), None) => entries.push((name.as_str(), value)),
                        _ => {
                            return Err(AgentError::schema_error(
                                "collection member must have exactly one key",
                            ));
                        }
                    }
                }
                Ok(entries)
            }
            // Agents emit `{}` for an empty Streams block in every version.
            Value::Object(obj) if obj.is_empty() => Ok(Vec::new()),
            _ => Err(AgentError::schema_error("version 1 collection must be an array")),
        }
    }

    fn component_streams<'a>(&self, device_stream: &'a Value) -> Result<Vec<&'a Value>> {
        let Some(streams) = as_object(device_stream, "DeviceStream")?.get("ComponentStreams")
        else {
            return Ok(Vec::new());
        };
        Ok(self
            .entries(streams)?
            .into_iter()
            .filter(|(name, _)| *name == "ComponentStream")
            .map(|(_, stream)| stream)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_unwrap_single_key_objects_in_order() {
        let collection = json!([{"Linear": {"id": "x"}}, {"Rotary": {"id": "c"}}]);
        let entries = JsonV1.entries(&collection).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["Linear", "Rotary"]);
        assert_eq!(entries[1].1["id"], "c");
    }

    #[test]
    fn multi_key_member_is_a_schema_error() {
        let collection = json!([{"Linear": {}, "Rotary": {}}]);
        assert!(matches!(JsonV1.entries(&collection), Err(AgentError::Schema { .. })));
    }

    #[test]
    fn grouped_layout_is_rejected() {
        let collection = json!({"DataItem": [{"id": "a"}]});
        assert!(JsonV1.entries(&collection).is_err());
        assert!(JsonV1.entries(&json!({})).unwrap().is_empty());
    }
}
