//! Document parsing for MTConnect JSON responses.
//!
//! Agents serialize the same information model in two JSON layouts, selected
//! by the `jsonVersion` field of the probe document:
//!
//! - **Version 1** repeats single-key objects inside arrays:
//!   `"DataItems": [{"DataItem": {...}}, {"DataItem": {...}}]`
//! - **Version 2** groups objects of the same type under one key:
//!   `"DataItems": {"DataItem": [{...}, {...}]}`
//!
//! A [`DocumentAdapter`] hides that difference. Each version implements a small
//! set of layout primitives; the operations built on them (devices, child
//! components, data items, observations) turn a parsed document into the
//! canonical shapes in [`node`] exactly once, at this boundary.
//!
//! Adapters are pure: no I/O, and a document that violates the expected shape
//! yields [`AgentError::Schema`].

pub mod node;
mod v1;
mod v2;

pub use node::{
    AgentErrorEntry, ComponentNode, DataItemDef, DevicesDocument, Header, Relationship,
    StreamsDocument,
};
pub use v1::JsonV1;
pub use v2::JsonV2;

use serde_json::{Map, Value};
use std::fmt::Debug;
use std::sync::Arc;

use crate::types::{Category, Observation, ObservationValue};
use crate::{AgentError, Result};

const DEVICES_ROOT: &str = "MTConnectDevices";
const STREAMS_ROOT: &str = "MTConnectStreams";
const ERROR_ROOT: &str = "MTConnectError";

/// Layout-specific access to MTConnect JSON documents.
pub trait DocumentAdapter: Send + Sync + Debug {
    /// The `jsonVersion` this adapter understands.
    fn version(&self) -> u32;

    /// Split a collection into `(element name, element)` pairs in document order.
    fn entries<'a>(&self, collection: &'a Value) -> Result<Vec<(&'a str, &'a Value)>>;

    /// The component stream objects of one device stream.
    fn component_streams<'a>(&self, device_stream: &'a Value) -> Result<Vec<&'a Value>>;

    /// Enumerate devices (and agents) of a probe document.
    fn devices(&self, doc: &Value) -> Result<Vec<ComponentNode>> {
        let root = root_object(doc, DEVICES_ROOT)?;
        let Some(devices) = root.get("Devices") else {
            return Ok(Vec::new());
        };
        self.entries(devices)?
            .into_iter()
            .map(|(kind, device)| self.component_node(kind, device))
            .collect()
    }

    /// Enumerate the direct child components of a component, tagged with their type.
    fn components<'a>(&self, component: &'a Value) -> Result<Vec<(&'a str, &'a Value)>> {
        match as_object(component, "component")?.get("Components") {
            Some(children) => self.entries(children),
            None => Ok(Vec::new()),
        }
    }

    /// Enumerate the data items declared directly on a component.
    fn data_items(&self, component: &Value) -> Result<Vec<DataItemDef>> {
        let Some(items) = as_object(component, "component")?.get("DataItems") else {
            return Ok(Vec::new());
        };
        self.entries(items)?
            .into_iter()
            .filter(|(name, _)| *name == "DataItem")
            .map(|(_, item)| {
                serde_json::from_value::<DataItemDef>(item.clone())
                    .map_err(|e| AgentError::schema_error(format!("DataItem: {e}")))
            })
            .collect()
    }

    /// Enumerate component and device relationships from a component's configuration.
    fn relationships(&self, component: &Value) -> Result<Vec<Relationship>> {
        let relationships = as_object(component, "component")?
            .get("Configuration")
            .and_then(|config| config.get("Relationships"));
        let Some(relationships) = relationships else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for (element, rel) in self.entries(relationships)? {
            let rel = as_object(rel, element)?;
            let kind = string_field(rel, "type");
            let id_ref = string_field(rel, "idRef");
            match (kind, id_ref) {
                (Some(kind), Some(id_ref)) => {
                    found.push(Relationship { element: element.to_string(), kind, id_ref })
                }
                _ => {
                    return Err(AgentError::schema_error(format!(
                        "{element} requires type and idRef"
                    )));
                }
            }
        }
        Ok(found)
    }

    /// Enumerate observation entries of a streams document, grouped by category
    /// within each component stream, in document order.
    fn observations(&self, doc: &Value) -> Result<Vec<Observation>> {
        let root = root_object(doc, STREAMS_ROOT)?;
        let Some(streams) = root.get("Streams") else {
            return Ok(Vec::new());
        };

        let mut observations = Vec::new();
        for (element, device_stream) in self.entries(streams)? {
            if element != "DeviceStream" {
                continue;
            }
            for component_stream in self.component_streams(device_stream)? {
                let component_stream = as_object(component_stream, "ComponentStream")?;
                for (key, block) in component_stream {
                    let Some(category) = Category::from_stream_key(key) else {
                        continue;
                    };
                    for (element, entry) in self.entries(block)? {
                        observations.push(observation(category, element, entry)?);
                    }
                }
            }
        }
        Ok(observations)
    }

    /// Enumerate the entries of an `MTConnectError` document.
    fn errors(&self, doc: &Value) -> Result<Vec<AgentErrorEntry>> {
        let root = root_object(doc, ERROR_ROOT)?;
        let Some(errors) = root.get("Errors") else {
            return Ok(Vec::new());
        };
        self.entries(errors)?
            .into_iter()
            .map(|(element, entry)| {
                let entry = as_object(entry, element)?;
                Ok(AgentErrorEntry {
                    code: string_field(entry, "errorCode").unwrap_or_else(|| "UNKNOWN".into()),
                    message: string_field(entry, "value").unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Build the canonical tree for one component and everything below it.
    fn component_node(&self, kind: &str, component: &Value) -> Result<ComponentNode> {
        let obj = as_object(component, kind)?;
        let id = string_field(obj, "id")
            .ok_or_else(|| AgentError::schema_error(format!("{kind} has no id")))?;

        let children = self
            .components(component)?
            .into_iter()
            .map(|(child_kind, child)| self.component_node(child_kind, child))
            .collect::<Result<Vec<_>>>()?;

        Ok(ComponentNode {
            kind: kind.to_string(),
            id,
            name: string_field(obj, "name"),
            uuid: string_field(obj, "uuid"),
            data_items: self.data_items(component)?,
            relationships: self.relationships(component)?,
            children,
        })
    }

    /// Decode a probe document.
    fn parse_devices(&self, doc: &Value) -> Result<DevicesDocument> {
        Ok(DevicesDocument { header: header(doc, DEVICES_ROOT)?, devices: self.devices(doc)? })
    }

    /// Decode a current or sample document.
    ///
    /// An `MTConnectError` document is turned into [`AgentError::Agent`].
    fn parse_streams(&self, doc: &Value) -> Result<StreamsDocument> {
        if doc.get(ERROR_ROOT).is_some() {
            let errors = self.errors(doc)?;
            let first = errors.into_iter().next().unwrap_or(AgentErrorEntry {
                code: "UNKNOWN".into(),
                message: "error document without entries".into(),
            });
            return Err(AgentError::Agent { code: first.code, message: first.message });
        }
        Ok(StreamsDocument {
            header: header(doc, STREAMS_ROOT)?,
            observations: self.observations(doc)?,
        })
    }
}

/// Pick the adapter for a probe document from its `jsonVersion` field.
///
/// A missing version means version 1.
pub fn adapter_for(probe: &Value) -> Result<Arc<dyn DocumentAdapter>> {
    let root = root_object(probe, DEVICES_ROOT)?;
    let version = match root.get("jsonVersion") {
        None | Some(Value::Null) => 1,
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(_) => 0,
    };
    match version {
        1 => Ok(Arc::new(JsonV1)),
        2 => Ok(Arc::new(JsonV2)),
        found => Err(AgentError::UnsupportedVersion { found }),
    }
}

/// Parse a response body into a JSON value.
pub fn parse_json(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| AgentError::parse_error("JSON document", e.to_string()))
}

fn header(doc: &Value, root: &str) -> Result<Header> {
    let header = root_object(doc, root)?
        .get("Header")
        .ok_or_else(|| AgentError::schema_error(format!("{root} has no Header")))?;
    serde_json::from_value(header.clone())
        .map_err(|e| AgentError::schema_error(format!("{root} Header: {e}")))
}

fn root_object<'a>(doc: &'a Value, root: &str) -> Result<&'a Map<String, Value>> {
    let value =
        doc.get(root).ok_or_else(|| AgentError::schema_error(format!("expected {root} document")))?;
    as_object(value, root)
}

pub(crate) fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| AgentError::schema_error(format!("{what} is not an object")))
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn sequence_field(obj: &Map<String, Value>) -> Option<u64> {
    match obj.get("sequence")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn observation(category: Category, element: &str, entry: &Value) -> Result<Observation> {
    let obj = as_object(entry, element)?;
    let data_item_id = string_field(obj, "dataItemId")
        .ok_or_else(|| AgentError::schema_error(format!("{element} has no dataItemId")))?;

    Ok(Observation {
        category,
        element: element.to_string(),
        data_item_id,
        sequence: sequence_field(obj),
        timestamp: string_field(obj, "timestamp"),
        name: string_field(obj, "name"),
        sub_type: string_field(obj, "subType"),
        native_code: string_field(obj, "nativeCode"),
        value: ObservationValue::from_json(obj.get("value")),
    })
}
