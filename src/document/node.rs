//! Canonical document shapes produced by every schema adapter

use serde::{Deserialize, Serialize};

use crate::types::{Category, Observation};

/// Header block common to probe, streams and error documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Agent incarnation
    pub instance_id: u64,
    /// Resumption cursor (streams documents only)
    #[serde(default)]
    pub next_sequence: Option<u64>,
    #[serde(default)]
    pub first_sequence: Option<u64>,
    #[serde(default)]
    pub last_sequence: Option<u64>,
    #[serde(default)]
    pub buffer_size: Option<u64>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub schema_version: Option<String>,
}

/// A data item declaration from a probe document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItemDef {
    pub id: String,
    pub category: Category,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub representation: Option<String>,
}

/// A component or device relationship from a component's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Element name, e.g. `ComponentRelationship`
    pub element: String,
    /// Relationship type, e.g. `PARENT` or `CHILD`
    pub kind: String,
    pub id_ref: String,
}

/// A device, agent or component with its nested children, before arena conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentNode {
    /// Element name, e.g. `Device`, `Axes`, `Linear`
    pub kind: String,
    pub id: String,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub data_items: Vec<DataItemDef>,
    pub relationships: Vec<Relationship>,
    pub children: Vec<ComponentNode>,
}

/// Decoded probe response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicesDocument {
    pub header: Header,
    pub devices: Vec<ComponentNode>,
}

/// Decoded current or sample response.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamsDocument {
    pub header: Header,
    /// Observations in document order
    pub observations: Vec<Observation>,
}

/// One entry of an `MTConnectError` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentErrorEntry {
    pub code: String,
    pub message: String,
}
