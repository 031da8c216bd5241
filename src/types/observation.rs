//! Canonical observation types shared by both document schema versions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Data item category as declared in the device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Sample,
    Event,
    Condition,
}

impl Category {
    /// Map the category block name used in streams documents.
    pub fn from_stream_key(key: &str) -> Option<Self> {
        match key {
            "Samples" => Some(Category::Sample),
            "Events" => Some(Category::Event),
            "Condition" => Some(Category::Condition),
            _ => None,
        }
    }

    /// The category block name used in streams documents.
    pub fn stream_key(self) -> &'static str {
        match self {
            Category::Sample => "Samples",
            Category::Event => "Events",
            Category::Condition => "Condition",
        }
    }
}

/// Condition state, taken from the element name of a condition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionLevel {
    Normal,
    Warning,
    Fault,
    Unavailable,
}

impl ConditionLevel {
    pub fn from_element(name: &str) -> Option<Self> {
        match name {
            "Normal" => Some(ConditionLevel::Normal),
            "Warning" => Some(ConditionLevel::Warning),
            "Fault" => Some(ConditionLevel::Fault),
            "Unavailable" => Some(ConditionLevel::Unavailable),
            _ => None,
        }
    }
}

/// Decoded observation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationValue {
    /// The agent reported `UNAVAILABLE`
    Unavailable,
    /// No value field (typical for `Normal` conditions)
    Empty,
    Number(f64),
    Text(String),
    /// Numeric array, e.g. a 3D position or a time series
    Vector(Vec<f64>),
    /// Data sets, tables and anything else kept as raw JSON
    Structured(Value),
}

impl ObservationValue {
    /// Decode the `value` field of an observation entry.
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => ObservationValue::Empty,
            Some(Value::String(s)) if s == "UNAVAILABLE" => ObservationValue::Unavailable,
            Some(Value::String(s)) => ObservationValue::Text(s.clone()),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(f) => ObservationValue::Number(f),
                None => ObservationValue::Structured(Value::Number(n.clone())),
            },
            Some(Value::Array(items)) => {
                let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                match numbers {
                    Some(numbers) => ObservationValue::Vector(numbers),
                    None => ObservationValue::Structured(Value::Array(items.clone())),
                }
            }
            Some(other) => ObservationValue::Structured(other.clone()),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ObservationValue::Unavailable)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ObservationValue::Number(n) => Some(*n),
            ObservationValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ObservationValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One reported value for a data item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub category: Category,
    /// Element name, e.g. `Position`, `Execution`, or a condition level
    pub element: String,
    pub data_item_id: String,
    pub sequence: Option<u64>,
    pub timestamp: Option<String>,
    pub name: Option<String>,
    pub sub_type: Option<String>,
    /// Condition native code
    pub native_code: Option<String>,
    pub value: ObservationValue,
}

impl Observation {
    /// Condition level for condition entries, `None` otherwise.
    pub fn condition_level(&self) -> Option<ConditionLevel> {
        match self.category {
            Category::Condition => ConditionLevel::from_element(&self.element),
            _ => None,
        }
    }
}
