//! Column mapping specification supplied by the registry.
//!
//! JSON shape:
//!
//! ```json
//! {"Volts": {"new_name": "voltage", "multiplier": 0.001, "addition": 0, "data_type": "float"}}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Target type a mapped column is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    #[serde(rename = "bool", alias = "boolean")]
    Bool,
    #[serde(rename = "int", alias = "integer", alias = "int64")]
    Int,
    #[serde(rename = "float", alias = "float64")]
    Float,
    #[serde(rename = "str", alias = "string")]
    Str,
    #[serde(rename = "datetime64[ns]", alias = "datetime", alias = "timestamp")]
    Timestamp,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Bool => "bool",
            TargetType::Int => "int",
            TargetType::Float => "float",
            TargetType::Str => "str",
            TargetType::Timestamp => "datetime64[ns]",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TargetType::Int | TargetType::Float)
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_multiplier() -> f64 {
    1.0
}

/// Rule for a single raw column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Output column name. Absent means "keep the raw name".
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub addition: f64,
    pub data_type: TargetType,
}

impl ColumnMapping {
    pub fn new(new_name: impl Into<String>, data_type: TargetType) -> Self {
        Self {
            new_name: Some(new_name.into()),
            multiplier: 1.0,
            addition: 0.0,
            data_type,
        }
    }

    pub fn with_scale(mut self, multiplier: f64, addition: f64) -> Self {
        self.multiplier = multiplier;
        self.addition = addition;
        self
    }

    pub fn target_name<'a>(&'a self, raw_name: &'a str) -> &'a str {
        self.new_name.as_deref().unwrap_or(raw_name)
    }

    /// True when `(v + addition) * multiplier == v` for every v.
    pub fn is_identity_scale(&self) -> bool {
        self.multiplier == 1.0 && self.addition == 0.0
    }
}

/// Raw column name -> mapping rule. Immutable once received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMappingSpec {
    columns: BTreeMap<String, ColumnMapping>,
}

impl ColumnMappingSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, raw_name: impl Into<String>, mapping: ColumnMapping) -> Self {
        self.columns.insert(raw_name.into(), mapping);
        self
    }

    pub fn get(&self, raw_name: &str) -> Option<&ColumnMapping> {
        self.columns.get(raw_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ColumnMapping)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Interpret a `rendered_map` value. A non-object means "no mapping";
    /// an object whose rules do not decode is an error.
    pub fn from_rendered(value: &serde_json::Value) -> Result<Option<Self>, serde_json::Error> {
        if !value.is_object() {
            return Ok(None);
        }
        serde_json::from_value(value.clone()).map(Some)
    }
}
